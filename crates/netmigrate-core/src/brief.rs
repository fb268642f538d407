//! Generation brief
//!
//! The code-generation server receives the canonical spec as JSON plus a
//! short human-readable brief describing what to build. The brief is a
//! minijinja template rendered against the spec.

use minijinja::{Environment, context};

use crate::canonical::CanonicalSpec;
use crate::error::Result;

const BRIEF_TEMPLATE: &str = "\
Create an infrastructure stack class named {{ class_name }} for project {{ project }}.
Network {{ spec.name }} uses address block {{ spec.cidr_block }} across {{ spec.zones | length }} availability zone(s).
Subnets:
{% for s in spec.subnets -%}
- {{ s.name }}: {{ s.cidr_block }} in zone {{ s.zone_index }} ({{ \"public\" if s.public else \"private\" }})
{% endfor -%}
Ingress rules:
{% for r in spec.ingress_rules -%}
- {{ r.protocol }} port {{ r.port }} from {{ r.source }}: {{ r.description }}
{% else -%}
- none
{% endfor -%}
";

/// Class name for the generated stack: the project name in PascalCase
/// followed by `Stack`.
pub fn stack_class_name(project_name: &str) -> String {
    let mut out = String::new();
    for word in project_name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "Network");
    }
    out.push_str("Stack");
    out
}

/// Render the brief sent alongside the spec to the generation tool.
pub fn render_brief(project_name: &str, spec: &CanonicalSpec) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("brief", BRIEF_TEMPLATE)?;
    let template = env.get_template("brief")?;
    let rendered = template.render(context! {
        class_name => stack_class_name(project_name),
        project => project_name,
        spec => spec,
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{CanonicalSubnet, IngressRule, Protocol};
    use rstest::rstest;

    #[rstest]
    #[case("my-project", "MyProjectStack")]
    #[case("aliyun_to_aws", "AliyunToAwsStack")]
    #[case("vpc", "VpcStack")]
    #[case("2024 move", "Network2024MoveStack")]
    #[case("", "NetworkStack")]
    fn test_stack_class_name(#[case] project: &str, #[case] expected: &str) {
        assert_eq!(stack_class_name(project), expected);
    }

    #[test]
    fn test_render_brief() {
        let spec = CanonicalSpec {
            name: "demo_vpc".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            zones: vec!["a".to_string(), "b".to_string()],
            subnets: vec![
                CanonicalSubnet {
                    name: "web_a".to_string(),
                    cidr_block: "10.0.1.0/24".to_string(),
                    zone_index: 0,
                    public: true,
                },
                CanonicalSubnet {
                    name: "db_b".to_string(),
                    cidr_block: "10.0.2.0/24".to_string(),
                    zone_index: 1,
                    public: false,
                },
            ],
            ingress_rules: vec![IngressRule {
                protocol: Protocol::Tcp,
                port: 443,
                source: "0.0.0.0/0".to_string(),
                description: "https".to_string(),
            }],
        };

        let brief = render_brief("demo", &spec).unwrap();
        assert!(brief.contains("DemoStack"));
        assert!(brief.contains("10.0.0.0/16"));
        assert!(brief.contains("2 availability zone(s)"));
        assert!(brief.contains("- web_a: 10.0.1.0/24 in zone 0 (public)"));
        assert!(brief.contains("- db_b: 10.0.2.0/24 in zone 1 (private)"));
        assert!(brief.contains("- tcp port 443 from 0.0.0.0/0: https"));
    }

    #[test]
    fn test_render_brief_without_rules() {
        let spec = CanonicalSpec {
            name: "n".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            zones: vec![],
            subnets: vec![],
            ingress_rules: vec![],
        };
        let brief = render_brief("p", &spec).unwrap();
        assert!(brief.contains("- none"));
    }
}
