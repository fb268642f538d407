//! Provider-neutral network specification
//!
//! The contract between the transform, validate and generate stages. Address
//! ranges are kept as text so that a malformed range survives transformation
//! and is reported by validation rather than lost.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Provider-neutral network description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSpec {
    /// Network name, normalized to `[a-z0-9_]`
    pub name: String,

    /// Parent addressing block
    pub cidr_block: String,

    /// Distinct source zone identifiers; position is the zone index
    pub zones: Vec<String>,

    /// Subnets in source order
    pub subnets: Vec<CanonicalSubnet>,

    /// Ingress rules in source order
    pub ingress_rules: Vec<IngressRule>,
}

/// A subnet of the canonical network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalSubnet {
    /// Subnet name, normalized to `[a-z0-9_]`
    pub name: String,

    /// Address range
    pub cidr_block: String,

    /// Index into [`CanonicalSpec::zones`]
    pub zone_index: u32,

    /// Whether instances get public addresses
    pub public: bool,
}

/// One inbound firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    /// Transport protocol
    pub protocol: Protocol,

    /// Destination port; `0` together with [`Protocol::All`] means every port
    pub port: i64,

    /// Source address range
    pub source: String,

    /// Free-form description
    pub description: String,
}

/// Protocols the target understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// Any protocol
    All,
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" | "6" => Ok(Self::Tcp),
            "udp" | "17" => Ok(Self::Udp),
            "icmp" | "1" => Ok(Self::Icmp),
            "all" | "-1" | "any" => Ok(Self::All),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::All => "all",
        })
    }
}

impl CanonicalSpec {
    /// SHA-256 of the canonical JSON encoding, hex encoded.
    ///
    /// Field order is fixed by the struct layout and every collection is an
    /// ordered `Vec`, so equal specs always hash equally.
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        // Serializing plain structs of strings and integers cannot fail
        if let Ok(bytes) = serde_json::to_vec(self) {
            hasher.update(&bytes);
        }
        hex::encode(hasher.finalize())
    }

    /// Number of distinct zones actually referenced by subnets
    pub fn zone_count(&self) -> usize {
        let mut seen: Vec<u32> = self.subnets.iter().map(|s| s.zone_index).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

/// Normalize a source name into an identifier safe for generated code.
pub fn normalize_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn spec() -> CanonicalSpec {
        CanonicalSpec {
            name: "demo_vpc".to_string(),
            cidr_block: "10.0.0.0/16".to_string(),
            zones: vec!["a".to_string(), "b".to_string()],
            subnets: vec![
                CanonicalSubnet {
                    name: "one".to_string(),
                    cidr_block: "10.0.1.0/24".to_string(),
                    zone_index: 0,
                    public: true,
                },
                CanonicalSubnet {
                    name: "two".to_string(),
                    cidr_block: "10.0.2.0/24".to_string(),
                    zone_index: 1,
                    public: false,
                },
            ],
            ingress_rules: vec![IngressRule {
                protocol: Protocol::Tcp,
                port: 80,
                source: "0.0.0.0/0".to_string(),
                description: String::new(),
            }],
        }
    }

    #[rstest]
    #[case("tcp", Some(Protocol::Tcp))]
    #[case("TCP", Some(Protocol::Tcp))]
    #[case("Udp", Some(Protocol::Udp))]
    #[case("icmp", Some(Protocol::Icmp))]
    #[case("ALL", Some(Protocol::All))]
    #[case("gre", None)]
    #[case("", None)]
    fn test_protocol_parse(#[case] input: &str, #[case] expected: Option<Protocol>) {
        assert_eq!(input.parse::<Protocol>().ok(), expected);
    }

    #[test]
    fn test_digest_stable_and_sensitive() {
        let a = spec();
        assert_eq!(a.digest(), spec().digest());
        assert_eq!(a.digest().len(), 64);

        let mut b = spec();
        b.ingress_rules[0].port = 443;
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_zone_count() {
        let mut s = spec();
        assert_eq!(s.zone_count(), 2);
        s.subnets[1].zone_index = 0;
        assert_eq!(s.zone_count(), 1);
    }

    #[rstest]
    #[case("demo-vpc", "demo_vpc")]
    #[case(" Web Tier ", "web_tier")]
    #[case("db.private", "db_private")]
    fn test_normalize_name(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_name(raw), expected);
    }

    #[test]
    fn test_protocol_serializes_lowercase() {
        let json = serde_json::to_string(&Protocol::Icmp).unwrap();
        assert_eq!(json, "\"icmp\"");
    }
}
