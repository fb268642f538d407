//! Source inventory → canonical spec
//!
//! A pure mapping with no I/O. Only a missing or unparsable addressing block
//! is fatal; every other anomaly is mapped as well as possible and recorded
//! as a [`Diagnostic`].

use serde::{Deserialize, Serialize};

use crate::canonical::{CanonicalSpec, CanonicalSubnet, IngressRule, Protocol, normalize_name};
use crate::cidr::Ipv4Cidr;
use crate::error::{Error, Result};
use crate::inventory::{FirewallRule, SecurityGroup, SourceInventory};

/// Result of a successful transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformed {
    /// The canonical spec
    pub spec: CanonicalSpec,

    /// Non-fatal anomalies encountered while mapping
    pub diagnostics: Vec<Diagnostic>,
}

/// A non-fatal anomaly found during transformation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Location in the source inventory, e.g. `security_groups[0].rules[2]`
    pub path: String,

    /// What happened
    pub message: String,
}

/// Map a source inventory onto the canonical spec.
///
/// Zone indices are assigned in first-seen order of distinct zone
/// identifiers. Rules with unrecognized protocols and egress rules are
/// dropped with a diagnostic.
pub fn transform(inventory: &SourceInventory) -> Result<Transformed> {
    let raw_block = inventory
        .cidr_block
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Transformation {
            message: format!(
                "network '{}' has no addressing block",
                inventory.network_id
            ),
        })?;
    let cidr_block: Ipv4Cidr = raw_block.parse().map_err(|e| Error::Transformation {
        message: format!("addressing block of '{}': {e}", inventory.network_id),
    })?;

    let mut diagnostics = Vec::new();
    let name = if inventory.name.trim().is_empty() {
        normalize_name(&inventory.network_id)
    } else {
        normalize_name(&inventory.name)
    };

    let mut zones: Vec<String> = Vec::new();
    let mut subnets = Vec::with_capacity(inventory.subnets.len());
    for (i, subnet) in inventory.subnets.iter().enumerate() {
        let zone_index = match zones.iter().position(|z| *z == subnet.zone) {
            Some(idx) => idx,
            None => {
                zones.push(subnet.zone.clone());
                zones.len() - 1
            }
        };
        let name = if subnet.name.trim().is_empty() {
            diagnostics.push(Diagnostic {
                path: format!("subnets[{i}].name"),
                message: "unnamed sub-network, generated a name".to_string(),
            });
            format!("subnet_{}", i + 1)
        } else {
            normalize_name(&subnet.name)
        };
        subnets.push(CanonicalSubnet {
            name,
            cidr_block: subnet.cidr_block.trim().to_string(),
            zone_index: zone_index as u32,
            public: subnet.public.unwrap_or(true),
        });
    }

    let mut ingress_rules = Vec::new();
    for (g, group) in inventory.security_groups.iter().enumerate() {
        for (r, rule) in group.rules.iter().enumerate() {
            let path = format!("security_groups[{g}].rules[{r}]");
            match map_rule(group, rule) {
                Ok((mapped, note)) => {
                    if let Some(message) = note {
                        diagnostics.push(Diagnostic {
                            path: path.clone(),
                            message,
                        });
                    }
                    ingress_rules.push(mapped);
                }
                Err(message) => {
                    tracing::warn!(rule = %path, "{message}");
                    diagnostics.push(Diagnostic { path, message });
                }
            }
        }
    }

    Ok(Transformed {
        spec: CanonicalSpec {
            name,
            cidr_block: cidr_block.to_string(),
            zones,
            subnets,
            ingress_rules,
        },
        diagnostics,
    })
}

/// Map one rule; `Err` means the rule is dropped, `Ok((_, Some(note)))`
/// means it is kept with a diagnostic.
fn map_rule(
    group: &SecurityGroup,
    rule: &FirewallRule,
) -> std::result::Result<(IngressRule, Option<String>), String> {
    if !rule.is_ingress() {
        return Err("egress rule dropped, only ingress rules are migrated".to_string());
    }
    let protocol: Protocol = rule
        .protocol
        .parse()
        .map_err(|_| format!("unrecognized protocol '{}', rule dropped", rule.protocol))?;

    let source = rule.source.trim();
    if source.is_empty() {
        return Err("rule has no source address range, rule dropped".to_string());
    }

    let (port, note) = match parse_port(&rule.port) {
        PortSpec::Single(p) => (p, None),
        PortSpec::Any => (0, None),
        PortSpec::Range(from, to) => {
            return Err(format!("port range {from}-{to} cannot be expressed as a single port, rule dropped"));
        }
        PortSpec::Invalid => (
            -1,
            Some(format!("unparsable port '{}'", rule.port)),
        ),
    };

    let description = rule.description.clone().unwrap_or_else(|| {
        if group.id.is_empty() {
            format!("Migrated from security group {}", group.name)
        } else {
            format!("Migrated from security group {} ({})", group.name, group.id)
        }
    });

    Ok((
        IngressRule {
            protocol,
            port,
            source: source.to_string(),
            description,
        },
        note,
    ))
}

#[derive(Debug, PartialEq, Eq)]
enum PortSpec {
    Single(i64),
    Range(i64, i64),
    Any,
    Invalid,
}

/// Parse `80`, `80/80` (provider range notation) or `-1/-1` (all ports).
fn parse_port(raw: &str) -> PortSpec {
    let raw = raw.trim();
    let (from, to) = match raw.split_once('/') {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (raw, raw),
    };
    match (from.parse::<i64>(), to.parse::<i64>()) {
        (Ok(-1), Ok(-1)) => PortSpec::Any,
        (Ok(a), Ok(b)) if a == b => PortSpec::Single(a),
        (Ok(a), Ok(b)) => PortSpec::Range(a, b),
        _ => PortSpec::Invalid,
    }
}
