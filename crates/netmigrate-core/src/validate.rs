//! Schema and cross-field validation of canonical specs
//!
//! Validation never fails: it always produces a [`ValidationReport`]. Whether
//! a non-empty report stops a migration is decided by the caller.
//!
//! # Rules
//!
//! Always checked:
//! - `cidr_syntax` - every address range parses
//! - `min_subnets` - at least one subnet exists
//! - `containment` - every subnet lies within the addressing block
//! - `overlap` - subnet ranges are pairwise disjoint
//! - `unique_name` - subnet names are distinct
//! - `zone_contiguity` - zone indices are exactly `0..n`
//!
//! [`ValidationMode::PreTransform`] adds `multi_zone` (two or more zones).
//! [`ValidationMode::PostTransform`] adds `port_range` and `source_range`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::CanonicalSpec;
use crate::cidr::Ipv4Cidr;

/// Which checkpoint in the pipeline the validation guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Source sanity, before the spec is handed to generation
    PreTransform,
    /// Target readiness
    PostTransform,
}

/// One failed rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Path of the offending field, e.g. `subnets[1].cidr_block`
    pub field_path: String,

    /// Rule identifier
    pub rule_name: String,

    /// Human-readable explanation
    pub message: String,
}

/// Outcome of validating one spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Mode the report was produced in
    pub mode: ValidationMode,

    /// `true` when `violations` is empty
    pub is_valid: bool,

    /// Violations in rule order
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    fn new(mode: ValidationMode, violations: Vec<Violation>) -> Self {
        Self {
            mode,
            is_valid: violations.is_empty(),
            violations,
        }
    }
}

struct Collector(Vec<Violation>);

impl Collector {
    fn push(&mut self, field_path: impl Into<String>, rule_name: &str, message: impl Into<String>) {
        self.0.push(Violation {
            field_path: field_path.into(),
            rule_name: rule_name.to_string(),
            message: message.into(),
        });
    }
}

/// Validate a spec in the given mode.
pub fn validate(spec: &CanonicalSpec, mode: ValidationMode) -> ValidationReport {
    let mut out = Collector(Vec::new());

    let block = match spec.cidr_block.parse::<Ipv4Cidr>() {
        Ok(block) => Some(block),
        Err(e) => {
            out.push("cidr_block", "cidr_syntax", e.to_string());
            None
        }
    };

    if spec.subnets.is_empty() {
        out.push("subnets", "min_subnets", "at least one subnet is required");
    }

    let mut parsed: Vec<(usize, Ipv4Cidr)> = Vec::with_capacity(spec.subnets.len());
    for (i, subnet) in spec.subnets.iter().enumerate() {
        let path = format!("subnets[{i}].cidr_block");
        match subnet.cidr_block.parse::<Ipv4Cidr>() {
            Ok(range) => {
                if let Some(block) = block
                    && !block.contains(&range)
                {
                    out.push(
                        path,
                        "containment",
                        format!("{range} is not within addressing block {block}"),
                    );
                }
                parsed.push((i, range));
            }
            Err(e) => out.push(path, "cidr_syntax", e.to_string()),
        }
    }

    for (a, (i, left)) in parsed.iter().enumerate() {
        for (j, right) in parsed.iter().skip(a + 1) {
            if left.overlaps(right) {
                out.push(
                    format!("subnets[{j}].cidr_block"),
                    "overlap",
                    format!("{right} overlaps {left} of subnets[{i}]"),
                );
            }
        }
    }

    let mut names = BTreeSet::new();
    for (i, subnet) in spec.subnets.iter().enumerate() {
        if !names.insert(subnet.name.as_str()) {
            out.push(
                format!("subnets[{i}].name"),
                "unique_name",
                format!("duplicate subnet name '{}'", subnet.name),
            );
        }
    }

    let indices: BTreeSet<u32> = spec.subnets.iter().map(|s| s.zone_index).collect();
    if let Some(gap) = (0..indices.len() as u32).find(|n| !indices.contains(n)) {
        out.push(
            "subnets",
            "zone_contiguity",
            format!("zone indices must be contiguous from 0, index {gap} is missing"),
        );
    }
    for (i, subnet) in spec.subnets.iter().enumerate() {
        if subnet.zone_index as usize >= spec.zones.len() {
            out.push(
                format!("subnets[{i}].zone_index"),
                "zone_contiguity",
                format!(
                    "zone index {} has no zone ({} declared)",
                    subnet.zone_index,
                    spec.zones.len()
                ),
            );
        }
    }

    match mode {
        ValidationMode::PreTransform => {
            let zones = spec.zone_count();
            if zones < 2 {
                out.push(
                    "subnets",
                    "multi_zone",
                    format!("subnets span {zones} zone(s), at least 2 are required"),
                );
            }
        }
        ValidationMode::PostTransform => {
            for (i, rule) in spec.ingress_rules.iter().enumerate() {
                if !(0..=65535).contains(&rule.port) {
                    out.push(
                        format!("ingress_rules[{i}].port"),
                        "port_range",
                        format!("port {} is outside 0..=65535", rule.port),
                    );
                }
                if let Err(e) = rule.source.parse::<Ipv4Cidr>() {
                    out.push(
                        format!("ingress_rules[{i}].source"),
                        "source_range",
                        e.to_string(),
                    );
                }
            }
        }
    }

    ValidationReport::new(mode, out.0)
}
