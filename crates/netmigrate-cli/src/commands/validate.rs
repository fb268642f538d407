//! Transform and validate an inventory file without contacting any server

use anyhow::{Context, Result};
use netmigrate_core::{SourceInventory, ValidationMode, transform, validate};

/// Run the validate command
pub async fn run(inventory_path: &str) -> Result<()> {
    tracing::info!("Validating inventory: {}", inventory_path);

    let contents = std::fs::read_to_string(inventory_path)
        .with_context(|| format!("Failed to read {inventory_path}"))?;
    let inventory: SourceInventory =
        serde_json::from_str(&contents).context("Failed to parse source inventory")?;

    let transformed = transform(&inventory).context("Transformation failed")?;
    let spec = &transformed.spec;
    println!(
        "Network {} ({}): {} subnet(s) in {} zone(s), {} ingress rule(s)",
        spec.name,
        spec.cidr_block,
        spec.subnets.len(),
        spec.zone_count(),
        spec.ingress_rules.len()
    );
    println!("Digest: {}", spec.digest());
    for diagnostic in &transformed.diagnostics {
        println!("  note {}: {}", diagnostic.path, diagnostic.message);
    }

    let mut violations = 0;
    for (label, mode) in [
        ("source", ValidationMode::PreTransform),
        ("target", ValidationMode::PostTransform),
    ] {
        let report = validate(spec, mode);
        if report.is_valid {
            println!("✓ {label} validation passed");
        } else {
            println!("✗ {label} validation failed");
        }
        for violation in &report.violations {
            println!(
                "  {} [{}]: {}",
                violation.field_path, violation.rule_name, violation.message
            );
        }
        violations += report.violations.len();
    }

    if violations > 0 {
        anyhow::bail!("{violations} violation(s) found");
    }
    Ok(())
}
