//! Initialize a migration project

use anyhow::Result;
use netmigrate_core::config::CONFIG_FILE;
use std::fs;
use std::path::Path;

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    let abs_path = project_dir.canonicalize()?;

    let project_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine project name from path"))?,
    };

    let config_path = project_dir.join(CONFIG_FILE);
    if config_path.exists() {
        anyhow::bail!(
            "Directory '{}' already contains a {CONFIG_FILE}",
            project_dir.display()
        );
    }

    tracing::info!("Creating migration project: {}", project_name);

    let config = format!(
        r#"# Netmigrate Project Configuration
name: {project_name}

# Tool servers, spawned on first use and spoken to over stdio
servers:
  source-inventory:
    command: uvx
    args: ["alibaba-cloud-ops-mcp-server@latest"]
  codegen:
    command: uvx
    args: ["awslabs.cdk-mcp-server@latest"]
    env:
      FASTMCP_LOG_LEVEL: ERROR
  deploy:
    command: uvx
    args: ["awslabs.cdk-deploy-mcp-server@latest"]
    env:
      AWS_REGION: us-east-1

stages:
  extract:
    server: source-inventory
    network_tool: VPC_DescribeVpcs
    subnets_tool: VPC_DescribeVSwitches
    firewall_tool: ECS_DescribeSecurityGroups
  generate:
    server: codegen
    tool: generate_vpc_stack
  deploy:
    server: deploy
    tool: deploy_stack

# Extract and deploy retry transient failures
retry:
  max_attempts: 3
  base_delay_ms: 500
  max_delay_ms: 10000

timeouts:
  call_ms: 120000
  checkpoint_ms: 5000

# Use the built-in inventory when no network is selected
# or the source stays unreachable
fallback:
  enabled: true

checkpoint:
  dir: .netmigrate/checkpoints
  on_success: clear  # or: archive

validation:
  fail_on_violations: true
"#
    );
    fs::write(&config_path, config)?;

    let gitignore = r#"# Netmigrate checkpoints
.netmigrate/

# Generated projects
output/
"#;
    let gitignore_path = project_dir.join(".gitignore");
    if !gitignore_path.exists() {
        fs::write(gitignore_path, gitignore)?;
    }

    tracing::info!(
        "Created project '{}' at {}",
        project_name,
        abs_path.display()
    );
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  netmigrate migrate --project-name {project_name} --vpc-id <id>");

    Ok(())
}
