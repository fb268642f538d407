use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::rstest;
use std::path::Path;

/// Project whose tool servers can never be spawned
fn unreachable_project(dir: &Path) {
    let config = r#"name: cli-test
servers:
  source-inventory:
    command: netmigrate-test-missing-binary
  codegen:
    command: netmigrate-test-missing-binary
  deploy:
    command: netmigrate-test-missing-binary
retry:
  max_attempts: 1
"#;
    std::fs::write(dir.join("netmigrate.yaml"), config).unwrap();
}

fn write_inventory(dir: &Path, zones: &[&str]) -> String {
    let subnets: Vec<serde_json::Value> = zones
        .iter()
        .enumerate()
        .map(|(i, zone)| {
            serde_json::json!({
                "VSwitchId": format!("vsw-{i}"),
                "VSwitchName": format!("web-{i}"),
                "CidrBlock": format!("10.0.{}.0/24", i + 1),
                "ZoneId": zone,
            })
        })
        .collect();
    let inventory = serde_json::json!({
        "VpcId": "vpc-123",
        "VpcName": "demo",
        "CidrBlock": "10.0.0.0/16",
        "vswitches": subnets,
        "security_groups": [{
            "SecurityGroupId": "sg-1",
            "SecurityGroupName": "web",
            "Permissions": {"Permission": [
                {"IpProtocol": "TCP", "PortRange": "443/443", "SourceCidrIp": "0.0.0.0/0"}
            ]}
        }]
    });
    let path = dir.join("inventory.json");
    std::fs::write(&path, inventory.to_string()).unwrap();
    path.to_str().unwrap().to_string()
}

#[rstest]
#[case("init")]
#[case("migrate")]
#[case("resume")]
#[case("status")]
#[case("validate")]
fn test_help_lists_commands(#[case] command: &str) {
    cargo_bin_cmd!("netmigrate")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(command));
}

#[test]
fn test_init_writes_config_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap();

    cargo_bin_cmd!("netmigrate")
        .args(["init", path, "--name", "demo"])
        .assert()
        .success();

    let config = std::fs::read_to_string(dir.path().join("netmigrate.yaml")).unwrap();
    assert!(config.contains("name: demo"));
    assert!(config.contains("VPC_DescribeVpcs"));
    assert!(dir.path().join(".gitignore").exists());

    // The written file loads
    cargo_bin_cmd!("netmigrate")
        .args(["--config", path, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No stored runs"));

    cargo_bin_cmd!("netmigrate")
        .args(["init", path])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already contains"));
}

#[test]
fn test_validate_inventory() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &["cn-hangzhou-a", "cn-hangzhou-b"]);

    cargo_bin_cmd!("netmigrate")
        .args(["validate", &inventory])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 subnet(s) in 2 zone(s)"))
        .stdout(predicate::str::contains("source validation passed"))
        .stdout(predicate::str::contains("target validation passed"));
}

#[test]
fn test_validate_single_zone_inventory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let inventory = write_inventory(dir.path(), &["cn-hangzhou-a", "cn-hangzhou-a"]);

    cargo_bin_cmd!("netmigrate")
        .args(["validate", &inventory])
        .assert()
        .failure()
        .stdout(predicate::str::contains("multi_zone"))
        .stderr(predicate::str::contains("1 violation(s) found"));
}

#[test]
fn test_validate_missing_file() {
    cargo_bin_cmd!("netmigrate")
        .args(["validate", "/nonexistent/inventory.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_failed_run_is_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    unreachable_project(dir.path());
    let config = dir.path().to_str().unwrap();

    // No network selected, so extraction falls back and generation is the
    // first stage that needs a server
    cargo_bin_cmd!("netmigrate")
        .args(["--config", config, "migrate", "--project-name", "demo", "--run-id", "run-1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("default inventory used"))
        .stderr(predicate::str::contains("failed at generate"));

    cargo_bin_cmd!("netmigrate")
        .args(["--config", config, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run-1"))
        .stdout(predicate::str::contains("failed at generate"));

    cargo_bin_cmd!("netmigrate")
        .args(["--config", config, "status", "run-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"failed_stage\": \"generate\""));

    // Still unreachable on resume
    cargo_bin_cmd!("netmigrate")
        .args(["--config", config, "resume", "run-1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("skipped"));
}

#[test]
fn test_resume_unknown_run() {
    let dir = tempfile::tempdir().unwrap();
    unreachable_project(dir.path());

    cargo_bin_cmd!("netmigrate")
        .args(["--config", dir.path().to_str().unwrap(), "resume", "never-started"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("never-started"));
}

#[test]
fn test_invalid_run_id_rejected() {
    let dir = tempfile::tempdir().unwrap();
    unreachable_project(dir.path());

    cargo_bin_cmd!("netmigrate")
        .args([
            "--config",
            dir.path().to_str().unwrap(),
            "migrate",
            "--project-name",
            "demo",
            "--run-id",
            "../escape",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid run id"));
}
