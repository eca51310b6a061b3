//! Integration tests for the nugget CLI
//!
//! These drive the binary end to end: plan validation, deploy ordering,
//! configuration and full simulated sessions.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a nugget Command
fn nugget() -> Command {
    cargo_bin_cmd!("nugget")
}

/// Temp project whose sessions live inside the temp dir and retry instantly
fn create_temp_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let nugget_dir = dir.path().join(".nugget");
    fs::create_dir_all(&nugget_dir).unwrap();
    fs::write(
        nugget_dir.join("nugget.toml"),
        format!(
            "[orchestrator]\nretry_delay_ms = 0\nworkspace_root = \"{}\"\n",
            dir.path().join("sessions").display()
        ),
    )
    .unwrap();
    dir
}

fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

const PLAN_JSON: &str = r#"{
  "tasks": [
    {"id": "task-2", "name": "Blink loop", "dependencies": ["task-1"], "agent_name": "Sparky"},
    {"id": "task-1", "name": "Pin setup", "agent_name": "Sparky"},
    {"id": "task-3", "name": "Write tests", "dependencies": ["task-2"], "agent_name": "Checkers"}
  ],
  "agents": [
    {"name": "Sparky", "role": "builder"},
    {"name": "Checkers", "role": "tester"}
  ],
  "plan_explanation": "Set up the pin, loop, then test."
}"#;

const PLAN_YAML: &str = r#"
tasks:
  - id: task-1
    name: Pin setup
    agent_name: Sparky
agents:
  - name: Sparky
    allowed_paths: ["src/", "/etc/"]
"#;

fn stdout_lines(output: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(output)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn event_types(events: &[serde_json::Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_nugget_help() {
        nugget()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("simulate"));
    }

    #[test]
    fn test_nugget_version() {
        nugget().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_command_fails() {
        nugget().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Plan Tests
// =============================================================================

mod plan {
    use super::*;

    #[test]
    fn test_plan_prints_topological_order() {
        let dir = create_temp_project();
        let plan = write_file(dir.path(), "plan.json", PLAN_JSON);

        let output = nugget()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .output()
            .unwrap();
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("3 task(s), 2 agent(s)"));
        assert!(stdout.contains("Set up the pin, loop, then test."));
        let first = stdout.find("task-1").unwrap();
        let second = stdout.find("task-2 ").unwrap();
        let third = stdout.find("task-3").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn test_plan_yaml_reports_dropped_paths() {
        let dir = create_temp_project();
        let plan = write_file(dir.path(), "plan.yaml", PLAN_YAML);

        nugget()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .success()
            .stdout(predicate::str::contains("Warnings:"))
            .stdout(predicate::str::contains("/etc/"));
    }

    #[test]
    fn test_plan_with_cycle_fails() {
        let dir = create_temp_project();
        let plan = write_file(
            dir.path(),
            "plan.json",
            r#"{"tasks": [
                {"id": "a", "name": "A", "dependencies": ["b"], "agent_name": "Sparky"},
                {"id": "b", "name": "B", "dependencies": ["a"], "agent_name": "Sparky"}
            ], "agents": [{"name": "Sparky"}]}"#,
        );

        nugget()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle"));
    }

    #[test]
    fn test_plan_with_unknown_dependency_fails() {
        let dir = create_temp_project();
        let plan = write_file(
            dir.path(),
            "plan.json",
            r#"{"tasks": [{"id": "a", "name": "A", "dependencies": ["ghost"], "agent_name": "Sparky"}],
                "agents": [{"name": "Sparky"}]}"#,
        );

        nugget()
            .current_dir(dir.path())
            .arg("plan")
            .arg(&plan)
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown task 'ghost'"));
    }

    #[test]
    fn test_plan_missing_file_fails() {
        let dir = create_temp_project();
        nugget()
            .current_dir(dir.path())
            .args(["plan", "nope.json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read plan file"));
    }
}

// =============================================================================
// Deploy Order Tests
// =============================================================================

mod deploy_order {
    use super::*;

    #[test]
    fn test_provider_deploys_first() {
        let dir = create_temp_project();
        let file = write_file(
            dir.path(),
            "spec.yaml",
            r#"
devices:
  - plugin_id: esp32-sensor
    instance_id: sensor
  - plugin_id: cloud-dashboard
    instance_id: dashboard
manifests:
  esp32-sensor:
    method: flash
    requires: ["cloud_url"]
  cloud-dashboard:
    method: cloud
    provides: ["cloud_url"]
"#,
        );

        let output = nugget().arg("deploy-order").arg(&file).output().unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("1. dashboard (cloud-dashboard)"));
        assert!(stdout.contains("2. sensor (esp32-sensor)"));
    }

    #[test]
    fn test_cycle_fails() {
        let dir = create_temp_project();
        let file = write_file(
            dir.path(),
            "spec.json",
            r#"{"devices": [
                {"plugin_id": "a", "instance_id": "a",
                 "deploy_manifest": {"provides": ["x"], "requires": ["y"]}},
                {"plugin_id": "b", "instance_id": "b",
                 "deploy_manifest": {"provides": ["y"], "requires": ["x"]}}
            ]}"#,
        );

        nugget()
            .arg("deploy-order")
            .arg(&file)
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle"));
    }

    #[test]
    fn test_no_devices() {
        let dir = create_temp_project();
        let file = write_file(dir.path(), "spec.json", "{}");
        nugget()
            .arg("deploy-order")
            .arg(&file)
            .assert()
            .success()
            .stdout(predicate::str::contains("No deploy units."));
    }
}

// =============================================================================
// Simulate Tests
// =============================================================================

mod simulate {
    use super::*;

    #[test]
    fn test_simulate_streams_events() {
        let dir = create_temp_project();
        let plan = write_file(dir.path(), "plan.json", PLAN_JSON);

        let output = nugget()
            .current_dir(dir.path())
            .args(["simulate", "--plan"])
            .arg(&plan)
            .output()
            .unwrap();
        assert!(output.status.success());

        let events = stdout_lines(&output.stdout);
        let types = event_types(&events);
        assert_eq!(types.first().map(String::as_str), Some("planning_started"));
        assert_eq!(types.last().map(String::as_str), Some("session_complete"));
        assert!(!types.iter().any(|t| t == "error"));

        let started: Vec<&str> = events
            .iter()
            .filter(|e| e["type"] == "task_started")
            .filter_map(|e| e["task_id"].as_str())
            .collect();
        assert_eq!(started, vec!["task-1", "task-2", "task-3"]);
        assert_eq!(
            events.last().unwrap()["summary"].as_str(),
            Some("Completed 3/3 tasks.")
        );

        assert!(dir.path().join("sessions").is_dir());
    }

    #[test]
    fn test_review_gate_declined_without_yes() {
        let dir = create_temp_project();
        let plan = write_file(dir.path(), "plan.json", PLAN_JSON);
        let spec = write_file(
            dir.path(),
            "spec.yaml",
            "project:\n  goal: Blink an LED\nworkflow:\n  review_enabled: true\n",
        );

        let output = nugget()
            .current_dir(dir.path())
            .args(["simulate", "--plan"])
            .arg(&plan)
            .arg("--spec")
            .arg(&spec)
            .output()
            .unwrap();
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("Build failed"));

        let types = event_types(&stdout_lines(&output.stdout));
        assert!(types.contains(&"human_gate".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("error"));
    }

    #[test]
    fn test_yes_approves_gates_and_flashes() {
        let dir = create_temp_project();
        let plan = write_file(dir.path(), "plan.json", PLAN_JSON);
        let spec = write_file(
            dir.path(),
            "spec.json",
            r#"{"workflow": {"review_enabled": true}, "deployment": {"target": "esp32"}}"#,
        );

        let output = nugget()
            .current_dir(dir.path())
            .args(["simulate", "--yes", "--plan"])
            .arg(&plan)
            .arg("--spec")
            .arg(&spec)
            .output()
            .unwrap();
        assert!(output.status.success());

        let events = stdout_lines(&output.stdout);
        let types = event_types(&events);
        for expected in ["human_gate", "flash_prompt", "flash_complete", "deploy_complete"] {
            assert!(types.iter().any(|t| t == expected), "missing {}", expected);
        }
        let flash = events
            .iter()
            .find(|e| e["type"] == "flash_complete")
            .unwrap();
        assert_eq!(flash["success"], true);
        assert_eq!(types.last().map(String::as_str), Some("session_complete"));
    }

    #[test]
    fn test_simulate_invalid_plan_fails() {
        let dir = create_temp_project();
        let plan = write_file(
            dir.path(),
            "plan.json",
            r#"{"tasks": [{"id": "a", "name": "A", "agent_name": "Nobody"}], "agents": []}"#,
        );

        let output = nugget()
            .current_dir(dir.path())
            .args(["simulate", "--plan"])
            .arg(&plan)
            .output()
            .unwrap();
        assert!(!output.status.success());

        let types = event_types(&stdout_lines(&output.stdout));
        assert_eq!(types, vec!["planning_started", "error"]);
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();

        nugget()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created nugget.toml"));
        assert!(dir.path().join(".nugget/nugget.toml").exists());

        nugget()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_warns_on_zero_timeout() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".nugget")).unwrap();
        fs::write(
            dir.path().join(".nugget/nugget.toml"),
            "[orchestrator]\ntask_timeout_secs = 0\n",
        )
        .unwrap();

        nugget()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("task_timeout_secs"));
    }

    #[test]
    fn test_config_show_respects_env_override() {
        let dir = TempDir::new().unwrap();
        nugget()
            .current_dir(dir.path())
            .env("NUGGET_MAX_RETRIES", "7")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_retries = 7"));
    }
}
