//! Integration tests for the smellwright CLI

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::tempdir;

const CONCAT: &str = "\
def join_rows(rows):
    out = ''
    for row in rows:
        out += row
    return out
";

fn smellwright_cmd() -> Command {
    Command::cargo_bin("smellwright").unwrap()
}

fn sample_project() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("rows.py"), CONCAT).unwrap();
    dir
}

#[test]
fn test_cli_help() {
    smellwright_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("fix"));
}

#[test]
fn test_analyze_json_lists_smells() {
    let project = sample_project();
    let output = smellwright_cmd()
        .args(["analyze", "--format", "json"])
        .arg(project.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["files_scanned"], 1);
    let smells = report["smells"].as_array().unwrap();
    assert_eq!(smells.len(), 1);
    assert_eq!(smells[0]["kind"], "string-concat-in-loop");
}

#[test]
fn test_analyze_kind_filter() {
    let project = sample_project();
    smellwright_cmd()
        .args(["analyze", "--format", "json", "--kinds", "excessive-nesting"])
        .arg(project.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"smells\": []"));
}

#[test]
fn test_analyze_missing_path_fails() {
    let dir = tempdir().unwrap();
    smellwright_cmd()
        .arg("analyze")
        .arg(dir.path().join("missing"))
        .assert()
        .failure();
}

#[test]
fn test_print_default_config() {
    smellwright_cmd()
        .arg("print-default-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("loop_nesting_threshold: 5"))
        .stdout(predicate::str::contains("max_edits_per_run"));
}

#[test]
fn test_validate_config_accepts_valid_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("smellwright.yml");
    fs::write(&path, "detection:\n  loop_nesting_threshold: 4\n").unwrap();

    smellwright_cmd()
        .arg("validate-config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file is valid"));
}

#[test]
fn test_validate_config_rejects_zero_threshold() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("smellwright.yml");
    fs::write(&path, "detection:\n  loop_nesting_threshold: 0\n").unwrap();

    smellwright_cmd()
        .arg("validate-config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("loop_nesting_threshold"));
}

#[test]
fn test_fix_requires_test_command() {
    let project = sample_project();
    smellwright_cmd()
        .arg("fix")
        .arg(project.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No test command configured"));
    assert_eq!(fs::read_to_string(project.path().join("rows.py")).unwrap(), CONCAT);
}

#[test]
#[serial]
fn test_fix_dry_run_reports_without_writing() {
    let project = sample_project();
    let output = smellwright_cmd()
        .args(["fix", "--no-tests", "--dry-run", "--format", "json"])
        .arg(project.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["committed"].as_array().unwrap().len(), 1);
    assert_eq!(fs::read_to_string(project.path().join("rows.py")).unwrap(), CONCAT);
}

#[test]
#[serial]
fn test_fix_without_tests_rewrites_file() {
    let project = sample_project();
    let report_path = project.path().join("report.yaml");
    smellwright_cmd()
        .args(["fix", "--no-tests", "--format", "json", "--out"])
        .arg(&report_path)
        .arg(project.path())
        .assert()
        .success();

    let rewritten = fs::read_to_string(project.path().join("rows.py")).unwrap();
    assert!(rewritten.contains("out_parts.append(row)"));
    let written = fs::read_to_string(&report_path).unwrap();
    assert!(written.contains("committed:"));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_fix_rejects_rewrite_when_suite_fails() {
    let project = sample_project();
    // the suite passes only while rows.py still concatenates in place
    smellwright_cmd()
        .args(["fix", "--format", "json", "--test-command"])
        .arg("grep -q out.+=.row rows.py")
        .arg(project.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"regression\""));
    assert_eq!(fs::read_to_string(project.path().join("rows.py")).unwrap(), CONCAT);
}
