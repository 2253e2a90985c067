//! Integration tests for the orgscope CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the orgscope binary
#[allow(deprecated)]
fn orgscope_cmd() -> Command {
    Command::cargo_bin("orgscope").unwrap()
}

#[test]
fn test_help_command() {
    orgscope_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: orgscope"))
        .stdout(predicate::str::contains("rls"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn test_version_command() {
    orgscope_cmd()
        .arg("version")
        .assert()
        .success()
        .stderr(predicate::str::contains("0.1.0"))
        .stderr(predicate::str::contains("app.org_id"));
}

#[test]
fn test_rls_help() {
    orgscope_cmd()
        .args(["rls", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("setup"))
        .stdout(predicate::str::contains("up"))
        .stdout(predicate::str::contains("down"));
}

#[test]
fn test_rls_setup_prints_ddl() {
    let temp_dir = TempDir::new().unwrap();

    orgscope_cmd()
        .current_dir(temp_dir.path())
        .args(["rls", "setup", "--table", "units,leases", "--role", "app_user"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATE OR REPLACE FUNCTION current_org_id()"))
        .stdout(predicate::str::contains("ALTER TABLE units FORCE ROW LEVEL SECURITY;"))
        .stdout(predicate::str::contains("ALTER TABLE leases FORCE ROW LEVEL SECURITY;"))
        .stdout(predicate::str::contains("CREATE POLICY"));
}

#[test]
fn test_rls_without_tables_fails() {
    let temp_dir = TempDir::new().unwrap();

    orgscope_cmd()
        .current_dir(temp_dir.path())
        .args(["rls", "up"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no tables given"));
}

#[test]
fn test_rls_reads_config_file() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("orgscope.toml"),
        "[rls]\ntables = [\"invoices\"]\napplication_role = \"app_user\"\n",
    )
    .unwrap();

    orgscope_cmd()
        .current_dir(temp_dir.path())
        .args(["rls", "down"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-- unprotect invoices"))
        .stdout(predicate::str::contains("DISABLE ROW LEVEL SECURITY"));
}

#[test]
fn test_rls_writes_output_file() {
    let temp_dir = TempDir::new().unwrap();
    let out = temp_dir.path().join("rls.sql");

    orgscope_cmd()
        .current_dir(temp_dir.path())
        .args(["rls", "up", "-t", "units", "-r", "app_user", "-o"])
        .arg(&out)
        .assert()
        .success();

    let sql = fs::read_to_string(&out).unwrap();
    assert!(sql.contains("-- protect units"));
}

#[test]
fn test_probe_requires_urls() {
    let temp_dir = TempDir::new().unwrap();

    orgscope_cmd()
        .current_dir(temp_dir.path())
        .env_remove("DATABASE_URL")
        .env_remove("ORGSCOPE_ADMIN_DATABASE_URL")
        .arg("probe")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}
