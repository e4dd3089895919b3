#![allow(deprecated)] // TODO: move from cargo_bin to the cargo_bin_cmd! macro

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn airbrx(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("airbrx").unwrap();
    cmd.env_remove("AIRBRX_CONFIG")
        .env_remove("AWS_REGION")
        .env_remove("AIRBRX_GIT_TOKEN")
        .env_remove("AIRBRX_ARTIFACTS")
        .env("AIRBRX_CONFIG_DIR", config_dir);
    cmd
}

fn setup(config_dir: &Path, prefix: &str) {
    airbrx(config_dir)
        .args([
            "setup",
            "--non-interactive",
            "--prefix",
            prefix,
            "--region",
            "us-west-2",
            "--git-token",
            "ghp_test",
            "--account-id",
            "123456789012",
        ])
        .assert()
        .success();
}

fn write_artifacts(dir: &Path) {
    for component in ["api", "gateway", "log-summary"] {
        fs::write(dir.join(format!("{}.zip", component)), "PK").unwrap();
    }
    fs::create_dir_all(dir.join("app")).unwrap();
    fs::write(dir.join("app/index.html"), "<!doctype html>").unwrap();
}

/// Help lists every subcommand
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("airbrx").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("setup"))
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("teardown"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("airbrx").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("airbrx"));
}

#[test]
fn test_deploy_help_shows_flags() {
    let mut cmd = Command::cargo_bin("airbrx").unwrap();
    cmd.args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--artifacts"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--force-unlock"));
}

#[test]
fn test_deploy_without_configuration_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    airbrx(temp_dir.path())
        .args(["deploy", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No deployment configuration found"));
}

#[test]
fn test_setup_writes_private_files_and_policies() {
    let temp_dir = tempfile::tempdir().unwrap();
    setup(temp_dir.path(), "acme-dev");

    let config = fs::read_to_string(temp_dir.path().join("acme-dev.env")).unwrap();
    assert!(config.contains("AIRBRX_PREFIX=acme-dev"));
    assert!(config.contains("OAUTH_PROJECT_ID=NOT_CONFIGURED"));

    let token: serde_json::Value = serde_json::from_slice(
        &fs::read(temp_dir.path().join("acme-dev.god-pat.json")).unwrap(),
    )
    .unwrap();
    let god_pat = token["token"].as_str().unwrap();
    assert!(god_pat.starts_with("pat_"));
    assert!(config.contains(&format!("GOD_PAT={}", god_pat)));

    for file in [
        "acme-dev-airbrx-api-policy.json",
        "acme-dev-airbrx-gateway-policy.json",
        "acme-dev-airbrx-log-summary-policy.json",
        "acme-dev-airbrx-deployer-policy.json",
    ] {
        assert!(temp_dir.path().join(file).exists(), "{} missing", file);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for file in ["acme-dev.env", "acme-dev.god-pat.json"] {
            let mode = fs::metadata(temp_dir.path().join(file))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "{}", file);
        }
    }
}

#[test]
fn test_setup_rejects_invalid_prefix() {
    let temp_dir = tempfile::tempdir().unwrap();
    airbrx(temp_dir.path())
        .args([
            "setup",
            "--non-interactive",
            "--prefix",
            "Acme_Dev",
            "--region",
            "us-west-2",
            "--git-token",
            "ghp_test",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid prefix"));
    assert!(fs::read_dir(temp_dir.path()).unwrap().next().is_none());
}

#[test]
fn test_setup_refuses_to_overwrite() {
    let temp_dir = tempfile::tempdir().unwrap();
    setup(temp_dir.path(), "acme-dev");
    let before = fs::read_to_string(temp_dir.path().join("acme-dev.env")).unwrap();

    airbrx(temp_dir.path())
        .args([
            "setup",
            "--non-interactive",
            "--prefix",
            "acme-dev",
            "--region",
            "us-west-2",
            "--git-token",
            "ghp_other",
            "--account-id",
            "123456789012",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    let after = fs::read_to_string(temp_dir.path().join("acme-dev.env")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_dry_run_deploy() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    setup(temp_dir.path(), "acme-dev");
    write_artifacts(artifacts.path());

    airbrx(temp_dir.path())
        .args(["deploy", "--dry-run", "--artifacts"])
        .arg(artifacts.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"))
        .stdout(predicate::str::contains("acme-dev-airbrx-api"))
        .stdout(predicate::str::contains("18 created"))
        .stdout(predicate::str::contains("cloudfront.net"));
}

#[test]
fn test_dry_run_prints_environment_documents() {
    let temp_dir = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    setup(temp_dir.path(), "acme-dev");
    write_artifacts(artifacts.path());

    airbrx(temp_dir.path())
        .args(["deploy", "--dry-run", "--print-env", "--artifacts"])
        .arg(artifacts.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"Variables":{"TENANT_PREFIX":"acme-dev""#))
        .stdout(predicate::str::contains("\"GOD_PAT\":\"pat_"))
        .stdout(predicate::str::contains("OAUTH").not());
}

#[test]
fn test_print_env_requires_dry_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    airbrx(temp_dir.path())
        .args(["deploy", "--print-env"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--dry-run"));
}

#[test]
fn test_ambiguous_configuration_without_terminal() {
    let temp_dir = tempfile::tempdir().unwrap();
    setup(temp_dir.path(), "acme-dev");
    setup(temp_dir.path(), "acme-prod");

    airbrx(temp_dir.path())
        .args(["deploy", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--config"))
        .stderr(predicate::str::contains("acme-prod.env"));
}

#[test]
fn test_teardown_requires_exact_confirmation() {
    let temp_dir = tempfile::tempdir().unwrap();
    setup(temp_dir.path(), "acme-dev");

    airbrx(temp_dir.path())
        .args(["teardown", "--confirm", "acme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not match"));
}
