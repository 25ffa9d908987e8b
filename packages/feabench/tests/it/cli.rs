//! CLI Subcommand Smoke Tests

use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use feabench::report::Summary;
use indoc::formatdoc;
use pretty_assertions::assert_eq as pretty_assert_eq;
use serde_json::json;

use crate::{FIX_PATCH, Fixture, TEST_PATCH};

/// Run the binary with a config file; returns exit code, stdout and stderr.
fn run_feabench(config: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_feabench"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("FEABENCH_DATASET")
        .env_remove("FEABENCH_LEDGER")
        .env_remove("FEABENCH_REPOS")
        .env_remove("MAX_REPOS")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .expect("failed to run feabench");

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (exit_code, stdout, stderr)
}

/// A dataset with one instance of an unreachable repository, and a config
/// file pointing at it. Returns the config path.
fn dataset(fixture: &Fixture) -> PathBuf {
    let data = fixture.path().join("data");
    let instance = data.join("org__missing/instances/org__missing-1");
    create_dir_all(&instance).unwrap();
    write(data.join("index.csv"), "repo_folder\norg__missing\n").unwrap();
    write(
        instance.join("oracle_lite.json"),
        json!({
            "features": {
                "instance_id": "org__missing-1",
                "repo": "org/missing",
                "base_commit": "abc123",
                "test_patch": TEST_PATCH,
                "patch": FIX_PATCH,
                "pull_request_text": null,
            }
        })
        .to_string(),
    )
    .unwrap();

    let config = fixture.path().join("feabench.toml");
    write(
        &config,
        formatdoc! {r#"
            [paths]
            dataset = "{data}"
            repos = "{repos}"
            ledger = "{ledger}"

            [git]
            remote_base = "{remotes}"
            remote_suffix = false
            clone_attempts = 1

            [environment]
            isolation = "none"
            "#,
            data = data.display(),
            repos = fixture.repos().display(),
            ledger = fixture.path().join("results.jsonl").display(),
            remotes = fixture.remotes().display(),
        },
    )
    .unwrap();
    config
}

#[test]
fn test_list_shows_instances() {
    let fixture = Fixture::new();
    let config = dataset(&fixture);

    let (exit_code, stdout, stderr) = run_feabench(&config, &["list", "--verbose"]);
    pretty_assert_eq!(exit_code, 0, "list should exit 0: {stderr}");
    assert!(stdout.contains("org/missing"), "got: {stdout}");
    assert!(stdout.contains("org__missing-1"), "got: {stdout}");
    // No `test*.py` file in the test patch: the command falls back to the tests directory.
    assert!(stdout.contains("python -m pytest -xvs tests/"), "got: {stdout}");
}

#[test]
fn test_validate_then_report() {
    let fixture = Fixture::new();
    let config = dataset(&fixture);

    let (exit_code, stdout, stderr) = run_feabench(&config, &["validate"]);
    pretty_assert_eq!(exit_code, 0, "validate should exit 0: {stderr}");
    assert!(stdout.contains("clone_failed"), "got: {stdout}");

    let ledger = read_to_string(fixture.path().join("results.jsonl")).unwrap();
    pretty_assert_eq!(ledger.lines().count(), 1);
    assert!(ledger.contains(r#""baseline":"ERROR""#), "got: {ledger}");

    // A second run finds the pair in the ledger and does nothing.
    let (exit_code, stdout, _) = run_feabench(&config, &["validate"]);
    pretty_assert_eq!(exit_code, 0);
    assert!(stdout.contains("already in the ledger"), "got: {stdout}");
    let ledger = read_to_string(fixture.path().join("results.jsonl")).unwrap();
    pretty_assert_eq!(ledger.lines().count(), 1);

    let (exit_code, stdout, _) = run_feabench(&config, &["report", "--format", "markdown"]);
    pretty_assert_eq!(exit_code, 0);
    assert!(
        stdout.contains("| baseline | 0 (0.0%) | 0 (0.0%) | 1 (100.0%) | 0 (0.0%) |"),
        "got: {stdout}"
    );
    assert!(stdout.contains("| clone_failed | 1 |"), "got: {stdout}");

    let (exit_code, stdout, _) = run_feabench(&config, &["report", "--format", "json"]);
    pretty_assert_eq!(exit_code, 0);
    let summary = serde_json::from_str::<Summary>(&stdout).unwrap();
    pretty_assert_eq!(summary.total, 1);
    pretty_assert_eq!(summary.fix_patch.skip, 1);
}

#[test]
fn test_report_without_ledger_fails() {
    let fixture = Fixture::new();
    let config = dataset(&fixture);

    let (exit_code, _, stderr) = run_feabench(&config, &["report"]);
    assert_ne!(exit_code, 0);
    assert!(stderr.contains("ledger not found"), "got: {stderr}");
}

#[test]
fn test_generate_requires_api_key() {
    let fixture = Fixture::new();
    let config = dataset(&fixture);

    let output = Command::new(env!("CARGO_BIN_EXE_feabench"))
        .arg("--config")
        .arg(&config)
        .args(["generate", "--mode", "baseline", "--provider", "deepseek"])
        .env_remove("DEEPSEEK_API_KEY")
        .output()
        .expect("failed to run feabench");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no API key configured"), "got: {stderr}");
    assert!(stderr.contains("DEEPSEEK_API_KEY"), "got: {stderr}");
}

#[test]
fn test_validate_generated_patches_uses_own_ledger() {
    let fixture = Fixture::new();
    let config = dataset(&fixture);

    let (exit_code, _, stderr) = run_feabench(&config, &["validate"]);
    pretty_assert_eq!(exit_code, 0, "validate should exit 0: {stderr}");

    // Only the first instance has a generated patch; the second is skipped.
    let second = fixture
        .path()
        .join("data/org__missing/instances/org__missing-2");
    create_dir_all(&second).unwrap();
    write(
        second.join("oracle_lite.json"),
        json!({
            "features": {
                "instance_id": "org__missing-2",
                "repo": "org/missing",
                "base_commit": "def456",
                "test_patch": TEST_PATCH,
                "patch": FIX_PATCH,
                "pull_request_text": null,
            }
        })
        .to_string(),
    )
    .unwrap();
    let patches = fixture.path().join("generated");
    create_dir_all(patches.join("org__missing")).unwrap();
    write(patches.join("org__missing/org__missing-1.patch"), FIX_PATCH).unwrap();

    let dir = patches.to_str().unwrap();
    let (exit_code, stdout, stderr) = run_feabench(&config, &["validate", "--patches", dir]);
    pretty_assert_eq!(exit_code, 0, "validate should exit 0: {stderr}");
    // The pair is already in the dataset ledger but is validated again here.
    assert!(!stdout.contains("already in the ledger"), "got: {stdout}");
    assert!(stdout.contains("org__missing-1"), "got: {stdout}");
    assert!(!stdout.contains("org__missing-2"), "got: {stdout}");

    let generated = read_to_string(patches.join("validation.jsonl")).unwrap();
    pretty_assert_eq!(generated.lines().count(), 1);
    assert!(generated.contains("org__missing-1"), "got: {generated}");
    let dataset_ledger = read_to_string(fixture.path().join("results.jsonl")).unwrap();
    pretty_assert_eq!(dataset_ledger.lines().count(), 1);
}
