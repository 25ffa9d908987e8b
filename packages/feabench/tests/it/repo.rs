//! Cloning and resetting working copies.

use std::fs::{create_dir_all, read_to_string, write};

use feabench::{Failure, repo::RepoId};
use pretty_assertions::assert_eq as pretty_assert_eq;
use xshell::{Shell, cmd};

use crate::{Fixture, commit};

#[test]
fn clones_once_and_reuses_the_copy() {
    let fixture = Fixture::new();
    fixture.remote("org/lib");
    let repo = "org/lib".parse::<RepoId>().unwrap();

    let mut registry = fixture.registry();
    let first = registry.ensure_cloned(&repo).unwrap();
    pretty_assert_eq!(first.path(), fixture.repos().join("org__lib"));
    assert!(first.path().join("README.md").is_file());

    // A second registry finds the existing clone on disk.
    let mut registry = fixture.registry();
    let second = registry.ensure_cloned(&repo).unwrap();
    pretty_assert_eq!(second.path(), first.path());
}

#[test]
fn reset_is_idempotent() {
    let fixture = Fixture::new();
    let base = fixture.remote("org/lib");
    let repo = "org/lib".parse::<RepoId>().unwrap();
    let copy = fixture.registry().ensure_cloned(&repo).unwrap();
    let root = copy.path();

    // Dirty every way a stage can: tracked edits, untracked and ignored
    // files, a nested environment, and a local commit.
    write(root.join("README.md"), "changed\n").unwrap();
    write(root.join("untracked.txt"), "x").unwrap();
    create_dir_all(root.join(".venv/bin")).unwrap();
    write(root.join(".venv/bin/python"), "").unwrap();
    let sh = Shell::new().unwrap();
    sh.change_dir(root);
    sh.write_file("src/extra.py", "x = 1\n").unwrap();
    cmd!(sh, "git add src/extra.py").run().unwrap();
    commit(&sh, "local");

    copy.reset_to(&base).unwrap();
    copy.reset_to(&base).unwrap();

    pretty_assert_eq!(read_to_string(root.join("README.md")).unwrap(), "# lib\n");
    assert!(!root.join("untracked.txt").exists());
    assert!(!root.join(".venv").exists());
    assert!(!root.join("src/extra.py").exists());
    pretty_assert_eq!(cmd!(sh, "git rev-parse HEAD").read().unwrap(), base.as_str());
    pretty_assert_eq!(cmd!(sh, "git status --porcelain --ignored").read().unwrap(), "");
}

#[test]
fn reset_to_unknown_revision_fails() {
    let fixture = Fixture::new();
    fixture.remote("org/lib");
    let repo = "org/lib".parse::<RepoId>().unwrap();
    let copy = fixture.registry().ensure_cloned(&repo).unwrap();

    let revision = "0123456789abcdef0123456789abcdef01234567".parse().unwrap();
    let failure = copy.reset_to(&revision).unwrap_err();
    assert!(
        matches!(failure, Failure::ResetFailed { .. }),
        "unexpected failure: {failure:?}"
    );
}

#[test]
fn clone_failure_leaves_nothing_behind() {
    let fixture = Fixture::new();
    let repo = "org/missing".parse::<RepoId>().unwrap();

    let mut registry = fixture.registry();
    let failure = registry.ensure_cloned(&repo).unwrap_err();
    match &failure {
        Failure::CloneFailed { repo: failed, detail } => {
            pretty_assert_eq!(failed, &repo);
            assert!(!detail.is_empty());
        }
        other => panic!("expected a clone failure, got {other:?}"),
    }
    assert!(!registry.path_for(&repo).exists());
}

#[test]
fn foreign_directory_is_not_replaced() {
    let fixture = Fixture::new();
    fixture.remote("org/lib");
    let repo = "org/lib".parse::<RepoId>().unwrap();

    let mut registry = fixture.registry();
    let path = registry.path_for(&repo);
    create_dir_all(&path).unwrap();
    write(path.join("notes.txt"), "keep me").unwrap();

    let failure = registry.ensure_cloned(&repo).unwrap_err();
    match &failure {
        Failure::CloneFailed { detail, .. } => {
            assert!(detail.contains("not a git repository"), "got: {detail}");
        }
        other => panic!("expected a clone failure, got {other:?}"),
    }
    pretty_assert_eq!(read_to_string(path.join("notes.txt")).unwrap(), "keep me");
}
