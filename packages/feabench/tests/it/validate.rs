//! Full validation runs through the production sandbox.

use feabench::{
    Ledger, Orchestrator, StageOutcome, ValidationResult, Workspace, repo::Revision,
};
use pretty_assertions::assert_eq as pretty_assert_eq;

use crate::{CONFLICTING_PATCH, FIX_PATCH, Fixture, host_environments, runner, task};

fn orchestrator(fixture: &Fixture) -> Orchestrator<Workspace> {
    Orchestrator::builder()
        .sandbox(Workspace::new(
            fixture.registry(),
            host_environments(),
            runner(),
        ))
        .ledger(Ledger::new(fixture.path().join("results.jsonl")))
        .build()
}

fn ledger(fixture: &Fixture) -> Vec<ValidationResult> {
    Ledger::<ValidationResult>::new(fixture.path().join("results.jsonl"))
        .read()
        .unwrap()
}

fn outcomes(result: &ValidationResult) -> (StageOutcome, StageOutcome, StageOutcome, &str) {
    (
        result.baseline,
        result.test_patch,
        result.fix_patch,
        result.note.as_str(),
    )
}

#[test]
fn well_formed_task() {
    let fixture = Fixture::new();
    let base = fixture.remote("org/lib");

    let summary = orchestrator(&fixture)
        .run(&[task("org/lib", &base, FIX_PATCH)], |_, _| {})
        .unwrap();

    use StageOutcome::*;
    pretty_assert_eq!(summary.results.len(), 1);
    pretty_assert_eq!(outcomes(&summary.results[0]), (Pass, Fail, Pass, "ok"));
    assert!(summary.results[0].is_resolved());
    pretty_assert_eq!(ledger(&fixture), summary.results);

    // The working copy stays at the last stage until the next reset.
    let repo = fixture.repos().join("org__lib");
    assert!(repo.join("src/foo.txt").exists());
}

#[test]
fn rerun_resumes_without_duplicate_rows() {
    let fixture = Fixture::new();
    let base = fixture.remote("org/lib");
    let other = fixture.remote("org/other");
    let tasks = [
        task("org/lib", &base, FIX_PATCH),
        task("org/other", &other, FIX_PATCH),
    ];

    orchestrator(&fixture).run(&tasks[..1], |_, _| {}).unwrap();
    let summary = orchestrator(&fixture).run(&tasks, |_, _| {}).unwrap();
    pretty_assert_eq!(summary.resumed, 1);
    pretty_assert_eq!(summary.results.len(), 1);

    let summary = orchestrator(&fixture).run(&tasks, |_, _| {}).unwrap();
    pretty_assert_eq!(summary.resumed, 2);
    assert!(summary.results.is_empty());

    let rows = ledger(&fixture);
    pretty_assert_eq!(
        rows.iter().map(|row| row.repo.as_str()).collect::<Vec<_>>(),
        vec!["org/lib", "org/other"]
    );
}

#[test]
fn fix_patch_that_does_not_apply() {
    let fixture = Fixture::new();
    let base = fixture.remote("org/lib");

    let summary = orchestrator(&fixture)
        .run(&[task("org/lib", &base, CONFLICTING_PATCH)], |_, _| {})
        .unwrap();

    use StageOutcome::*;
    pretty_assert_eq!(
        outcomes(&summary.results[0]),
        (Pass, Fail, Error, "apply_fix_patch_failed")
    );
}

#[test]
fn unknown_base_commit() {
    let fixture = Fixture::new();
    fixture.remote("org/lib");
    let base = "0123456789abcdef0123456789abcdef01234567"
        .parse::<Revision>()
        .unwrap();

    let summary = orchestrator(&fixture)
        .run(&[task("org/lib", &base, FIX_PATCH)], |_, _| {})
        .unwrap();

    use StageOutcome::*;
    pretty_assert_eq!(
        outcomes(&summary.results[0]),
        (Error, Skip, Skip, "reset_failed_baseline")
    );
}

#[test]
fn unreachable_repository() {
    let fixture = Fixture::new();
    let base = fixture.remote("org/lib");

    let mut observed = Vec::new();
    let summary = orchestrator(&fixture)
        .run(
            &[
                task("org/missing", &base, FIX_PATCH),
                task("org/lib", &base, FIX_PATCH),
            ],
            |task, result| observed.push((task.repo.to_string(), result.note.clone())),
        )
        .unwrap();

    use StageOutcome::*;
    pretty_assert_eq!(
        outcomes(&summary.results[0]),
        (Error, Skip, Skip, "clone_failed")
    );
    pretty_assert_eq!(
        observed,
        vec![
            (String::from("org/missing"), String::from("clone_failed")),
            (String::from("org/lib"), String::from("ok")),
        ]
    );
    pretty_assert_eq!(ledger(&fixture).len(), 2);
}
