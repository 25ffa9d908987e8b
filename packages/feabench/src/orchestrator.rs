//! The per-task validation state machine.
//!
//! Every task runs three stages in order: the base revision alone, the base
//! plus the test patch, and the base plus the test and fix patches. Each
//! stage starts from a fresh reset, applies its patches cumulatively, rebuilds
//! the environment from scratch, and runs the task's test command once.
//!
//! A failing test is an outcome, not an error: it is recorded and the next
//! stage runs. An infrastructure [`Failure`] records `ERROR` for the current
//! stage, `SKIP` for every later one, and ends the task.

use std::collections::HashSet;

use bon::Builder;
use color_eyre::Result;

use crate::{
    dataset::Task,
    environment::{Environment, EnvironmentBuilder},
    ledger::{Ledger, TaskKey},
    outcome::{Failure, Stage, StageOutcome, ValidationResult},
    patch::{Patch, PatchLabel},
    repo::{RepoId, Registry, Revision, WorkingCopy},
    report::Summary,
    runner::{TestCommand, TestRun, TestRunner},
};

/// The side-effecting operations a validation needs.
///
/// [`Workspace`] implements these with git, virtual environments and real
/// test commands.
pub trait Sandbox {
    /// Handle to a provisioned working copy.
    type Copy;

    /// A provisioned environment.
    type Environment;

    fn provision(&mut self, repo: &RepoId) -> Result<Self::Copy, Failure>;

    fn reset(&mut self, copy: &Self::Copy, revision: &Revision) -> Result<(), Failure>;

    fn apply(
        &mut self,
        copy: &Self::Copy,
        patch: &Patch,
        label: PatchLabel,
    ) -> Result<(), Failure>;

    fn build_environment(&mut self, copy: &Self::Copy) -> Result<Self::Environment, Failure>;

    fn run_tests(
        &mut self,
        copy: &Self::Copy,
        environment: &Self::Environment,
        command: &TestCommand,
    ) -> Result<TestRun, Failure>;
}

/// Working copies on disk, isolated environments, real test commands.
#[derive(Debug)]
pub struct Workspace {
    registry: Registry,
    environments: EnvironmentBuilder,
    runner: TestRunner,
}

impl Workspace {
    pub fn new(registry: Registry, environments: EnvironmentBuilder, runner: TestRunner) -> Self {
        Self {
            registry,
            environments,
            runner,
        }
    }
}

impl Sandbox for Workspace {
    type Copy = WorkingCopy;
    type Environment = Environment;

    fn provision(&mut self, repo: &RepoId) -> Result<WorkingCopy, Failure> {
        self.registry.ensure_cloned(repo)
    }

    fn reset(&mut self, copy: &WorkingCopy, revision: &Revision) -> Result<(), Failure> {
        copy.reset_to(revision)
    }

    fn apply(&mut self, copy: &WorkingCopy, patch: &Patch, label: PatchLabel) -> Result<(), Failure> {
        patch.apply(copy, label)
    }

    fn build_environment(&mut self, copy: &WorkingCopy) -> Result<Environment, Failure> {
        self.environments.build(copy)
    }

    fn run_tests(
        &mut self,
        copy: &WorkingCopy,
        environment: &Environment,
        command: &TestCommand,
    ) -> Result<TestRun, Failure> {
        self.runner.run(copy, environment, command)
    }
}

/// What a call to [`Orchestrator::run`] did.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// Tasks skipped because the ledger already had a row for their pair.
    pub resumed: usize,

    /// Tasks skipped because an earlier task in the same run had their pair.
    pub duplicates: usize,

    /// Whether the run stopped at the repository cap with tasks remaining.
    pub capped: bool,

    /// The rows appended by this run, in order.
    pub results: Vec<ValidationResult>,
}

impl RunSummary {
    pub fn summary(&self) -> Summary {
        Summary::from_results(&self.results)
    }
}

/// Validates tasks one at a time and appends one ledger row per task.
#[derive(Builder)]
pub struct Orchestrator<S: Sandbox> {
    sandbox: S,

    ledger: Ledger<ValidationResult>,

    /// Stop once this many distinct repositories have been processed.
    max_repos: Option<usize>,
}

impl<S: Sandbox> Orchestrator<S> {
    /// Validate every task whose pair is not in the ledger yet.
    ///
    /// `observe` is called after each row is appended.
    #[tracing::instrument(skip_all, fields(tasks = tasks.len()))]
    pub fn run(
        &mut self,
        tasks: &[Task],
        mut observe: impl FnMut(&Task, &ValidationResult),
    ) -> Result<RunSummary> {
        let completed = self.ledger.completed()?;
        let mut summary = RunSummary::default();
        let mut seen = HashSet::<TaskKey>::new();
        let mut repos = HashSet::<RepoId>::new();

        let mut queue = Vec::new();
        for task in tasks {
            let key = task.key();
            if completed.contains(&key) {
                summary.resumed += 1;
            } else if !seen.insert(key) {
                summary.duplicates += 1;
            } else {
                queue.push(task);
            }
        }
        if summary.resumed > 0 {
            tracing::info!(
                resumed = summary.resumed,
                remaining = queue.len(),
                "skipping already-completed tasks"
            );
        }

        for (index, &task) in queue.iter().enumerate() {
            if let Some(max) = self.max_repos
                && repos.len() >= max
            {
                tracing::info!(max, remaining = queue.len() - index, "repository cap reached");
                summary.capped = true;
                break;
            }

            tracing::info!(
                repo = %task.repo,
                base_commit = %task.base_commit,
                test_command = %task.test_command,
                "[{}/{}] validating",
                index + 1,
                queue.len(),
            );
            let result = self.validate(task);
            self.ledger.append(&result)?;
            observe(task, &result);

            repos.insert(task.repo.clone());
            summary.results.push(result);
        }
        Ok(summary)
    }

    /// Run every stage of one task.
    #[tracing::instrument(skip_all, fields(repo = %task.repo, base_commit = %task.base_commit))]
    pub fn validate(&mut self, task: &Task) -> ValidationResult {
        let mut result = ValidationResult::new(
            task.repo.clone(),
            task.base_commit.clone(),
            task.instance_id.clone(),
        );

        let copy = match self.sandbox.provision(&task.repo) {
            Ok(copy) => copy,
            Err(failure) => {
                tracing::error!(%failure, "provisioning failed");
                result.short_circuit(Stage::Baseline, &failure);
                return result;
            }
        };

        for stage in Stage::ALL {
            match self.stage(&copy, task, stage) {
                Ok(run) => {
                    let outcome = StageOutcome::from_passed(run.passed);
                    tracing::info!(%stage, %outcome, "stage finished");
                    result.record(stage, outcome);
                }
                Err(failure) => {
                    tracing::error!(%stage, %failure, "stage failed");
                    result.short_circuit(stage, &failure);
                    break;
                }
            }
        }
        result
    }

    fn stage(&mut self, copy: &S::Copy, task: &Task, stage: Stage) -> Result<TestRun, Failure> {
        self.sandbox.reset(copy, &task.base_commit)?;
        for label in stage.patches() {
            self.sandbox.apply(copy, task.patch(*label), *label)?;
        }
        let environment = self.sandbox.build_environment(copy)?;
        self.sandbox
            .run_tests(copy, &environment, &task.test_command)
    }
}
