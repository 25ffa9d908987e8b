//! Test command derivation and execution.

use std::path::Path;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{
    config::TestConfig,
    environment::Environment,
    outcome::Failure,
    patch::Patch,
    process::Invocation,
    repo::WorkingCopy,
};

/// Lines of test output kept in failure details.
const DETAIL_LINES: usize = 20;

/// Run when the test patch touches no recognizable test file.
pub const FALLBACK_COMMAND: &str = "python -m pytest -xvs tests/";

/// Disables third-party pytest plugins picked up from the environment.
const PLUGIN_AUTOLOAD: (&str, &str) = ("PYTEST_DISABLE_PLUGIN_AUTOLOAD", "1");

/// A shell command that runs a task's tests.
#[derive(Clone, Debug, PartialEq, Eq, Display, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TestCommand(String);

impl TestCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    /// Run pytest on the test files the test patch touches, or on `tests/`
    /// when it touches none.
    pub fn from_test_patch(patch: &Patch) -> Self {
        let files = patch.test_files();
        if files.is_empty() {
            return Self::new(FALLBACK_COMMAND);
        }

        let quoted = files.iter().map(|f| shell_words::quote(f)).collect::<Vec<_>>();
        Self(format!("python -m pytest -xvs {}", quoted.join(" ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of one test command invocation.
#[derive(Clone, Debug)]
pub struct TestRun {
    /// The command exited with status zero.
    pub passed: bool,

    /// Standard output followed by standard error.
    pub output: String,
}

/// Runs test commands inside a provisioned environment.
#[derive(Clone, Debug)]
pub struct TestRunner {
    config: TestConfig,
}

impl TestRunner {
    pub fn new(config: TestConfig) -> Self {
        Self { config }
    }

    /// Run `command` once in the working copy.
    ///
    /// A non-zero exit is a failed run, not an error. Errors are reserved for
    /// commands that could not be started or exceeded the timeout.
    #[tracing::instrument(skip(self, copy, environment), fields(repo = %copy.repo()))]
    pub fn run(
        &self,
        copy: &WorkingCopy,
        environment: &Environment,
        command: &TestCommand,
    ) -> Result<TestRun, Failure> {
        self.run_in(copy.path(), environment, command)
    }

    fn run_in(
        &self,
        root: &Path,
        environment: &Environment,
        command: &TestCommand,
    ) -> Result<TestRun, Failure> {
        let invocation = self
            .config
            .env
            .iter()
            .fold(Invocation::shell(command.as_str(), root), |inv, (k, v)| {
                inv.env(k, v)
            })
            .env(PLUGIN_AUTOLOAD.0, PLUGIN_AUTOLOAD.1)
            .timeout(self.config.timeout());

        let output = environment
            .activate(invocation)
            .run()
            .map_err(|error| Failure::TestRunFailed {
                detail: format!("{error:#}"),
            })?;

        if output.timed_out {
            return Err(Failure::TestRunFailed {
                detail: format!("{}: {}", output.describe(), output.tail(DETAIL_LINES)),
            });
        }

        tracing::info!(passed = output.success(), elapsed = ?output.elapsed, "tests finished");
        Ok(TestRun {
            passed: output.success(),
            output: output.combined,
        })
    }
}
