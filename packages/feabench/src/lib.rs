//! Harness for the FEA-Bench feature-implementation benchmark.
//!
//! Each task names a repository, a base commit, a patch that adds tests for a
//! new feature, and a patch that implements it. Validation checks the dataset
//! itself (or a set of generated patches) along three cumulative stages:
//! - Baseline: the base commit with no patches.
//! - Test patch: the base commit plus the new tests.
//! - Fix patch: the base commit plus the new tests plus the implementation.
//!
//! A well-formed task fails at the test patch stage and passes at the fix
//! patch stage. Every stage starts from a freshly reset working copy and a
//! freshly built environment, so no state leaks between stages.
//!
//! Results are appended to a JSON-lines ledger one row per task; a rerun
//! skips the tasks the ledger already holds.
//!
//! Patches to validate can also come from a model: [`generate`] asks a model
//! for an implementation plan, a patch written from that plan, or a patch
//! written straight from the task description.

pub mod config;
pub mod dataset;
pub mod environment;
pub mod generate;
pub mod ledger;
pub mod llm;
pub mod orchestrator;
pub mod outcome;
pub mod patch;
pub mod process;
pub mod prompt;
pub mod repo;
pub mod report;
pub mod runner;

pub use crate::dataset::{Dataset, Task};
pub use crate::ledger::Ledger;
pub use crate::orchestrator::{Orchestrator, RunSummary, Sandbox, Workspace};
pub use crate::outcome::{Failure, Stage, StageOutcome, ValidationResult};
