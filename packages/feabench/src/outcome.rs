//! Structured outcomes for task validation.
//!
//! This module provides types for representing the results of validation runs
//! in a structured way that supports:
//! - A stable JSON-lines ledger format
//! - Nice CLI rendering
//! - Aggregation across tasks

use std::fmt::{self, Display, Formatter};

use color_print::cformat;
use derive_more::{Display as DeriveDisplay, Error};
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};

use crate::{
    patch::PatchLabel,
    repo::{RepoId, Revision},
};

/// One of the three cumulative validation stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The base revision with no patches.
    Baseline,

    /// The base revision plus the test patch.
    TestPatch,

    /// The base revision plus the test patch plus the fix patch.
    FixPatch,
}

derive_display_from_serialize!(Stage);
derive_fromstr_from_deserialize!(Stage);

impl Stage {
    /// All stages, in the order they are attempted.
    pub const ALL: [Stage; 3] = [Stage::Baseline, Stage::TestPatch, Stage::FixPatch];

    /// The stages after this one.
    pub fn following(self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().filter(move |stage| *stage > self)
    }

    /// The patches applied (in order, from a fresh reset) for this stage.
    pub fn patches(self) -> &'static [PatchLabel] {
        match self {
            Stage::Baseline => &[],
            Stage::TestPatch => &[PatchLabel::TestPatch],
            Stage::FixPatch => &[PatchLabel::TestPatch, PatchLabel::FixPatch],
        }
    }
}

/// The recorded outcome of one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageOutcome {
    /// The test command exited with status zero.
    Pass,

    /// The test command exited with a non-zero status.
    Fail,

    /// Infrastructure failed while preparing or running this stage.
    Error,

    /// Not attempted because an earlier stage failed.
    #[default]
    Skip,
}

derive_display_from_serialize!(StageOutcome);
derive_fromstr_from_deserialize!(StageOutcome);

impl StageOutcome {
    pub const ALL: [StageOutcome; 4] = [
        StageOutcome::Pass,
        StageOutcome::Fail,
        StageOutcome::Error,
        StageOutcome::Skip,
    ];

    pub fn from_passed(passed: bool) -> Self {
        if passed { Self::Pass } else { Self::Fail }
    }

    /// Render with terminal colors.
    pub fn colored(self) -> String {
        match self {
            Self::Pass => cformat!("<green,bold>PASS</>"),
            Self::Fail => cformat!("<red,bold>FAIL</>"),
            Self::Error => cformat!("<magenta,bold>ERROR</>"),
            Self::Skip => cformat!("<dim>SKIP</>"),
        }
    }
}

/// An infrastructure failure; aborts the current task.
///
/// Test failures are not represented here: a failing test command is an
/// expected, recorded outcome ([`StageOutcome::Fail`]).
#[derive(Clone, Debug, PartialEq, Eq, DeriveDisplay, Error)]
pub enum Failure {
    #[display("clone {repo}: {detail}")]
    CloneFailed { repo: RepoId, detail: String },

    #[display("reset to {revision}: {detail}")]
    ResetFailed { revision: Revision, detail: String },

    #[display("apply {label}: {detail}")]
    ApplyFailed { label: PatchLabel, detail: String },

    #[display("build environment: {detail}")]
    EnvFailed { detail: String },

    #[display("run tests: {detail}")]
    TestRunFailed { detail: String },
}

impl Failure {
    /// The ledger note for this failure when it happens during `stage`.
    pub fn note(&self, stage: Stage) -> String {
        match self {
            Failure::CloneFailed { .. } => String::from("clone_failed"),
            Failure::ResetFailed { .. } => format!("reset_failed_{stage}"),
            Failure::EnvFailed { .. } => format!("venv_install_failed_{stage}"),
            Failure::TestRunFailed { .. } => format!("test_run_failed_{stage}"),
            Failure::ApplyFailed { label, .. } => match (label, stage) {
                (PatchLabel::TestPatch, Stage::FixPatch) => {
                    String::from("apply_test_patch_failed_fix_phase")
                }
                (label, _) => format!("apply_{label}_failed"),
            },
        }
    }
}

/// The note recorded when every stage was attempted.
pub const NOTE_OK: &str = "ok";

/// One ledger row: the outcome of validating one task.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidationResult {
    pub repo: RepoId,

    pub base_commit: Revision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    pub baseline: StageOutcome,

    pub test_patch: StageOutcome,

    pub fix_patch: StageOutcome,

    /// `ok`, or the note identifying the step that failed.
    pub note: String,
}

impl ValidationResult {
    /// A result with every stage skipped; stages are filled in as they run.
    pub fn new(repo: RepoId, base_commit: Revision, instance_id: Option<String>) -> Self {
        Self {
            repo,
            base_commit,
            instance_id,
            baseline: StageOutcome::Skip,
            test_patch: StageOutcome::Skip,
            fix_patch: StageOutcome::Skip,
            note: String::from(NOTE_OK),
        }
    }

    /// The resume key for this result.
    pub fn key(&self) -> (RepoId, Revision) {
        (self.repo.clone(), self.base_commit.clone())
    }

    pub fn outcome(&self, stage: Stage) -> StageOutcome {
        match stage {
            Stage::Baseline => self.baseline,
            Stage::TestPatch => self.test_patch,
            Stage::FixPatch => self.fix_patch,
        }
    }

    pub fn record(&mut self, stage: Stage, outcome: StageOutcome) {
        match stage {
            Stage::Baseline => self.baseline = outcome,
            Stage::TestPatch => self.test_patch = outcome,
            Stage::FixPatch => self.fix_patch = outcome,
        }
    }

    /// Record an infrastructure failure: `ERROR` for `stage`, `SKIP` for every
    /// later stage, and the failure's note.
    pub fn short_circuit(&mut self, stage: Stage, failure: &Failure) {
        self.record(stage, StageOutcome::Error);
        for later in stage.following() {
            self.record(later, StageOutcome::Skip);
        }
        self.note = failure.note(stage);
    }

    /// Whether every stage was attempted without infrastructure failure.
    pub fn is_ok(&self) -> bool {
        self.note == NOTE_OK
    }

    /// The oracle expectation: tests fail without the fix and pass with it.
    pub fn is_resolved(&self) -> bool {
        self.test_patch == StageOutcome::Fail && self.fix_patch == StageOutcome::Pass
    }
}

impl Display for ValidationResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            cformat!("<cyan>baseline:</>"),
            self.baseline.colored(),
            cformat!("<cyan>test_patch:</>"),
            self.test_patch.colored(),
            cformat!("<cyan>fix_patch:</>"),
            self.fix_patch.colored(),
            cformat!("<cyan>note:</>"),
            self.note,
        )
    }
}
