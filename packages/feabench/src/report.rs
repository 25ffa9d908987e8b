//! Summary statistics over validation results.

use std::{collections::BTreeMap, io::Write};

use color_eyre::Result;
use color_print::cwriteln;
use serde::{Deserialize, Serialize};

use crate::outcome::{NOTE_OK, Stage, StageOutcome, ValidationResult};

/// Outcome counts for one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StageCounts {
    pub pass: usize,
    pub fail: usize,
    pub error: usize,
    pub skip: usize,
}

impl StageCounts {
    fn add(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Pass => self.pass += 1,
            StageOutcome::Fail => self.fail += 1,
            StageOutcome::Error => self.error += 1,
            StageOutcome::Skip => self.skip += 1,
        }
    }

    pub fn get(&self, outcome: StageOutcome) -> usize {
        match outcome {
            StageOutcome::Pass => self.pass,
            StageOutcome::Fail => self.fail,
            StageOutcome::Error => self.error,
            StageOutcome::Skip => self.skip,
        }
    }
}

/// Aggregate of a set of validation results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Summary {
    pub total: usize,

    pub baseline: StageCounts,

    pub test_patch: StageCounts,

    pub fix_patch: StageCounts,

    /// Tasks whose tests fail with the test patch and pass with the fix.
    pub resolved: usize,

    /// Occurrences of every failure note; `ok` rows are not counted.
    pub notes: BTreeMap<String, usize>,
}

impl Summary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ValidationResult>) -> Self {
        let mut summary = Self::default();
        for result in results {
            summary.total += 1;
            summary.baseline.add(result.baseline);
            summary.test_patch.add(result.test_patch);
            summary.fix_patch.add(result.fix_patch);
            if result.is_resolved() {
                summary.resolved += 1;
            }
            if result.note != NOTE_OK {
                *summary.notes.entry(result.note.clone()).or_default() += 1;
            }
        }
        summary
    }

    pub fn stage(&self, stage: Stage) -> &StageCounts {
        match stage {
            Stage::Baseline => &self.baseline,
            Stage::TestPatch => &self.test_patch,
            Stage::FixPatch => &self.fix_patch,
        }
    }

    /// `n` as a percentage of the total; zero when there are no results.
    pub fn percent(&self, n: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * n as f64 / self.total as f64
        }
    }

    /// Human readable summary for the terminal.
    pub fn write_text<W: Write>(&self, mut w: W) -> Result<()> {
        cwriteln!(w, "<bold>Total tasks:</> {}", self.total)?;
        for stage in Stage::ALL {
            writeln!(w)?;
            cwriteln!(w, "<bold,underline>{}</> ({})", stage_title(stage), stage_detail(stage))?;
            let counts = self.stage(stage);
            for outcome in StageOutcome::ALL {
                let n = counts.get(outcome);
                if outcome == StageOutcome::Skip && stage == Stage::Baseline {
                    continue;
                }
                writeln!(w, "  {}: {n:>4} ({:.1}%)", outcome.colored(), self.percent(n))?;
            }
        }

        writeln!(w)?;
        cwriteln!(
            w,
            "<bold>Resolved</> (test_patch FAIL, fix_patch PASS): {} ({:.1}%)",
            self.resolved,
            self.percent(self.resolved)
        )?;

        if !self.notes.is_empty() {
            writeln!(w)?;
            cwriteln!(w, "<bold>Failure notes</>")?;
            for (note, n) in &self.notes {
                writeln!(w, "  {note}: {n}")?;
            }
        }
        Ok(())
    }

    /// Markdown table, one row per stage.
    pub fn write_markdown<W: Write>(&self, mut w: W) -> Result<()> {
        writeln!(w, "# FEA-Bench Validation Summary")?;
        writeln!(w)?;
        writeln!(w, "Total tasks: {}", self.total)?;
        writeln!(w)?;
        writeln!(w, "| Stage | PASS | FAIL | ERROR | SKIP |")?;
        writeln!(w, "|-------|------|------|-------|------|")?;
        for stage in Stage::ALL {
            let counts = self.stage(stage);
            write!(w, "| {stage} |")?;
            for outcome in StageOutcome::ALL {
                let n = counts.get(outcome);
                write!(w, " {n} ({:.1}%) |", self.percent(n))?;
            }
            writeln!(w)?;
        }
        writeln!(w)?;
        writeln!(
            w,
            "Resolved: {} ({:.1}%)",
            self.resolved,
            self.percent(self.resolved)
        )?;

        if !self.notes.is_empty() {
            writeln!(w)?;
            writeln!(w, "| Note | Count |")?;
            writeln!(w, "|------|-------|")?;
            for (note, n) in &self.notes {
                writeln!(w, "| {note} | {n} |")?;
            }
        }
        Ok(())
    }

    pub fn write_json<W: Write>(&self, w: W) -> Result<()> {
        serde_json::to_writer_pretty(w, self)?;
        Ok(())
    }
}

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Baseline => "Baseline",
        Stage::TestPatch => "Test Patch",
        Stage::FixPatch => "Fix Patch",
    }
}

fn stage_detail(stage: Stage) -> &'static str {
    match stage {
        Stage::Baseline => "base commit only",
        Stage::TestPatch => "base + test_patch",
        Stage::FixPatch => "base + test_patch + fix_patch",
    }
}
