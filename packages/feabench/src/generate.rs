//! Batch generation of implementation documents and patches.
//!
//! Each processed task produces one [`GenerationRecord`] in an append-only
//! ledger, whether or not generation succeeded. A failure for one task (a
//! network error, a response without a diff, a missing plan document) is
//! recorded on that task's record and the batch moves on.

use std::{
    collections::HashSet,
    fmt::{self, Display, Formatter},
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

use bon::Builder;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};

use crate::{
    dataset::Task,
    ledger::Ledger,
    llm::Model,
    patch::extract_patch,
    prompt::{Role, document_prompt, task_prompt},
    repo::{RepoId, Revision},
};

/// Which generation pipeline to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Patch straight from the task description.
    Baseline,

    /// Implementation plan from the task description.
    Document,

    /// Patch from a previously generated implementation plan.
    Code,
}

derive_display_from_serialize!(Mode);
derive_fromstr_from_deserialize!(Mode);

impl Mode {
    pub fn role(self) -> Role {
        match self {
            Mode::Baseline => Role::Coder,
            Mode::Document => Role::Documenter,
            Mode::Code => Role::DocumentCoder,
        }
    }

    pub fn kind(self) -> ArtifactKind {
        match self {
            Mode::Baseline | Mode::Code => ArtifactKind::Patch,
            Mode::Document => ArtifactKind::Document,
        }
    }
}

/// What a generation run writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Patch,
    Document,
}

derive_display_from_serialize!(ArtifactKind);

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Patch => "patch",
            ArtifactKind::Document => "txt",
        }
    }
}

/// Where the artifact for an instance lives: `<dir>/<owner>__<name>/<instance>.<ext>`.
pub fn artifact_path(dir: &Path, repo: &RepoId, instance: &str, kind: ArtifactKind) -> PathBuf {
    dir.join(repo.slug())
        .join(format!("{instance}.{}", kind.extension()))
}

/// One generation ledger line.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GenerationRecord {
    pub instance_id: String,

    pub repo: RepoId,

    pub base_commit: Revision,

    pub timestamp: DateTime<Utc>,

    pub model: String,

    pub kind: ArtifactKind,

    pub generated: bool,

    pub path: Option<PathBuf>,

    pub error: Option<String>,
}

/// Counts for one generation run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerationSummary {
    pub processed: usize,
    pub generated: usize,
    pub failed: usize,
    /// Already generated by an earlier run.
    pub skipped: usize,
}

impl Display for GenerationSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let pct = |n: usize| {
            if self.processed == 0 {
                0.0
            } else {
                100.0 * n as f64 / self.processed as f64
            }
        };
        writeln!(f, "Processed: {}", self.processed)?;
        writeln!(f, "Generated: {} ({:.1}%)", self.generated, pct(self.generated))?;
        writeln!(f, "Failed:    {} ({:.1}%)", self.failed, pct(self.failed))?;
        write!(f, "Skipped:   {}", self.skipped)
    }
}

/// Runs one generation mode over a list of tasks.
#[derive(Builder)]
pub struct Generator<'a> {
    model: &'a dyn Model,

    mode: Mode,

    /// Root directory artifacts are written under.
    #[builder(into)]
    output: PathBuf,

    ledger: Ledger<GenerationRecord>,

    /// Root directory of plan documents; required by [`Mode::Code`].
    #[builder(into)]
    documents: Option<PathBuf>,

    /// Skip instances the ledger already records as generated.
    #[builder(default)]
    resume: bool,
}

impl Generator<'_> {
    /// Process every task in order, appending one record per processed task.
    #[tracing::instrument(skip_all, fields(mode = %self.mode, model = self.model.name()))]
    pub fn run(&self, tasks: &[Task]) -> Result<GenerationSummary> {
        if self.mode == Mode::Code && self.documents.is_none() {
            bail!("mode `code` needs a documents directory");
        }

        let done = if self.resume {
            self.generated_before()?
        } else {
            HashSet::new()
        };

        let mut summary = GenerationSummary::default();
        for (index, task) in tasks.iter().enumerate() {
            let name = task.name();
            if done.contains(&name) {
                tracing::debug!(instance = %name, "already generated, skipping");
                summary.skipped += 1;
                continue;
            }

            tracing::info!(
                instance = %name,
                repo = %task.repo,
                base_commit = %task.base_commit,
                "[{}/{}] generating {}",
                index + 1,
                tasks.len(),
                self.mode.kind(),
            );
            let record = self.process(task);
            self.ledger.append(&record)?;

            summary.processed += 1;
            if record.generated {
                summary.generated += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    fn generated_before(&self) -> Result<HashSet<String>> {
        let kind = self.mode.kind();
        Ok(self
            .ledger
            .read()?
            .into_iter()
            .filter(|record| record.generated && record.kind == kind)
            .map(|record| record.instance_id)
            .collect())
    }

    fn process(&self, task: &Task) -> GenerationRecord {
        let (generated, path, error) = match self.generate(task) {
            Ok(path) => (true, Some(path), None),
            Err(error) => {
                tracing::warn!(instance = %task.name(), "generation failed: {error:#}");
                (false, None, Some(format!("{error:#}")))
            }
        };

        GenerationRecord {
            instance_id: task.name(),
            repo: task.repo.clone(),
            base_commit: task.base_commit.clone(),
            timestamp: Utc::now(),
            model: self.model.name().to_string(),
            kind: self.mode.kind(),
            generated,
            path,
            error,
        }
    }

    fn generate(&self, task: &Task) -> Result<PathBuf> {
        let role = self.mode.role();
        let prompt = match self.mode {
            Mode::Baseline | Mode::Document => task_prompt(&task.context, role),
            Mode::Code => document_prompt(&self.document(task)?),
        };

        let response = self.model.generate(role.system_instruction(), &prompt)?;
        let content = match self.mode.kind() {
            ArtifactKind::Patch => extract_patch(&response)
                .ok_or_else(|| eyre!("response contained no diff header"))?
                .to_string(),
            ArtifactKind::Document => response,
        };

        let path = artifact_path(&self.output, &task.repo, &task.name(), self.mode.kind());
        if let Some(parent) = path.parent() {
            create_dir_all(parent).with_context(|| format!("create directory {parent:?}"))?;
        }
        write(&path, content).with_context(|| format!("write {path:?}"))?;
        Ok(path)
    }

    /// The plan document for `task` written by an earlier document run.
    fn document(&self, task: &Task) -> Result<String> {
        let dir = self
            .documents
            .as_deref()
            .ok_or_else(|| eyre!("no documents directory"))?;
        let path = artifact_path(dir, &task.repo, &task.name(), ArtifactKind::Document);
        if !path.is_file() {
            bail!("document not found: {path:?}");
        }
        let document = read_to_string(&path).with_context(|| format!("read {path:?}"))?;
        if document.trim().is_empty() {
            bail!("empty document at {path:?}");
        }
        Ok(document)
    }
}
