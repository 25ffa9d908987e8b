//! Loading benchmark tasks from the dataset on disk.
//!
//! Layout:
//!
//! ```text
//! <root>/index.csv                                   column `repo_folder`
//! <root>/<repo_folder>/instances/<id>/oracle_lite.json
//! ```
//!
//! Each `oracle_lite.json` holds a `features` object describing one instance.
//! Instances that cannot be read or lack a repository or base revision are
//! logged and skipped; one bad instance never fails the whole load.

use std::{
    collections::HashSet,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use color_eyre::{
    Result, Section,
    eyre::{Context as _, eyre},
};
use serde::{Deserialize, Deserializer, Serialize};
use walkdir::WalkDir;

use crate::{
    ledger::TaskKey,
    patch::{Patch, PatchLabel},
    repo::{RepoId, Revision},
    runner::TestCommand,
};

/// Name of the index file at the dataset root.
pub const INDEX_FILE: &str = "index.csv";

/// Name of the per-instance metadata file.
pub const INSTANCE_FILE: &str = "oracle_lite.json";

/// A named text file excerpt (readme or source file).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Document {
    pub file: String,
    pub content: String,
}

/// A component the feature is expected to introduce.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub signature: String,
    pub doc: String,
}

/// New components grouped by the file they belong to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NewComponents {
    pub file: String,
    pub components: Vec<Component>,
}

/// Free-text descriptions and repository excerpts for prompting.
///
/// Explicit `null`s in the dataset read as empty values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Context {
    #[serde(deserialize_with = "nullable")]
    pub pull_request_text: String,

    #[serde(deserialize_with = "nullable")]
    pub issue_text: String,

    #[serde(rename = "natural-brief", deserialize_with = "nullable")]
    pub natural_brief: String,

    #[serde(rename = "natural-detailed", deserialize_with = "nullable")]
    pub natural_detailed: String,

    #[serde(deserialize_with = "nullable")]
    pub readmes: Vec<Document>,

    #[serde(deserialize_with = "nullable")]
    pub files: Vec<Document>,

    #[serde(deserialize_with = "nullable")]
    pub new_components: Vec<NewComponents>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The `features` object of an instance file, as stored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct Features {
    instance_id: Option<String>,
    repo: Option<String>,
    base_commit: Option<String>,
    test_patch: Option<String>,
    patch: Option<String>,
    #[serde(flatten)]
    context: Context,
}

#[derive(Debug, Deserialize)]
struct InstanceFile {
    features: Features,
}

#[derive(Debug, Deserialize)]
struct IndexRow {
    repo_folder: String,
}

/// One benchmark instance.
#[derive(Clone, Debug)]
pub struct Task {
    pub instance_id: Option<String>,

    pub repo: RepoId,

    pub base_commit: Revision,

    /// Adds or modifies tests only.
    pub test_patch: Patch,

    /// Implements the feature.
    pub fix_patch: Patch,

    pub test_command: TestCommand,

    pub context: Context,
}

impl Task {
    /// Build a task; the test command is derived from the test patch.
    pub fn new(repo: RepoId, base_commit: Revision, test_patch: Patch, fix_patch: Patch) -> Self {
        let test_command = TestCommand::from_test_patch(&test_patch);
        Self {
            instance_id: None,
            repo,
            base_commit,
            test_patch,
            fix_patch,
            test_command,
            context: Context::default(),
        }
    }

    pub fn key(&self) -> TaskKey {
        (self.repo.clone(), self.base_commit.clone())
    }

    pub fn patch(&self, label: PatchLabel) -> &Patch {
        match label {
            PatchLabel::TestPatch => &self.test_patch,
            PatchLabel::FixPatch => &self.fix_patch,
        }
    }

    /// The instance id, or `<owner>__<name>-<base>` when the dataset has none.
    pub fn name(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.repo.slug(), self.base_commit))
    }

    /// Parse one instance file. `Ok(None)` when mandatory fields are missing.
    pub fn from_instance_file(path: &Path) -> Result<Option<Self>> {
        let content = read_to_string(path).with_context(|| format!("read {path:?}"))?;
        let instance = serde_json::from_str::<InstanceFile>(&content)
            .with_context(|| format!("parse {path:?}"))?;
        let features = instance.features;

        let (Some(repo), Some(base_commit)) = (features.repo, features.base_commit) else {
            return Ok(None);
        };
        let repo = repo.parse::<RepoId>().with_context(|| format!("in {path:?}"))?;
        let base_commit = base_commit
            .parse::<Revision>()
            .with_context(|| format!("in {path:?}"))?;

        let mut task = Self::new(
            repo,
            base_commit,
            Patch::new(features.test_patch.unwrap_or_default()),
            Patch::new(features.patch.unwrap_or_default()),
        );
        task.instance_id = features.instance_id.filter(|id| !id.trim().is_empty());
        task.context = features.context;
        Ok(Some(task))
    }
}

/// The dataset rooted at a directory containing `index.csv`.
#[derive(Clone, Debug)]
pub struct Dataset {
    root: PathBuf,
}

impl Dataset {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Repository folders listed in the index, resolved against the root.
    pub fn folders(&self) -> Result<Vec<PathBuf>> {
        let index = self.root.join(INDEX_FILE);
        if !index.exists() {
            return Err(eyre!("dataset index not found: {index:?}")).suggestion(
                "Point `--dataset` (or `paths.dataset` in feabench.toml) at the directory holding index.csv",
            );
        }

        let mut reader =
            csv::Reader::from_path(&index).with_context(|| format!("open {index:?}"))?;
        reader
            .deserialize::<IndexRow>()
            .map(|row| {
                let row = row.with_context(|| format!("read {index:?}"))?;
                Ok(self.root.join(row.repo_folder.trim()))
            })
            .collect()
    }

    /// Every task in the dataset, folder by folder, instances in sorted order.
    #[tracing::instrument(skip(self), fields(root = ?self.root))]
    pub fn load(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for folder in self.folders()? {
            let instances = folder.join("instances");
            if !instances.is_dir() {
                tracing::warn!(?instances, "instances directory not found");
                continue;
            }

            let dirs = WalkDir::new(&instances)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) if entry.file_type().is_dir() => Some(entry.into_path()),
                    Ok(_) => None,
                    Err(error) => {
                        tracing::warn!(%error, "skipping unreadable entry");
                        None
                    }
                });

            for dir in dirs {
                let file = dir.join(INSTANCE_FILE);
                if !file.exists() {
                    tracing::debug!(?dir, "no instance file");
                    continue;
                }
                match Task::from_instance_file(&file) {
                    Ok(Some(task)) => tasks.push(task),
                    Ok(None) => tracing::warn!(?file, "missing repo or base_commit, skipping"),
                    Err(error) => tracing::warn!(?file, "skipping instance: {error:#}"),
                }
            }
        }

        tracing::info!(count = tasks.len(), "loaded tasks");
        Ok(tasks)
    }
}

/// Keep only tasks whose pair is in `successful`; `None` keeps everything.
pub fn retain_successful(tasks: Vec<Task>, successful: Option<&HashSet<TaskKey>>) -> Vec<Task> {
    let Some(successful) = successful else {
        return tasks;
    };
    let before = tasks.len();
    let kept = tasks
        .into_iter()
        .filter(|task| successful.contains(&task.key()))
        .collect::<Vec<_>>();
    tracing::info!(
        filtered = before - kept.len(),
        kept = kept.len(),
        "filtered tasks by fix_patch success"
    );
    kept
}
