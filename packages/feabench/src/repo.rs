//! Local working copies of the repositories under evaluation.
//!
//! The [`Registry`] owns the directory holding every clone and hands out
//! [`WorkingCopy`] handles; all mutation of a working copy goes through a
//! handle. Working copies are reused across tasks that target the same
//! repository, so [`WorkingCopy::reset_to`] must restore a pristine tree every
//! time it is called.

use std::{
    collections::HashMap,
    fs::remove_dir_all,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
    thread,
    time::Duration,
};

use color_eyre::eyre::{Report, bail};
use derive_more::Display;
use regex::Regex;
use serde_plain::{derive_deserialize_from_fromstr, derive_serialize_from_display};

use crate::{
    config::GitConfig,
    outcome::Failure,
    process::{Invocation, Output},
};

/// Lines of git output kept in failure details.
const DETAIL_LINES: usize = 20;

static REPO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").expect("valid regex"));

/// A repository identifier in `owner/name` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct RepoId(String);

impl RepoId {
    pub fn owner(&self) -> &str {
        self.split().0
    }

    pub fn name(&self) -> &str {
        self.split().1
    }

    /// The flattened form used for directory names: `owner__name`.
    pub fn slug(&self) -> String {
        format!("{}__{}", self.owner(), self.name())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn split(&self) -> (&str, &str) {
        // Validated on construction to contain exactly one slash.
        self.0.split_once('/').unwrap_or((&self.0, ""))
    }
}

impl FromStr for RepoId {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !REPO_ID.is_match(s) || s.split('/').any(|part| part == "." || part == "..") {
            bail!("invalid repository id {s:?}: expected `owner/name`");
        }
        Ok(Self(s.to_string()))
    }
}

derive_deserialize_from_fromstr!(RepoId, "a repository id in `owner/name` form");
derive_serialize_from_display!(RepoId);

/// A revision (usually a full commit hash) to check out.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct Revision(String);

impl Revision {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Revision {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty revision");
        }
        if s.starts_with('-') || s.chars().any(char::is_whitespace) {
            bail!("invalid revision {s:?}");
        }
        Ok(Self(s.to_string()))
    }
}

derive_deserialize_from_fromstr!(Revision, "a git revision");
derive_serialize_from_display!(Revision);

/// Owns the local clones of every repository referenced by the run.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    git: GitConfig,
    copies: HashMap<RepoId, WorkingCopy>,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>, git: GitConfig) -> Self {
        Self {
            root: root.into(),
            git,
            copies: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory a repository is (or will be) cloned into.
    pub fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.root.join(repo.slug())
    }

    /// The URL a repository is cloned from.
    pub fn remote_url(&self, repo: &RepoId) -> String {
        let base = self.git.remote_base.trim_end_matches('/');
        let suffix = if self.git.remote_suffix { ".git" } else { "" };
        format!("{base}/{}{suffix}", repo.as_str())
    }

    /// Return the working copy for `repo`, cloning it first if needed.
    ///
    /// Cloning is retried up to the configured number of attempts with
    /// exponential backoff; anything left behind by a failed attempt is
    /// removed so the next attempt (or the next run) starts clean. A non-empty
    /// directory without `.git` at the clone path is never touched.
    #[tracing::instrument(skip(self), fields(repo = %repo))]
    pub fn ensure_cloned(&mut self, repo: &RepoId) -> Result<WorkingCopy, Failure> {
        if let Some(copy) = self.copies.get(repo) {
            return Ok(copy.clone());
        }

        let path = self.path_for(repo);
        let copy = WorkingCopy {
            repo: repo.clone(),
            path: path.clone(),
            git: self.git.clone(),
        };

        if path.join(".git").exists() {
            tracing::info!(?path, "repository already cloned");
            self.copies.insert(repo.clone(), copy.clone());
            return Ok(copy);
        }

        if path.read_dir().is_ok_and(|mut entries| entries.next().is_some()) {
            tracing::error!(?path, "directory exists but is not a git repository");
            return Err(Failure::CloneFailed {
                repo: repo.clone(),
                detail: format!("{path:?} exists but is not a git repository; remove it to clone"),
            });
        }

        if let Err(error) = std::fs::create_dir_all(&self.root) {
            return Err(Failure::CloneFailed {
                repo: repo.clone(),
                detail: format!("create {:?}: {error}", self.root),
            });
        }

        let url = self.remote_url(repo);
        let attempts = self.git.clone_attempts.max(1);
        let mut detail = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.git.backoff(attempt - 1);
                tracing::warn!(attempt, ?delay, "retrying clone");
                thread::sleep(delay);
            }

            remove_partial_clone(&path);
            tracing::info!(%url, ?path, "cloning repository");
            match Invocation::new("git", &self.root)
                .args(["clone", "--quiet", "--", url.as_str()])
                .arg(repo.slug())
                .timeout(self.git.clone_timeout())
                .run()
            {
                Ok(output) if output.success() => {
                    self.copies.insert(repo.clone(), copy.clone());
                    return Ok(copy);
                }
                Ok(output) => detail = describe(&output),
                Err(error) => detail = format!("{error:#}"),
            }
        }

        remove_partial_clone(&path);
        tracing::error!(%detail, "clone failed");
        Err(Failure::CloneFailed {
            repo: repo.clone(),
            detail,
        })
    }
}

fn remove_partial_clone(path: &Path) {
    if path.exists()
        && let Err(error) = remove_dir_all(path)
    {
        tracing::warn!(?error, ?path, "remove partial clone");
    }
}

/// Handle to one repository's working copy.
#[derive(Clone, Debug)]
pub struct WorkingCopy {
    repo: RepoId,
    path: PathBuf,
    git: GitConfig,
}

impl WorkingCopy {
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timeout for git operations on this working copy.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.git.command_timeout()
    }

    /// Make the working copy identical to a fresh checkout of `revision`.
    ///
    /// Tracked content is forced to `revision` (local commits and changes are
    /// discarded), then every untracked and ignored file is deleted, including
    /// nested repositories and the isolated environment.
    #[tracing::instrument(skip(self), fields(repo = %self.repo, revision = %revision))]
    pub fn reset_to(&self, revision: &Revision) -> Result<(), Failure> {
        let reset = self.git(["reset", "--hard", "--quiet", revision.as_str()]);
        let clean = || self.git(["clean", "-ffdxq"]);
        reset
            .and_then(|_| clean())
            .map(drop)
            .map_err(|detail| Failure::ResetFailed {
                revision: revision.clone(),
                detail,
            })
    }

    /// Run git in the working copy; `Err` carries a description of the failure.
    fn git<const N: usize>(&self, args: [&str; N]) -> Result<Output, String> {
        let output = Invocation::new("git", &self.path)
            .args(args)
            .timeout(self.git.command_timeout())
            .run()
            .map_err(|error| format!("{error:#}"))?;
        if output.success() {
            Ok(output)
        } else {
            Err(describe(&output))
        }
    }
}

fn describe(output: &Output) -> String {
    format!("{}: {}", output.describe(), output.tail(DETAIL_LINES))
}
