//! Append-only JSON-lines ledgers.
//!
//! A ledger is never rewritten. Each record is serialized to one line and
//! written with a single `write_all` to a file opened in append mode, so a
//! crash can at worst leave a torn final line. Readers skip lines that do not
//! parse, and the next append terminates a torn line before writing.

use std::{
    collections::HashSet,
    fs::{File, OpenOptions, create_dir_all},
    io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use color_eyre::{Result, eyre::Context};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    outcome::{StageOutcome, ValidationResult},
    repo::{RepoId, Revision},
};

/// A ledger file holding records of type `T`.
#[derive(Debug, Clone)]
pub struct Ledger<T> {
    path: PathBuf,
    record: PhantomData<fn() -> T>,
}

impl<T> Ledger<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl<T: Serialize + DeserializeOwned> Ledger<T> {
    /// Every parseable record, in file order. A missing file has no records.
    #[tracing::instrument(skip(self), fields(path = ?self.path))]
    pub fn read(&self) -> Result<Vec<T>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("open ledger {:?}", self.path)),
        };

        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read ledger {:?}", self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(line = index + 1, %error, "skipping unreadable ledger line")
                }
            }
        }
        Ok(records)
    }

    /// Append one record as a single line.
    #[tracing::instrument(skip_all, fields(path = ?self.path))]
    pub fn append(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent).with_context(|| format!("create directory {parent:?}"))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("open ledger {:?}", self.path))?;

        let mut line = Vec::new();
        if !ends_with_newline(&mut file)? {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, record).context("serialize ledger record")?;
        line.push(b'\n');

        file.write_all(&line)
            .and_then(|_| file.flush())
            .with_context(|| format!("append to ledger {:?}", self.path))
    }
}

/// Whether the file is empty or its last byte is a newline.
fn ends_with_newline(file: &mut File) -> Result<bool> {
    let len = file.metadata().context("stat ledger")?.len();
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .context("read ledger tail")?;
    Ok(last[0] == b'\n')
}

/// A (repository, base revision) pair: the unit of resume.
pub type TaskKey = (RepoId, Revision);

impl Ledger<ValidationResult> {
    /// Pairs that already have a row and must not be validated again.
    pub fn completed(&self) -> Result<HashSet<TaskKey>> {
        Ok(self.read()?.iter().map(ValidationResult::key).collect())
    }

    /// Pairs whose fix patch passed; `None` when there is no ledger yet.
    pub fn successful(&self) -> Result<Option<HashSet<TaskKey>>> {
        if !self.exists() {
            tracing::warn!(path = ?self.path, "validation ledger not found, not filtering");
            return Ok(None);
        }
        let pairs = self
            .read()?
            .iter()
            .filter(|row| row.fix_patch == StageOutcome::Pass)
            .map(ValidationResult::key)
            .collect::<HashSet<_>>();
        tracing::info!(count = pairs.len(), "loaded successful instances");
        Ok(Some(pairs))
    }
}
