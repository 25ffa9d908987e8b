//! Validate tasks through the three cumulative stages.

use std::{
    fs::read_to_string,
    io::stdout,
    path::{Path, PathBuf},
};

use clap::Args;
use color_eyre::{
    Result,
    eyre::{Context, bail},
};
use color_print::cprintln;
use feabench::{
    Dataset, Ledger, Orchestrator, Task, Workspace,
    config::Config as Settings,
    environment::EnvironmentBuilder,
    generate::{ArtifactKind, artifact_path},
    patch::Patch,
    repo::Registry,
    runner::TestRunner,
};

/// Ledger file name inside a `--patches` directory.
const PATCH_LEDGER: &str = "validation.jsonl";

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Dataset root containing `index.csv`; overrides `paths.dataset`.
    #[arg(long, env = "FEABENCH_DATASET")]
    dataset: Option<PathBuf>,

    /// Directory holding the repository clones; overrides `paths.repos`.
    #[arg(long, env = "FEABENCH_REPOS")]
    repos: Option<PathBuf>,

    /// Ledger the results are appended to; overrides `paths.ledger`.
    ///
    /// With `--patches`, defaults to `<DIR>/validation.jsonl` so generated
    /// patches are neither resumed from nor recorded in the dataset ledger.
    #[arg(long, env = "FEABENCH_LEDGER")]
    ledger: Option<PathBuf>,

    /// Stop after this many distinct repositories have been processed.
    #[arg(long, env = "MAX_REPOS")]
    max_repos: Option<usize>,

    /// Validate generated patches from this directory instead of the dataset's fix patches.
    ///
    /// Each task's fix patch is read from `<DIR>/<owner>__<name>/<instance_id>.patch`;
    /// tasks without one are skipped.
    #[arg(long, value_name = "DIR")]
    patches: Option<PathBuf>,
}

pub fn main(config: Config, settings: Settings) -> Result<()> {
    let dataset = Dataset::new(config.dataset.unwrap_or(settings.paths.dataset));
    let repos = config.repos.unwrap_or(settings.paths.repos);
    let ledger = config
        .ledger
        .or_else(|| config.patches.as_ref().map(|dir| dir.join(PATCH_LEDGER)))
        .unwrap_or(settings.paths.ledger);
    let ledger = Ledger::new(ledger);

    let mut tasks = dataset.load()?;
    if let Some(dir) = &config.patches {
        tasks = with_generated_patches(tasks, dir)?;
    }
    if tasks.is_empty() {
        bail!("no tasks to validate in {:?}", dataset.root());
    }

    cprintln!("<bold,underline>Validation</>");
    cprintln!("  <cyan>Dataset:</> {}", dataset.root().display());
    cprintln!("  <cyan>Repositories:</> {}", repos.display());
    cprintln!("  <cyan>Ledger:</> {}", ledger.path().display());
    cprintln!("  <cyan>Tasks:</> {}", tasks.len());
    if let Some(max) = config.max_repos {
        cprintln!("  <cyan>Repository cap:</> {}", max);
    }
    if let Some(dir) = &config.patches {
        cprintln!("  <cyan>Fix patches from:</> {}", dir.display());
    }
    println!();

    let workspace = Workspace::new(
        Registry::new(repos, settings.git),
        EnvironmentBuilder::new(settings.environment),
        TestRunner::new(settings.tests),
    );
    let mut orchestrator = Orchestrator::builder()
        .sandbox(workspace)
        .ledger(ledger)
        .maybe_max_repos(config.max_repos)
        .build();

    let mut done = 0;
    let run = orchestrator.run(&tasks, |task, result| {
        done += 1;
        cprintln!("<green,bold>Validated</> [{}] <bold>{}</> {}", done, task.name(), result);
    })?;

    println!();
    if run.resumed > 0 {
        cprintln!("<dim>Skipped {} task(s) already in the ledger.</>", run.resumed);
    }
    if run.duplicates > 0 {
        cprintln!("<dim>Skipped {} duplicate task(s).</>", run.duplicates);
    }
    if run.capped {
        cprintln!("<yellow>Stopped at the repository cap.</>");
    }
    run.summary().write_text(stdout().lock())
}

/// Replace every task's fix patch with the generated one; drop tasks without one.
fn with_generated_patches(tasks: Vec<Task>, dir: &Path) -> Result<Vec<Task>> {
    let mut kept = Vec::with_capacity(tasks.len());
    for mut task in tasks {
        let path = artifact_path(dir, &task.repo, &task.name(), ArtifactKind::Patch);
        if !path.is_file() {
            tracing::warn!(instance = %task.name(), ?path, "no generated patch, skipping");
            continue;
        }
        let text = read_to_string(&path).with_context(|| format!("read patch {path:?}"))?;
        task.fix_patch = Patch::new(text);
        kept.push(task);
    }
    tracing::info!(kept = kept.len(), ?dir, "using generated fix patches");
    Ok(kept)
}
