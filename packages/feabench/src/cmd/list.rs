//! List the tasks in the dataset.

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;
use color_print::cprintln;
use feabench::{Dataset, config::Config as Settings};
use itertools::Itertools;

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Dataset root containing `index.csv`; overrides `paths.dataset`.
    #[arg(long, env = "FEABENCH_DATASET")]
    dataset: Option<PathBuf>,

    /// Also show the test command of each task.
    #[arg(short, long)]
    verbose: bool,
}

pub fn main(config: Config, settings: Settings) -> Result<()> {
    let dataset = Dataset::new(config.dataset.unwrap_or(settings.paths.dataset));
    let tasks = dataset.load()?;

    if tasks.is_empty() {
        println!("No tasks found in {}", dataset.root().display());
        return Ok(());
    }

    cprintln!("<bold>{}</> task(s) in {}:", tasks.len(), dataset.root().display());
    for (repo, group) in &tasks.iter().chunk_by(|task| &task.repo) {
        println!();
        cprintln!("<bold,underline>{}</>", repo);
        for task in group {
            let base = task.base_commit.as_str();
            cprintln!(
                "  {} <dim>{}</>",
                task.name(),
                base.get(..12).unwrap_or(base)
            );
            if config.verbose {
                cprintln!("    <cyan>test command:</> {}", task.test_command);
            }
        }
    }
    Ok(())
}
