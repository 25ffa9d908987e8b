//! Generate implementation plans or patches with a hosted model.

use std::path::PathBuf;

use clap::Args;
use color_eyre::{Result, Section, eyre::bail};
use color_print::cprintln;
use feabench::{
    Dataset, Ledger, ValidationResult,
    config::Config as Settings,
    dataset::retain_successful,
    generate::{Generator, Mode},
    llm::{HttpModel, Model, Provider},
};

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// What to generate.
    #[arg(short, long, value_enum)]
    mode: Mode,

    /// Model provider; overrides `llm.provider`.
    #[arg(long)]
    provider: Option<Provider>,

    /// Model name; overrides `llm.model`.
    #[arg(long)]
    model: Option<String>,

    /// Dataset root containing `index.csv`; overrides `paths.dataset`.
    #[arg(long, env = "FEABENCH_DATASET")]
    dataset: Option<PathBuf>,

    /// Directory artifacts are written to.
    ///
    /// Defaults to `<paths.output>/<mode>`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory of implementation plans written by `--mode document`; required by `--mode code`.
    #[arg(long)]
    documents: Option<PathBuf>,

    /// Generation ledger; defaults to `generation.jsonl` in the output directory.
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Process at most this many tasks.
    #[arg(long)]
    limit: Option<usize>,

    /// Skip instances the generation ledger already records as generated.
    #[arg(long)]
    resume: bool,

    /// Only process tasks whose fix patch passed validation.
    ///
    /// Reads the validation ledger at `paths.ledger`; when it does not exist
    /// every task is processed.
    #[arg(long)]
    successful_only: bool,
}

pub fn main(config: Config, settings: Settings) -> Result<()> {
    if config.mode == Mode::Code && config.documents.is_none() {
        return Err(color_eyre::eyre::eyre!("`--mode code` needs plan documents"))
            .suggestion("Run `feabench generate --mode document` first, then pass its output with `--documents`.");
    }

    let mut llm = settings.llm;
    if let Some(provider) = config.provider {
        llm.provider = provider;
        if config.model.is_none() {
            llm.model = None;
        }
    }
    if let Some(model) = config.model {
        llm.model = Some(model);
    }
    let credentials = llm.credentials()?;
    let model = HttpModel::new(&llm, credentials)?;

    let dataset = Dataset::new(config.dataset.unwrap_or(settings.paths.dataset));
    let mut tasks = dataset.load()?;
    if config.successful_only {
        let validated = Ledger::<ValidationResult>::new(&settings.paths.ledger);
        let successful = validated.successful()?;
        if successful.is_none() {
            tracing::warn!(path = ?validated.path(), "no validation ledger, processing every task");
        }
        tasks = retain_successful(tasks, successful.as_ref());
    }
    if let Some(limit) = config.limit {
        tasks.truncate(limit);
    }
    if tasks.is_empty() {
        bail!("no tasks to process in {:?}", dataset.root());
    }

    let output = config
        .output
        .unwrap_or_else(|| settings.paths.output.join(config.mode.to_string()));
    let ledger = Ledger::new(
        config
            .ledger
            .unwrap_or_else(|| output.join("generation.jsonl")),
    );

    cprintln!("<bold,underline>Generation</>");
    cprintln!("  <cyan>Mode:</> {}", config.mode);
    cprintln!("  <cyan>Model:</> {} ({})", model.name(), llm.provider);
    cprintln!("  <cyan>Tasks:</> {}", tasks.len());
    cprintln!("  <cyan>Output:</> {}", output.display());
    cprintln!("  <cyan>Ledger:</> {}", ledger.path().display());
    println!();

    let generator = Generator::builder()
        .model(&model)
        .mode(config.mode)
        .output(output)
        .ledger(ledger)
        .maybe_documents(config.documents)
        .resume(config.resume)
        .build();
    let summary = generator.run(&tasks)?;

    println!();
    cprintln!("<bold>Generation complete.</>");
    println!("{summary}");
    Ok(())
}
