//! Summarize a validation ledger.

use std::{
    fs::File,
    io::{BufWriter, Write, stdout},
    path::PathBuf,
};

use clap::{Args, ValueEnum};
use color_eyre::{
    Section,
    eyre::{Result, WrapErr, eyre},
};
use feabench::{Ledger, ValidationResult, config::Config as Settings, report::Summary};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Markdown,
    Json,
}

#[derive(Args, Clone, Debug)]
pub struct Config {
    /// Validation ledger to summarize; defaults to `paths.ledger`.
    #[arg(short, long, env = "FEABENCH_LEDGER")]
    input: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    format: Format,

    /// Write the report to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn main(config: Config, settings: Settings) -> Result<()> {
    let ledger = Ledger::<ValidationResult>::new(config.input.unwrap_or(settings.paths.ledger));
    if !ledger.exists() {
        return Err(eyre!("ledger not found: {:?}", ledger.path()))
            .suggestion("Run `feabench validate` first, or pass the ledger with `--input`.");
    }

    let results = ledger.read()?;
    let summary = Summary::from_results(&results);

    match config.output {
        Some(path) => {
            let file = File::create(&path).with_context(|| format!("create {path:?}"))?;
            let mut out = BufWriter::new(file);
            write(&summary, config.format, &mut out)?;
            out.flush().with_context(|| format!("write {path:?}"))?;
            tracing::info!(?path, "wrote report");
            Ok(())
        }
        None => write(&summary, config.format, stdout().lock()),
    }
}

fn write(summary: &Summary, format: Format, mut out: impl Write) -> Result<()> {
    match format {
        Format::Text => summary.write_text(out),
        Format::Markdown => summary.write_markdown(out),
        Format::Json => {
            summary.write_json(&mut out)?;
            writeln!(out)?;
            Ok(())
        }
    }
}
