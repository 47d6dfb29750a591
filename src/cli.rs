use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "qa-judge",
    version,
    about = "Score and convert QA predictions against cached human Likert judgments"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert the human judgment cache into classifier training records.
    Convert(ConvertArgs),
    /// Score model predictions against the human judgment cache.
    Evaluate(EvaluateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Human judgment cache snapshot (JSON).
    pub cache: PathBuf,

    /// Original dataset used to backfill gold answers.
    pub dataset: PathBuf,

    /// Output file for the classifier dataset.
    pub output: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long)]
    pub predictions_file_path: PathBuf,

    /// Human judgment cache snapshot (JSON).
    #[arg(long)]
    pub answers_file_path: PathBuf,

    /// Metrics file to produce.
    #[arg(long)]
    pub output_file_path: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}
