use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "clustercheck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML config file. Defaults to $CLUSTERCHECK_CONFIG or checker.yml.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Enables debug logging.
    #[arg(short, long)]
    pub debug: bool,
    /// Number of checks to run at once.
    #[arg(short, long)]
    pub jobs: Option<usize>,
    /// Default timeout in seconds for checks that do not set one.
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
    /// Output format of the reports.
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum Format {
    Text,
    Json,
}
