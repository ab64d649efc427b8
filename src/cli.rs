use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::model::{CostScale, DEFAULT_REPLICATES, ReportKind};

#[derive(Parser, Debug)]
#[command(
    name = "fairta-results",
    version,
    about = "Export fair task allocation experiment results as pivoted report tables"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Export(ExportArgs),
    Ingest(IngestArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// paretoFront, COV or computationTime
    #[arg(long = "report", alias = "tableName", value_parser = ReportKind::from_str)]
    pub report: ReportKind,

    #[arg(short = 's', long, default_value_t = 5)]
    pub sources: u32,

    #[arg(short = 't', long, default_value_t = 100)]
    pub targets: u32,

    /// Replicate number of the instance for single-instance reports.
    #[arg(short = 'i', long, default_value_t = 1)]
    pub instance: u32,

    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = CostScale::Normalized)]
    pub cost_scale: CostScale,

    /// Replicates per (pNorm, coefficient) row of the computation-time report.
    #[arg(long, default_value_t = DEFAULT_REPLICATES, value_parser = clap::value_parser!(u32).range(1..))]
    pub replicates: u32,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// Directory holding one solver result JSON file per run.
    #[arg(long)]
    pub input_dir: PathBuf,

    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub summary_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

pub fn resolve_db_path(data_root: &Path, db_path: Option<&Path>) -> PathBuf {
    db_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_root.join("results.db"))
}
