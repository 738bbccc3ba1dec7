//! Argument types for the CLI subcommands.

use clap::Args;
use std::path::PathBuf;

/// Where the job comes from: an optional TOML job file plus local overrides.
#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// TOML job file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory for checkpoints and the final model (overrides the job file)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Root directory of the local artifact store (`<root>/<bucket>/<key>`)
    #[arg(long, default_value = "store")]
    pub store_root: PathBuf,

    /// Hashed feature space size as a power of two
    #[arg(long, default_value_t = 16)]
    pub feature_bits: u8,

    /// Exported model directory to start from instead of zero weights
    #[arg(long)]
    pub base_model: Option<PathBuf>,

    /// Print the job outcome as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckpointsArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TuneArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Root directory of the local artifact store (`<root>/<bucket>/<key>`)
    #[arg(long, default_value = "store")]
    pub store_root: PathBuf,

    /// Candidate epoch counts
    #[arg(long, value_delimiter = ',', default_values_t = [2, 4, 8, 16])]
    pub epochs: Vec<u32>,

    /// Candidate per-device batch sizes
    #[arg(long, value_delimiter = ',', default_values_t = [8, 16, 32, 64])]
    pub batch_sizes: Vec<u32>,

    /// Candidate learning rates
    #[arg(long, value_delimiter = ',', default_values_t = [1e-5, 3e-5, 5e-5])]
    pub learning_rates: Vec<f64>,

    /// Maximum number of trials
    #[arg(long, default_value_t = 20)]
    pub max_jobs: usize,

    /// Hashed feature space size as a power of two
    #[arg(long, default_value_t = 16)]
    pub feature_bits: u8,

    /// Print the tuning report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    /// Exported model directory (a checkpoint or `final_model/`)
    #[arg(short, long)]
    pub model_dir: PathBuf,

    /// Probability at or above which a text is labelled toxic
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Texts to classify
    #[arg(required = true)]
    pub texts: Vec<String>,
}
