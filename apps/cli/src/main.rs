//! GalaxyGuard CLI - train, tune, and query the toxicity classifier
//!
//! `train` runs one checkpoint-resumable training job. Evaluation metrics are
//! written to stdout as `<metric>=<value>;` lines for the job monitor; logs go
//! to stderr.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use galaxyguard_training::{JobError, StopSignal};
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::types::{CheckpointsArgs, ClassifyArgs, TrainArgs, TuneArgs};
use commands::{checkpoints, classify, train, tune};

/// GalaxyGuard - toxicity classifier training
#[derive(Parser, Debug)]
#[command(name = "galaxyguard", author, version, about = "GalaxyGuard - toxicity classifier training")]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a training job, resuming from the latest checkpoint if one exists
    ///
    /// Hyperparameters come from the job file, then from the `num_train_epochs`,
    /// `per_device_train_batch_size`, and `learning_rate` environment variables.
    Train(TrainArgs),

    /// List checkpoints in a job's output directory
    Checkpoints(CheckpointsArgs),

    /// Grid-search hyperparameters, one training job per trial
    Tune(TuneArgs),

    /// Score texts with an exported model
    Classify(ClassifyArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    let Some(command) = args.command else {
        if let Err(e) = Args::command().print_help() {
            eprintln!("{e}");
        }
        return ExitCode::SUCCESS;
    };

    let stop = StopSignal::new();
    watch_for_shutdown(stop.clone());

    let result = match command {
        Command::Train(args) => train::execute(args, stop).await,
        Command::Checkpoints(args) => checkpoints::execute(args),
        Command::Tune(args) => tune::execute(args, stop).await,
        Command::Classify(args) => classify::execute(args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Exit code for a failed command, taken from the first `JobError` in the chain.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<JobError>())
        .map_or(1, |job_err| u8::try_from(job_err.exit_code()).unwrap_or(1))
}

/// Request a stop at the next epoch boundary on Ctrl+C or SIGTERM.
fn watch_for_shutdown(stop: StopSignal) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested; stopping after the current epoch's checkpoint");
        stop.request();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
