//! Hyperparameter search command.

use crate::commands::resolve_spec;
use crate::commands::types::TuneArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use galaxyguard_training::{
    HashedLogisticTrainer, HyperParams, LocalArtifactStore, SearchSpace, StopSignal, TracingProgressSink, Trainer,
    TrialStatus, Tuner, TuningReport,
};
use std::sync::Arc;

pub async fn execute(args: TuneArgs, stop: StopSignal) -> Result<u8> {
    let spec = resolve_spec(&args.job)?;
    let space = SearchSpace::new(args.epochs, args.batch_sizes, args.learning_rates)
        .context("Invalid search space")?;
    let store = Arc::new(LocalArtifactStore::new(args.store_root.clone(), spec.data_dir.clone()));
    let feature_bits = args.feature_bits;
    let make_trainer = move |_: &HyperParams| -> Box<dyn Trainer> { Box::new(HashedLogisticTrainer::new(feature_bits)) };

    let mut tuner = Tuner::new(spec, space, store, Arc::new(TracingProgressSink), make_trainer)
        .with_max_jobs(args.max_jobs)
        .with_stop_signal(stop);

    let report = tokio::task::spawn_blocking(move || tuner.run())
        .await
        .context("Tuning worker panicked")??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let preempted = report.trials.iter().any(|t| t.status == TrialStatus::Preempted);
    Ok(if preempted { u8::try_from(galaxyguard_training::EXIT_PREEMPTED).unwrap_or(1) } else { 0 })
}

fn print_report(report: &TuningReport) {
    eprintln!();
    eprintln!("{}", format!("Tuning trials ({})", report.trials.len()).bold().cyan());
    eprintln!();
    eprintln!("{:<6} {:<7} {:<6} {:<10} {:<12} {}", "Trial", "Epochs", "Batch", "LR", report.metric, "Status");
    eprintln!("{}", "─".repeat(60));
    for trial in &report.trials {
        let objective = trial.objective.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        let status = match &trial.status {
            TrialStatus::Completed => "completed".green().to_string(),
            TrialStatus::Preempted => "preempted".yellow().to_string(),
            TrialStatus::Failed { error } => format!("{} ({error})", "failed".red()),
        };
        eprintln!(
            "{:<6} {:<7} {:<6} {:<10.1e} {:<12} {}",
            trial.index,
            trial.hyperparams.num_train_epochs,
            trial.hyperparams.per_device_train_batch_size,
            trial.hyperparams.learning_rate,
            objective,
            status
        );
    }
    eprintln!();
    match report.best_trial() {
        Some(best) => eprintln!("  Best: trial {} -> {}", best.index, best.final_model_key.cyan()),
        None => eprintln!("  {}", "No trial completed with the objective metric.".dimmed()),
    }
    eprintln!();
}
