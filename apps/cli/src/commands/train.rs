//! Training command implementation.

use crate::commands::resolve_spec;
use crate::commands::types::TrainArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use galaxyguard_training::{
    HashedLogisticTrainer, JobOutcome, JobState, LocalArtifactStore, MetricReporter, StopSignal, TracingProgressSink,
    TrainingJobDriver,
};
use serde_json::json;
use std::sync::Arc;

pub async fn execute(args: TrainArgs, stop: StopSignal) -> Result<u8> {
    let spec = resolve_spec(&args.job)?;
    let store = Arc::new(LocalArtifactStore::new(args.store_root.clone(), spec.data_dir.clone()));

    let mut trainer = HashedLogisticTrainer::new(args.feature_bits);
    if let Some(base) = args.base_model {
        trainer = trainer.with_base_model(base);
    }
    let reporter = MetricReporter::stdout(spec.metric_for_best_model.clone());

    let mut driver = TrainingJobDriver::new(spec, store, Box::new(trainer), reporter, Arc::new(TracingProgressSink))
        .with_stop_signal(stop);

    let outcome = tokio::task::spawn_blocking(move || driver.run())
        .await
        .context("Training worker panicked")??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&outcome);
    }
    Ok(u8::try_from(outcome.exit_code()).unwrap_or(1))
}

fn outcome_json(outcome: &JobOutcome) -> serde_json::Value {
    json!({
        "job_id": outcome.job_id,
        "state": outcome.state,
        "global_step": outcome.global_step,
        "total_steps": outcome.total_steps,
        "steps_trained": outcome.steps_trained,
        "resumed_from": outcome.resumed_from,
        "best": outcome.best,
        "early_stopped": outcome.early_stopped,
        "final_model_dir": outcome.final_model_dir,
    })
}

fn print_outcome(outcome: &JobOutcome) {
    eprintln!();
    match outcome.state {
        JobState::Preempted => eprintln!("{}", "Training stopped at epoch boundary".bold().yellow()),
        _ => eprintln!("{}", "Training complete".bold().green()),
    }
    eprintln!("  Job: {}", outcome.job_id.to_string().cyan());
    eprintln!("  Steps: {}/{} ({} this run)", outcome.global_step, outcome.total_steps, outcome.steps_trained);
    if let Some(from) = outcome.resumed_from {
        eprintln!("  Resumed from: {}", from.to_string().dimmed());
    }
    match outcome.best {
        Some(best) => eprintln!("  Best: epoch {} ({}, value {:.4})", best.epoch, best.checkpoint, best.value),
        None => eprintln!("  Best: {}", "none".dimmed()),
    }
    if outcome.early_stopped {
        eprintln!("  {}", "Stopped early: objective stopped improving".dimmed());
    }
    if let Some(dir) = &outcome.final_model_dir {
        eprintln!("  Final model: {}", dir.display().to_string().dimmed());
    } else {
        eprintln!("  {}", "Re-run the same command to resume.".dimmed());
    }
    eprintln!();
}
