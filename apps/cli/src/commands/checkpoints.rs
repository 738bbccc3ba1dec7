//! Checkpoint listing.

use crate::commands::resolve_spec;
use crate::commands::types::CheckpointsArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use galaxyguard_training::{CheckpointId, CheckpointStore, JobLayout, TrainerState};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
struct CheckpointRow {
    step: u64,
    path: String,
    epoch: Option<u32>,
    objective: Option<f64>,
    is_best: bool,
    is_latest: bool,
    readable: bool,
}

pub fn execute(args: CheckpointsArgs) -> Result<u8> {
    let spec = resolve_spec(&args.job)?;
    let store = CheckpointStore::new(JobLayout::new(spec.output_dir.clone(), spec.checkpoint_prefix.clone()));
    let ids = store
        .list()
        .with_context(|| format!("Failed to list checkpoints in {}", spec.output_dir.display()))?;
    let latest = ids.last().copied();

    let states: Vec<(CheckpointId, Option<TrainerState>)> = ids
        .iter()
        .map(|&id| match store.load_state(id) {
            Ok(state) => (id, Some(state)),
            Err(e) => {
                warn!(step = id.step(), error = %e, "Unreadable checkpoint");
                (id, None)
            }
        })
        .collect();

    // The latest readable state carries the current best-model marker.
    let best = states.iter().rev().find_map(|(_, s)| s.as_ref()).and_then(|s| s.best.checkpoint());

    let rows: Vec<CheckpointRow> = states
        .into_iter()
        .map(|(id, state)| {
            let last_log = state.as_ref().and_then(|s| s.log_history.last());
            CheckpointRow {
                step: id.step(),
                path: store.layout().checkpoint_dir(id).display().to_string(),
                epoch: state.as_ref().map(|s| s.epoch),
                objective: last_log.and_then(|log| log.metrics.get(&spec.metric_for_best_model)),
                is_best: best == Some(id),
                is_latest: latest == Some(id),
                readable: state.is_some(),
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }

    println!();
    println!("{}", format!("Checkpoints ({})", rows.len()).bold().cyan());
    println!();
    if rows.is_empty() {
        println!("  {}", format!("No checkpoints in {}", spec.output_dir.display()).dimmed());
        println!();
        return Ok(0);
    }

    println!("{:<10} {:<6} {:<12} {}", "Step", "Epoch", spec.metric_for_best_model, "Notes");
    println!("{}", "─".repeat(50));
    for row in &rows {
        let epoch = row.epoch.map_or_else(|| "-".to_string(), |e| e.to_string());
        let objective = row.objective.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"));
        let mut notes = Vec::new();
        if row.is_best {
            notes.push("best".green().to_string());
        }
        if row.is_latest {
            notes.push("resume point".cyan().to_string());
        }
        if !row.readable {
            notes.push("corrupt".red().to_string());
        }
        println!("{:<10} {:<6} {:<12} {}", row.step, epoch, objective, notes.join(", "));
    }
    println!();
    Ok(0)
}
