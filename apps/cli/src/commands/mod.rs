//! CLI command implementations.

pub mod checkpoints;
pub mod classify;
pub mod train;
pub mod tune;
pub mod types;

use anyhow::{Context, Result};
use galaxyguard_training::JobSpec;
use types::JobArgs;

/// Resolve the job: file or defaults, environment hyperparameter overrides, then CLI overrides.
pub fn resolve_spec(args: &JobArgs) -> Result<JobSpec> {
    let mut spec = JobSpec::resolve(args.config.as_deref(), |key| std::env::var(key).ok())
        .context("Failed to resolve job configuration")?;
    if let Some(dir) = &args.output_dir {
        spec.output_dir.clone_from(dir);
    }
    Ok(spec)
}
