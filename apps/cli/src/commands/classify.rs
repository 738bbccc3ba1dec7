//! Inference with an exported model.

use crate::commands::types::ClassifyArgs;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use galaxyguard_training::ToxicityClassifier;
use serde_json::json;

pub fn execute(args: ClassifyArgs) -> Result<u8> {
    if !(0.0..=1.0).contains(&args.threshold) {
        bail!("threshold must be between 0 and 1, got {}", args.threshold);
    }
    let classifier = ToxicityClassifier::load(&args.model_dir)
        .with_context(|| format!("Failed to load model from {}", args.model_dir.display()))?
        .with_threshold(args.threshold);

    if args.json {
        let out: Vec<_> = args
            .texts
            .iter()
            .map(|text| {
                let p = classifier.predict(text);
                json!({ "text": text, "toxic": p.toxic, "probability": p.probability })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(0);
    }

    for text in &args.texts {
        let p = classifier.predict(text);
        let label = if p.toxic { "toxic".red().bold() } else { "ok".green() };
        println!("{:<6} {:.3}  {}", label, p.probability, text);
    }
    Ok(0)
}
