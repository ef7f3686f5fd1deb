//! Reproducibility fingerprints for trials.

use crate::config::TrainingContext;
use crate::hyperparams::HyperparameterSet;
use sha2::{Digest, Sha256};

/// SHA-256 over everything that determines a trial's metrics: objective
/// name, hyperparameters, and training context.
pub fn fingerprint(objective: &str, hp: &HyperparameterSet, ctx: &TrainingContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(objective.as_bytes());
    hasher.update(b"\n");
    hasher.update(hp.canonical_string().as_bytes());
    hasher.update(b"\n");
    // Field order is fixed by the struct definition.
    let ctx_json = serde_json::to_string(ctx).unwrap_or_default();
    hasher.update(ctx_json.as_bytes());
    format!("{:x}", hasher.finalize())
}
