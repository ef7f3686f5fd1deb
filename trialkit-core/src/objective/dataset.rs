//! Deterministic synthetic classification data.
//!
//! Gaussian clusters, one per class, generated from `TrainingContext::data_seed`
//! so every trial of a tuning run trains on identical data.

use crate::config::TrainingContext;
use crate::error::TrainingFailure;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Upper bound on generated feature values held in memory at once.
const MAX_CELLS: usize = 50_000_000;

/// Row-major feature matrix with integer labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub features: usize,
    pub x: Vec<f64>,
    pub y: Vec<usize>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.x[i * self.features..(i + 1) * self.features]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub classes: usize,
    pub train: Split,
    pub validation: Split,
}

/// Standard normal sample (Box-Muller).
pub(crate) fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl Dataset {
    pub fn generate(ctx: &TrainingContext) -> Result<Self, TrainingFailure> {
        if ctx.classes < 2 {
            return Err(TrainingFailure::InvalidData(format!(
                "need at least 2 classes, got {}",
                ctx.classes
            )));
        }
        if ctx.features == 0 {
            return Err(TrainingFailure::InvalidData("need at least 1 feature".into()));
        }
        if ctx.samples < ctx.classes {
            return Err(TrainingFailure::InvalidData(format!(
                "{} samples cannot cover {} classes",
                ctx.samples, ctx.classes
            )));
        }
        if !(ctx.validation_fraction > 0.0 && ctx.validation_fraction < 1.0) {
            return Err(TrainingFailure::InvalidData(format!(
                "validation_fraction must be in (0, 1), got {}",
                ctx.validation_fraction
            )));
        }
        if !(ctx.cluster_spread.is_finite() && ctx.cluster_spread > 0.0) {
            return Err(TrainingFailure::InvalidData(format!(
                "cluster_spread must be positive, got {}",
                ctx.cluster_spread
            )));
        }
        // Centers are drawn from [-separation, separation].
        if !(ctx.class_separation.is_finite() && ctx.class_separation >= 0.0) {
            return Err(TrainingFailure::InvalidData(format!(
                "class_separation must be non-negative, got {}",
                ctx.class_separation
            )));
        }

        match ctx.samples.checked_mul(ctx.features) {
            Some(cells) if cells <= MAX_CELLS => {}
            _ => {
                return Err(TrainingFailure::ResourceExhausted(format!(
                    "{} samples x {} features exceeds {MAX_CELLS} values",
                    ctx.samples, ctx.features
                )));
            }
        }

        let n_val = (ctx.samples as f64 * ctx.validation_fraction).round() as usize;
        if n_val == 0 || n_val >= ctx.samples {
            return Err(TrainingFailure::InvalidData(format!(
                "validation split of {n_val} out of {} samples leaves an empty split",
                ctx.samples
            )));
        }

        let mut rng = StdRng::seed_from_u64(ctx.data_seed);
        let d = ctx.features;

        let centers: Vec<f64> = (0..ctx.classes * d)
            .map(|_| rng.gen_range(-ctx.class_separation..=ctx.class_separation))
            .collect();

        let mut order: Vec<usize> = (0..ctx.samples).collect();
        order.shuffle(&mut rng);

        let mut x = Vec::with_capacity(ctx.samples * d);
        let mut y = Vec::with_capacity(ctx.samples);
        for &i in &order {
            let label = i % ctx.classes;
            let center = &centers[label * d..(label + 1) * d];
            for c in center {
                x.push(c + ctx.cluster_spread * standard_normal(&mut rng));
            }
            y.push(label);
        }

        let n_train = ctx.samples - n_val;
        let validation = Split {
            features: d,
            x: x.split_off(n_train * d),
            y: y.split_off(n_train),
        };
        let train = Split { features: d, x, y };

        Ok(Self {
            classes: ctx.classes,
            train,
            validation,
        })
    }
}
