//! Softmax (multinomial logistic regression) classifier trained with
//! mini-batch SGD or Adam on the synthetic cluster dataset.

use super::dataset::{Dataset, Split, standard_normal};
use super::{Evaluation, ModelState, Objective};
use crate::config::TrainingContext;
use crate::error::{TrainingFailure, TrialError};
use crate::hyperparams::{HyperparameterSet, ParamKind, ParamSpec, ParamValue};
use crate::result::TrialResult;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::ops::Bound;
use tokio_util::sync::CancellationToken;

const METRICS: &[&str] = &["accuracy", "loss", "train_loss"];

/// Largest integer exactly representable in the JSON artifact.
const MAX_SEED: i64 = 1 << 53;

/// Per-trial training settings read from the hyperparameter set.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    learning_rate: f64,
    batch_size: usize,
    epochs: usize,
    momentum: f64,
    weight_decay: f64,
    optimizer: OptimizerKind,
    seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptimizerKind {
    Sgd,
    Adam,
}

impl Settings {
    /// Read settings from a validated set. Parsing fills declared defaults, so
    /// an absent or unusable value means the set was built against a
    /// different parameter list and is rejected rather than substituted.
    fn from_hyperparameters(
        hp: &HyperparameterSet,
        ctx: &TrainingContext,
    ) -> Result<Self, TrainingFailure> {
        let missing = |name: &str| {
            TrainingFailure::InvalidData(format!("hyperparameter '{name}' is missing"))
        };
        let float = |name: &str| hp.float(name).ok_or_else(|| missing(name));
        let count = |name: &str| {
            let v = hp.int(name).ok_or_else(|| missing(name))?;
            usize::try_from(v).ok().filter(|&v| v > 0).ok_or_else(|| {
                TrainingFailure::InvalidData(format!(
                    "hyperparameter '{name}' must be positive, got {v}"
                ))
            })
        };

        let optimizer = match hp.categorical("optimizer") {
            Some("sgd") => OptimizerKind::Sgd,
            Some("adam") => OptimizerKind::Adam,
            Some(other) => {
                return Err(TrainingFailure::InvalidData(format!(
                    "unsupported optimizer '{other}'"
                )));
            }
            None => return Err(missing("optimizer")),
        };
        let seed = match hp.int("seed") {
            Some(s) => u64::try_from(s).map_err(|_| {
                TrainingFailure::InvalidData(format!("seed must be non-negative, got {s}"))
            })?,
            None => ctx.seed,
        };

        Ok(Self {
            learning_rate: float("learning_rate")?,
            batch_size: count("batch_size")?,
            epochs: count("epochs")?,
            momentum: float("momentum")?,
            weight_decay: float("weight_decay")?,
            optimizer,
            seed,
        })
    }
}

/// First-order optimizer state over a flat parameter vector.
enum Optimizer {
    Sgd {
        momentum: f64,
        velocity: Vec<f64>,
    },
    Adam {
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        t: i32,
        m: Vec<f64>,
        v: Vec<f64>,
    },
}

impl Optimizer {
    fn new(kind: OptimizerKind, momentum: f64, n: usize) -> Self {
        match kind {
            OptimizerKind::Sgd => Self::Sgd {
                momentum,
                velocity: vec![0.0; n],
            },
            OptimizerKind::Adam => Self::Adam {
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
                t: 0,
                m: vec![0.0; n],
                v: vec![0.0; n],
            },
        }
    }

    fn step(&mut self, params: &mut [f64], grad: &[f64], lr: f64) {
        match self {
            Self::Sgd { momentum, velocity } => {
                for ((p, g), v) in params.iter_mut().zip(grad).zip(velocity.iter_mut()) {
                    *v = *momentum * *v + g;
                    *p -= lr * *v;
                }
            }
            Self::Adam {
                beta1,
                beta2,
                epsilon,
                t,
                m,
                v,
            } => {
                *t += 1;
                let lr_t = lr * (1.0 - beta2.powi(*t)).sqrt() / (1.0 - beta1.powi(*t));
                for i in 0..params.len() {
                    m[i] = *beta1 * m[i] + (1.0 - *beta1) * grad[i];
                    v[i] = *beta2 * v[i] + (1.0 - *beta2) * grad[i] * grad[i];
                    params[i] -= lr_t * m[i] / (v[i].sqrt() + *epsilon);
                }
            }
        }
    }
}

/// Linear model `logits = W x + b` with `W` of shape `[classes, features]`.
struct Model {
    classes: usize,
    features: usize,
    /// Weights followed by biases.
    params: Vec<f64>,
}

impl Model {
    fn init(classes: usize, features: usize, rng: &mut StdRng) -> Self {
        let mut params: Vec<f64> = (0..classes * features)
            .map(|_| 0.01 * standard_normal(rng))
            .collect();
        params.extend(std::iter::repeat_n(0.0, classes));
        Self {
            classes,
            features,
            params,
        }
    }

    fn logits(&self, row: &[f64], out: &mut [f64]) {
        let bias = &self.params[self.classes * self.features..];
        for (c, logit) in out.iter_mut().enumerate() {
            let w = &self.params[c * self.features..(c + 1) * self.features];
            *logit = w.iter().zip(row).map(|(a, b)| a * b).sum::<f64>() + bias[c];
        }
    }

    /// Converts logits into probabilities in place and returns `-ln p[label]`.
    fn softmax_loss(logits: &mut [f64], label: usize) -> f64 {
        let label_logit = logits[label];
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for l in logits.iter_mut() {
            *l = (*l - max).exp();
            sum += *l;
        }
        for l in logits.iter_mut() {
            *l /= sum;
        }
        sum.ln() + max - label_logit
    }

    /// Mean loss and accuracy over a split.
    fn evaluate(&self, split: &Split) -> (f64, f64) {
        let mut scratch = vec![0.0; self.classes];
        let mut loss = 0.0;
        let mut correct = 0usize;
        for i in 0..split.len() {
            self.logits(split.row(i), &mut scratch);
            let predicted = argmax(&scratch);
            loss += Self::softmax_loss(&mut scratch, split.y[i]);
            if predicted == split.y[i] {
                correct += 1;
            }
        }
        let n = split.len() as f64;
        (loss / n, correct as f64 / n)
    }

    fn into_state(self) -> ModelState {
        let bias = self.params[self.classes * self.features..].to_vec();
        let mut weights = self.params;
        weights.truncate(self.classes * self.features);
        ModelState {
            kind: "softmax_regression".to_string(),
            shape: [self.classes, self.features],
            weights,
            bias,
        }
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv { (i, v) } else { (bi, bv) }
        })
        .0
}

/// The built-in objective: validation accuracy of a softmax classifier.
pub struct SoftmaxObjective {
    params: Vec<ParamSpec>,
}

impl Default for SoftmaxObjective {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftmaxObjective {
    pub fn new() -> Self {
        let params = vec![
            ParamSpec::required(
                "learning_rate",
                ParamKind::Float {
                    lower: Bound::Excluded(0.0),
                    upper: Bound::Included(10.0),
                },
                "Optimizer step size",
            ),
            ParamSpec::required(
                "batch_size",
                ParamKind::Int { min: 1, max: 4096 },
                "Mini-batch size",
            ),
            ParamSpec::optional(
                "epochs",
                ParamKind::Int { min: 1, max: 1000 },
                Some(ParamValue::Int(10)),
                "Passes over the training split",
            ),
            ParamSpec::optional(
                "momentum",
                ParamKind::Float {
                    lower: Bound::Included(0.0),
                    upper: Bound::Excluded(1.0),
                },
                Some(ParamValue::Float(0.0)),
                "SGD momentum (ignored by adam)",
            ),
            ParamSpec::optional(
                "weight_decay",
                ParamKind::Float {
                    lower: Bound::Included(0.0),
                    upper: Bound::Included(1.0),
                },
                Some(ParamValue::Float(0.0)),
                "L2 penalty on the weights",
            ),
            ParamSpec::optional(
                "optimizer",
                ParamKind::Categorical {
                    choices: &["sgd", "adam"],
                },
                Some(ParamValue::Categorical("sgd".to_string())),
                "Optimizer",
            ),
            ParamSpec::optional(
                "seed",
                ParamKind::Int {
                    min: 0,
                    max: MAX_SEED,
                },
                None,
                "Random seed for initialization and shuffling (defaults to training.seed)",
            ),
        ];
        Self { params }
    }
}

impl Objective for SoftmaxObjective {
    fn name(&self) -> &str {
        "softmax_classifier"
    }

    fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    fn metric_names(&self) -> &[&'static str] {
        METRICS
    }

    fn objective_metric(&self) -> &str {
        "accuracy"
    }

    fn evaluate(
        &self,
        hyperparameters: &HyperparameterSet,
        context: &TrainingContext,
        cancel: &CancellationToken,
    ) -> Result<Evaluation, TrialError> {
        let settings = Settings::from_hyperparameters(hyperparameters, context)?;
        let data = Dataset::generate(context)?;
        let (k, d) = (data.classes, data.train.features);

        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut model = Model::init(k, d, &mut rng);
        let mut optimizer =
            Optimizer::new(settings.optimizer, settings.momentum, model.params.len());

        let mut order: Vec<usize> = (0..data.train.len()).collect();
        let mut grad = vec![0.0; model.params.len()];
        let mut scratch = vec![0.0; k];
        let mut train_loss = f64::NAN;

        for epoch in 1..=settings.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;

            for batch in order.chunks(settings.batch_size) {
                if cancel.is_cancelled() {
                    return Err(TrainingFailure::Cancelled.into());
                }
                grad.iter_mut().for_each(|g| *g = 0.0);

                for &i in batch {
                    let row = data.train.row(i);
                    let label = data.train.y[i];
                    model.logits(row, &mut scratch);
                    loss_sum += Model::softmax_loss(&mut scratch, label);
                    scratch[label] -= 1.0;
                    for (c, g) in scratch.iter().enumerate() {
                        for (j, x) in row.iter().enumerate() {
                            grad[c * d + j] += g * x;
                        }
                        grad[k * d + c] += g;
                    }
                }

                let scale = 1.0 / batch.len() as f64;
                for (idx, g) in grad.iter_mut().enumerate() {
                    *g *= scale;
                    if idx < k * d {
                        *g += settings.weight_decay * model.params[idx];
                    }
                }
                optimizer.step(&mut model.params, &grad, settings.learning_rate);
            }

            train_loss = loss_sum / data.train.len() as f64;
            if !train_loss.is_finite() || model.params.iter().any(|p| !p.is_finite()) {
                tracing::warn!(epoch, train_loss, "Training diverged");
                return Err(TrainingFailure::NumericalInstability {
                    epoch,
                    loss: train_loss,
                }
                .into());
            }
            tracing::debug!(epoch, epochs = settings.epochs, train_loss, "Epoch complete");
        }

        let (val_loss, val_accuracy) = model.evaluate(&data.validation);
        let result = TrialResult::new(
            self.objective_metric(),
            [
                ("accuracy".to_string(), val_accuracy),
                ("loss".to_string(), val_loss),
                ("train_loss".to_string(), train_loss),
            ],
        )?;

        Ok(Evaluation {
            result,
            model: Some(model.into_state()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hp(objective: &SoftmaxObjective, pairs: &[(&str, &str)]) -> HyperparameterSet {
        HyperparameterSet::parse(pairs.iter().copied(), objective.params()).unwrap()
    }

    fn small_context() -> TrainingContext {
        TrainingContext {
            samples: 300,
            ..TrainingContext::default()
        }
    }

    #[test]
    fn test_scenario_accuracy_in_unit_interval() {
        let objective = SoftmaxObjective::new();
        let set = hp(&objective, &[("learning_rate", "0.01"), ("batch_size", "32")]);
        let eval = objective
            .evaluate(&set, &TrainingContext::default(), &CancellationToken::new())
            .unwrap();
        let accuracy = eval.result.get("accuracy").unwrap();
        assert!((0.0..=1.0).contains(&accuracy));
        assert!(eval.result.get("loss").unwrap() > 0.0);
        assert_eq!(eval.result.objective_metric(), "accuracy");
    }

    #[test]
    fn test_learns_separable_clusters() {
        let objective = SoftmaxObjective::new();
        let set = hp(
            &objective,
            &[("learning_rate", "0.1"), ("batch_size", "16"), ("epochs", "20")],
        );
        let ctx = TrainingContext {
            class_separation: 5.0,
            cluster_spread: 0.5,
            ..small_context()
        };
        let eval = objective
            .evaluate(&set, &ctx, &CancellationToken::new())
            .unwrap();
        assert!(eval.result.objective_value() > 0.9, "{:?}", eval.result);
    }

    #[test]
    fn test_same_seed_is_bit_identical() {
        let objective = SoftmaxObjective::new();
        let set = hp(
            &objective,
            &[
                ("learning_rate", "0.05"),
                ("batch_size", "8"),
                ("optimizer", "adam"),
                ("seed", "1234"),
                ("epochs", "3"),
            ],
        );
        let ctx = small_context();
        let a = objective.evaluate(&set, &ctx, &CancellationToken::new()).unwrap();
        let b = objective.evaluate(&set, &ctx, &CancellationToken::new()).unwrap();
        assert_eq!(a.result, b.result);
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_different_seed_changes_model() {
        let objective = SoftmaxObjective::new();
        let ctx = small_context();
        let a = objective
            .evaluate(
                &hp(&objective, &[("learning_rate", "0.05"), ("batch_size", "8"), ("seed", "1")]),
                &ctx,
                &CancellationToken::new(),
            )
            .unwrap();
        let b = objective
            .evaluate(
                &hp(&objective, &[("learning_rate", "0.05"), ("batch_size", "8"), ("seed", "2")]),
                &ctx,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_ne!(a.model, b.model);
    }

    #[test]
    fn test_cancelled_token_stops_training() {
        let objective = SoftmaxObjective::new();
        let set = hp(&objective, &[("learning_rate", "0.01"), ("batch_size", "32")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = objective
            .evaluate(&set, &small_context(), &cancel)
            .unwrap_err();
        assert!(matches!(err, TrialError::Training(TrainingFailure::Cancelled)));
    }

    #[test]
    fn test_invalid_context_is_training_failure() {
        let objective = SoftmaxObjective::new();
        let set = hp(&objective, &[("learning_rate", "0.01"), ("batch_size", "32")]);
        let ctx = TrainingContext {
            classes: 1,
            ..TrainingContext::default()
        };
        let err = objective
            .evaluate(&set, &ctx, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_incomplete_set_is_rejected_not_substituted() {
        let objective = SoftmaxObjective::new();
        let partial = [ParamSpec::required(
            "learning_rate",
            ParamKind::Float {
                lower: Bound::Excluded(0.0),
                upper: Bound::Unbounded,
            },
            "",
        )];
        let set = HyperparameterSet::parse([("learning_rate", "0.1")], &partial).unwrap();
        let err = objective
            .evaluate(&set, &small_context(), &CancellationToken::new())
            .unwrap_err();
        match err {
            TrialError::Training(TrainingFailure::InvalidData(msg)) => {
                assert!(msg.contains("batch_size"), "{msg}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_model_state_shape() {
        let objective = SoftmaxObjective::new();
        let set = hp(
            &objective,
            &[("learning_rate", "0.01"), ("batch_size", "64"), ("epochs", "1")],
        );
        let ctx = small_context();
        let state = objective
            .evaluate(&set, &ctx, &CancellationToken::new())
            .unwrap()
            .model
            .unwrap();
        assert_eq!(state.shape, [ctx.classes, ctx.features]);
        assert_eq!(state.weights.len(), ctx.classes * ctx.features);
        assert_eq!(state.bias.len(), ctx.classes);
    }

    #[test]
    fn test_softmax_loss_matches_closed_form() {
        let mut logits = [0.0, 0.0];
        let loss = Model::softmax_loss(&mut logits, 0);
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
        assert!((logits[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_declares_objective_metric() {
        let objective = SoftmaxObjective::new();
        assert!(objective.metric_names().contains(&objective.objective_metric()));
        let required: Vec<&str> = objective
            .params()
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        assert_eq!(required, vec!["learning_rate", "batch_size"]);
    }
}
