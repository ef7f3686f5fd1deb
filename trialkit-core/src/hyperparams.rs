//! Hyperparameter declarations and validation.
//!
//! An objective declares its parameters as [`ParamSpec`]s. Raw `(name, value)`
//! pairs coming from the command line or the environment are turned into a
//! [`HyperparameterSet`] only through [`HyperparameterSet::parse`], which
//! rejects unknown, duplicate, missing, malformed, and out-of-domain values.
//! Values are never clamped into range.

use crate::error::HyperparameterError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::ops::Bound;

/// Type and accepted domain of a hyperparameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Float { lower: Bound<f64>, upper: Bound<f64> },
    /// Inclusive on both ends.
    Int { min: i64, max: i64 },
    Categorical { choices: &'static [&'static str] },
}

impl ParamKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::Float { .. } => "a finite float",
            Self::Int { .. } => "an integer",
            Self::Categorical { .. } => "one of the declared choices",
        }
    }

    /// Human-readable domain, e.g. `(0, 10]` or `{sgd, adam}`.
    pub fn domain(&self) -> String {
        match self {
            Self::Float { lower, upper } => {
                let lo = match lower {
                    Bound::Included(v) => format!("[{v}"),
                    Bound::Excluded(v) => format!("({v}"),
                    Bound::Unbounded => "(-inf".to_string(),
                };
                let hi = match upper {
                    Bound::Included(v) => format!("{v}]"),
                    Bound::Excluded(v) => format!("{v})"),
                    Bound::Unbounded => "inf)".to_string(),
                };
                format!("{lo}, {hi}")
            }
            Self::Int { min, max } => format!("[{min}, {max}]"),
            Self::Categorical { choices } => format!("{{{}}}", choices.join(", ")),
        }
    }

    fn contains_float(lower: &Bound<f64>, upper: &Bound<f64>, v: f64) -> bool {
        let above = match lower {
            Bound::Included(lo) => v >= *lo,
            Bound::Excluded(lo) => v > *lo,
            Bound::Unbounded => true,
        };
        let below = match upper {
            Bound::Included(hi) => v <= *hi,
            Bound::Excluded(hi) => v < *hi,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// A validated hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Categorical(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Categorical(v) => f.write_str(v),
        }
    }
}

/// Declaration of a single hyperparameter accepted by an objective.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Value used when an optional parameter is absent.
    pub default: Option<ParamValue>,
    pub help: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, help: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            help,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        default: Option<ParamValue>,
        help: &'static str,
    ) -> Self {
        Self {
            name,
            kind,
            required: false,
            default,
            help,
        }
    }

    /// Parse and domain-check a raw string value.
    pub fn parse(&self, raw: &str) -> Result<ParamValue, HyperparameterError> {
        let raw = raw.trim();
        let malformed = || HyperparameterError::Malformed {
            name: self.name.to_string(),
            value: raw.to_string(),
            expected: self.kind.expected(),
        };
        let out_of_domain = || HyperparameterError::OutOfDomain {
            name: self.name.to_string(),
            value: raw.to_string(),
            domain: self.kind.domain(),
        };

        match &self.kind {
            ParamKind::Float { lower, upper } => {
                let v: f64 = raw.parse().map_err(|_| malformed())?;
                if !v.is_finite() {
                    return Err(malformed());
                }
                if !ParamKind::contains_float(lower, upper, v) {
                    return Err(out_of_domain());
                }
                Ok(ParamValue::Float(v))
            }
            ParamKind::Int { min, max } => {
                let v: i64 = raw.parse().map_err(|_| malformed())?;
                if v < *min || v > *max {
                    return Err(out_of_domain());
                }
                Ok(ParamValue::Int(v))
            }
            ParamKind::Categorical { choices } => {
                if choices.contains(&raw) {
                    Ok(ParamValue::Categorical(raw.to_string()))
                } else {
                    Err(out_of_domain())
                }
            }
        }
    }
}

/// Validated, immutable hyperparameter assignment for one trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HyperparameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl HyperparameterSet {
    /// Validate raw pairs against the declared specs.
    ///
    /// Errors are reported in input order; missing required parameters are
    /// checked last, in declaration order.
    pub fn parse<I, K, V>(raw: I, specs: &[ParamSpec]) -> Result<Self, HyperparameterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values = BTreeMap::new();

        for (name, value) in raw {
            let name = name.as_ref();
            let spec = specs
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| HyperparameterError::Unknown {
                    name: name.to_string(),
                })?;
            let parsed = spec.parse(value.as_ref())?;
            match values.entry(name.to_string()) {
                Entry::Occupied(_) => {
                    return Err(HyperparameterError::Duplicate {
                        name: name.to_string(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(parsed);
                }
            }
        }

        for spec in specs {
            if values.contains_key(spec.name) {
                continue;
            }
            if spec.required {
                return Err(HyperparameterError::Missing {
                    name: spec.name.to_string(),
                });
            }
            if let Some(default) = &spec.default {
                values.insert(spec.name.to_string(), default.clone());
            }
        }

        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Categorical(_) => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name)? {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn categorical(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ParamValue::Categorical(v) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted `name=value` pairs joined by `;`, stable across runs.
    pub fn canonical_string(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "learning_rate",
                ParamKind::Float {
                    lower: Bound::Excluded(0.0),
                    upper: Bound::Included(10.0),
                },
                "step size",
            ),
            ParamSpec::required("batch_size", ParamKind::Int { min: 1, max: 4096 }, "batch"),
            ParamSpec::optional(
                "optimizer",
                ParamKind::Categorical {
                    choices: &["sgd", "adam"],
                },
                Some(ParamValue::Categorical("sgd".into())),
                "optimizer",
            ),
            ParamSpec::optional("seed", ParamKind::Int { min: 0, max: 1000 }, None, "seed"),
        ]
    }

    #[test]
    fn test_parse_valid_set_fills_defaults() {
        let hp = HyperparameterSet::parse(
            [("learning_rate", "0.01"), ("batch_size", "32")],
            &specs(),
        )
        .unwrap();
        assert_eq!(hp.float("learning_rate"), Some(0.01));
        assert_eq!(hp.int("batch_size"), Some(32));
        assert_eq!(hp.categorical("optimizer"), Some("sgd"));
        assert_eq!(hp.get("seed"), None);
        assert_eq!(hp.len(), 3);
    }

    #[test]
    fn test_missing_required() {
        let err = HyperparameterSet::parse([("learning_rate", "0.01")], &specs()).unwrap_err();
        assert_eq!(
            err,
            HyperparameterError::Missing {
                name: "batch_size".into()
            }
        );
    }

    #[test]
    fn test_unknown_key() {
        let err = HyperparameterSet::parse(
            [("learning_rate", "0.01"), ("batch_size", "32"), ("dropout", "0.5")],
            &specs(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            HyperparameterError::Unknown {
                name: "dropout".into()
            }
        );
    }

    #[test]
    fn test_duplicate_key() {
        let err = HyperparameterSet::parse(
            [("learning_rate", "0.01"), ("learning_rate", "0.02")],
            &specs(),
        )
        .unwrap_err();
        assert!(matches!(err, HyperparameterError::Duplicate { .. }));
    }

    #[test]
    fn test_negative_learning_rate_is_rejected_not_clamped() {
        let err = HyperparameterSet::parse([("learning_rate", "-1")], &specs()).unwrap_err();
        match err {
            HyperparameterError::OutOfDomain { name, value, domain } => {
                assert_eq!(name, "learning_rate");
                assert_eq!(value, "-1");
                assert_eq!(domain, "(0, 10]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exclusive_bound_rejects_endpoint() {
        let err = HyperparameterSet::parse(
            [("learning_rate", "0"), ("batch_size", "32")],
            &specs(),
        )
        .unwrap_err();
        assert!(matches!(err, HyperparameterError::OutOfDomain { .. }));
        assert!(
            HyperparameterSet::parse([("learning_rate", "10"), ("batch_size", "32")], &specs())
                .is_ok()
        );
    }

    #[test]
    fn test_malformed_values() {
        for (name, value) in [
            ("learning_rate", "fast"),
            ("learning_rate", "NaN"),
            ("learning_rate", "inf"),
            ("batch_size", "32.5"),
        ] {
            let err = HyperparameterSet::parse([(name, value)], &specs()).unwrap_err();
            assert!(
                matches!(err, HyperparameterError::Malformed { .. }),
                "{name}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_categorical_must_match_exactly() {
        let err = HyperparameterSet::parse(
            [
                ("learning_rate", "0.1"),
                ("batch_size", "8"),
                ("optimizer", "SGD"),
            ],
            &specs(),
        )
        .unwrap_err();
        assert!(matches!(err, HyperparameterError::OutOfDomain { .. }));
    }

    #[test]
    fn test_canonical_string_is_sorted() {
        let hp = HyperparameterSet::parse(
            [("learning_rate", "0.5"), ("batch_size", "16"), ("seed", "3")],
            &specs(),
        )
        .unwrap();
        assert_eq!(
            hp.canonical_string(),
            "batch_size=16;learning_rate=0.5;optimizer=sgd;seed=3"
        );
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let hp = HyperparameterSet::parse(
            [("learning_rate", "0.5"), ("batch_size", "16")],
            &specs(),
        )
        .unwrap();
        let json = serde_json::to_value(&hp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"batch_size": 16, "learning_rate": 0.5, "optimizer": "sgd"})
        );
    }
}
