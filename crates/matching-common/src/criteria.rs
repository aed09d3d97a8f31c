/// Weighted evaluation criteria.
///
/// A criterion is a named dimension ("Domain Fit") with a weight. Repository matching carries
/// weights as fractions summing to 1.0; web search carries them as percentages summing to 100.
/// Both conventions go through the same normalizer and validator, parameterised by
/// [`WeightUnit`].
use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Keys that would shadow the fixed fields of an evaluation, either in the LLM's reply object or
/// as `{key}_score` next to `composite_score`.
pub const RESERVED_KEYS: [&str; 5] = ["composite", "name", "justification", "strengths", "concerns"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Slug derived from the label; filled in from the label when a caller omits it.
    #[serde(default)]
    pub key: String,
    pub label: String,
    pub weight: f64,
}

impl Criterion {
    pub fn new(label: impl Into<String>, weight: f64) -> Self {
        let label = label.into();
        Self {
            key: slug_key(&label),
            label,
            weight,
        }
    }

    /// Returns the criterion with `key` derived from the label when it is blank.
    pub fn with_derived_key(mut self) -> Self {
        if self.key.trim().is_empty() {
            self.key = slug_key(&self.label);
        }
        self
    }

    /// Response field carrying this criterion's score, e.g. `domain_fit_score`.
    pub fn score_field(&self) -> String {
        format!("{}_score", self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightUnit {
    /// Weights sum to 1.0, normalized to 3 decimals.
    Fraction,
    /// Weights sum to 100, normalized to 1 decimal.
    Percent,
}

impl WeightUnit {
    pub fn target(self) -> f64 {
        match self {
            WeightUnit::Fraction => 1.0,
            WeightUnit::Percent => 100.0,
        }
    }

    fn decimals(self) -> i32 {
        match self {
            WeightUnit::Fraction => 3,
            WeightUnit::Percent => 1,
        }
    }

    /// Allowed distance between the weight total and the target: 0.01 percentage points.
    pub fn tolerance(self) -> f64 {
        match self {
            WeightUnit::Fraction => 0.0001,
            WeightUnit::Percent => 0.01,
        }
    }

    pub fn to_fraction(self, weight: f64) -> f64 {
        weight / self.target()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CriteriaError {
    #[error("at least one evaluation criterion is required")]
    Empty,

    #[error("criterion name cannot be empty (position {0})")]
    BlankLabel(usize),

    #[error("criterion weight must be a non-negative number: {label}")]
    InvalidWeight { label: String },

    #[error("criterion name must contain letters or digits: {label}")]
    EmptyKey { label: String },

    #[error("criterion name '{0}' is reserved")]
    ReservedKey(String),

    #[error("duplicate criterion '{0}'")]
    DuplicateKey(String),

    #[error("total weight must equal {target}, got {total}")]
    Total { total: f64, target: f64 },
}

/// Lowercase the label and collapse every run of characters outside `[a-z0-9]` into `_`.
pub fn slug_key(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_sep = false;
    for c in label.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }
    out
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn total_weight(criteria: &[Criterion]) -> f64 {
    criteria.iter().map(|c| c.weight).sum()
}

/// Rescale `weights` so they sum exactly to `unit.target()`.
///
/// Each weight is divided by the total, rounded to the unit's precision, and the rounding
/// residual is added to the largest entry (first occurrence on ties). A non-positive total
/// leaves the weights unchanged.
pub fn normalize_values(weights: &[f64], unit: WeightUnit) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return weights.to_vec();
    }

    let target = unit.target();
    let mut normalized: Vec<f64> = weights
        .iter()
        .map(|w| round_to(w / total * target, unit.decimals()))
        .collect();

    let residual = target - normalized.iter().sum::<f64>();
    if let Some(largest) = index_of_largest(weights) {
        normalized[largest] += residual;
    }
    normalized
}

pub fn normalize_weights(criteria: &[Criterion], unit: WeightUnit) -> Vec<Criterion> {
    let weights: Vec<f64> = criteria.iter().map(|c| c.weight).collect();
    criteria
        .iter()
        .zip(normalize_values(&weights, unit))
        .map(|(c, weight)| Criterion {
            weight,
            ..c.clone()
        })
        .collect()
}

fn index_of_largest(weights: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &w) in weights.iter().enumerate() {
        match best {
            Some((_, b)) if w <= b => {}
            _ => best = Some((i, w)),
        }
    }
    best.map(|(i, _)| i)
}

/// Check that criteria are submittable: labels present, weights non-negative, keys non-empty,
/// unreserved and unique, and the total within tolerance of the unit's target.
pub fn validate_criteria(criteria: &[Criterion], unit: WeightUnit) -> Result<(), CriteriaError> {
    if criteria.is_empty() {
        return Err(CriteriaError::Empty);
    }

    let mut seen = HashSet::new();
    for (i, c) in criteria.iter().enumerate() {
        let label = c.label.trim();
        if label.is_empty() {
            return Err(CriteriaError::BlankLabel(i + 1));
        }
        if !c.weight.is_finite() || c.weight < 0.0 {
            return Err(CriteriaError::InvalidWeight {
                label: label.to_string(),
            });
        }
        let key = if c.key.trim().is_empty() {
            slug_key(label)
        } else {
            c.key.clone()
        };
        if key.is_empty() {
            return Err(CriteriaError::EmptyKey {
                label: label.to_string(),
            });
        }
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(CriteriaError::ReservedKey(key));
        }
        if !seen.insert(key.clone()) {
            return Err(CriteriaError::DuplicateKey(key));
        }
    }

    let total = total_weight(criteria);
    let target = unit.target();
    if (total - target).abs() > unit.tolerance() {
        return Err(CriteriaError::Total {
            total: round_to(total, 4),
            target,
        });
    }
    Ok(())
}

pub fn default_criteria(unit: WeightUnit) -> Vec<Criterion> {
    let scale = unit.target();
    vec![
        Criterion::new("Domain Fit", 0.4 * scale),
        Criterion::new("Tools/Stack Fit", 0.3 * scale),
        Criterion::new("Experience", 0.2 * scale),
        Criterion::new("Scalability", 0.1 * scale),
    ]
}

/// Read a 0–100 score out of an LLM payload. Numbers and numeric strings are clamped and
/// rounded to one decimal; anything else scores 0.
pub fn score_from_value(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => round_to(v.clamp(0.0, 100.0), 1),
        _ => 0.0,
    }
}

/// Weighted sum of per-criterion scores, rounded to two decimals.
///
/// `scores` is keyed by criterion key; missing scores count as 0.
pub fn composite_score(
    scores: &BTreeMap<String, f64>,
    criteria: &[Criterion],
    unit: WeightUnit,
) -> f64 {
    let total: f64 = criteria
        .iter()
        .map(|c| scores.get(&c.key).copied().unwrap_or(0.0) * unit.to_fraction(c.weight))
        .sum();
    round_to(total, 2)
}
