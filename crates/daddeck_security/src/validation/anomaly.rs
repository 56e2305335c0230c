//! Statistical anomaly detection over weighted rarity scores.
//!
//! A pack's score is `Σ tier_base^tier`, with holo items multiplied by
//! `holo_multiplier`. Against a long enough history of accepted scores the
//! pack is judged by its z-score; otherwise (or when every historical score
//! is identical) the check falls back to the hard impossible-combination
//! rule.

use daddeck_core::{GenerationConfig, Pack, Severity};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;

use super::distribution::impossible_combinations;
use super::{CheckKind, CheckOutcome, MalformedInput, ValidatorConfig, Violation, ViolationKind};

/// Below this the history is treated as having no spread.
const MIN_STDDEV: f64 = 1e-9;

/// Weighted rarity score of `pack`.
#[must_use]
pub fn rarity_score(pack: &Pack, tier_base: f64, holo_multiplier: f64) -> f64 {
    pack.items
        .iter()
        .map(|item| {
            let base = tier_base.powi(i32::from(item.rarity.tier()));
            if item.holo {
                base * holo_multiplier
            } else {
                base
            }
        })
        .sum()
}

/// Population mean and standard deviation.
#[must_use]
pub fn mean_stddev(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}

/// Rolling window of accepted pack scores.
///
/// Feed it the `score` of every valid verdict and hand a snapshot back in
/// [`super::ValidateOptions::history`].
#[derive(Debug)]
pub struct ScoreHistory {
    capacity: usize,
    scores: Mutex<VecDeque<f64>>,
}

impl ScoreHistory {
    /// Keeps at most `capacity` scores.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            scores: Mutex::new(VecDeque::new()),
        }
    }

    /// Adds a score, dropping the oldest when full. Non-finite scores are
    /// ignored.
    pub fn record(&self, score: f64) {
        if !score.is_finite() {
            return;
        }
        let mut scores = self.scores.lock();
        if scores.len() == self.capacity {
            scores.pop_front();
        }
        scores.push_back(score);
    }

    /// Copy of the current window, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<f64> {
        self.scores.lock().iter().copied().collect()
    }

    /// Number of scores held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.lock().len()
    }

    /// Returns true if no score is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.lock().is_empty()
    }
}

impl Default for ScoreHistory {
    fn default() -> Self {
        Self::new(ValidatorConfig::default().score_history_capacity)
    }
}

pub(crate) fn check(
    pack: &Pack,
    generation: &GenerationConfig,
    history: Option<&[f64]>,
    config: &ValidatorConfig,
) -> Result<(f64, CheckOutcome), MalformedInput> {
    if pack.items.is_empty() {
        return Err(MalformedInput::new("pack has no items"));
    }
    let score = rarity_score(pack, config.tier_base, config.holo_multiplier);
    if !score.is_finite() {
        return Err(MalformedInput::new("rarity score is not finite"));
    }

    let mut outcome = CheckOutcome::default();
    let history = history.unwrap_or_default();
    if history.iter().any(|v| !v.is_finite()) {
        return Err(MalformedInput::new("score history holds a non-finite value"));
    }

    let stats = if history.len() >= config.min_history {
        mean_stddev(history).filter(|&(_, stddev)| stddev > MIN_STDDEV)
    } else {
        None
    };

    match stats {
        Some((mean, stddev)) => {
            let z = (score - mean) / stddev;
            let critical = z.abs() > config.critical_z;
            if critical || z.abs() > config.warning_z {
                let finding = Violation::new(
                    ViolationKind::StatisticalAnomaly,
                    CheckKind::Anomaly,
                    if critical { Severity::Critical } else { Severity::Low },
                    format!("rarity score {score:.2} is {z:.1} standard deviations from the mean"),
                )
                .with_details(json!({
                    "score": score,
                    "mean": mean,
                    "stddev": stddev,
                    "z_score": z,
                    "history": history.len(),
                }));
                if critical {
                    outcome.violations.push(finding);
                } else {
                    outcome.warnings.push(finding);
                }
            }
        }
        None => {
            for found in impossible_combinations(pack, generation) {
                outcome.violations.push(found.into_violation(CheckKind::Anomaly));
            }
        }
    }

    Ok((score, outcome))
}
