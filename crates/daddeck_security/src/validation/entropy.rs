//! Entropy of the item identities in a pack.

use daddeck_core::{Pack, Severity};
use serde_json::json;
use std::collections::BTreeMap;

use super::{CheckKind, CheckOutcome, MalformedInput, ValidatorConfig, Violation, ViolationKind};

/// Slack for float comparisons against the floor.
const EPSILON: f64 = 1e-9;

/// Shannon entropy, in bits, of a multiset given by its counts.
#[must_use]
pub fn shannon_entropy<I>(counts: I) -> f64
where
    I: IntoIterator<Item = usize>,
{
    let counts: Vec<usize> = counts.into_iter().filter(|&c| c > 0).collect();
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

pub(crate) fn check(pack: &Pack, config: &ValidatorConfig) -> Result<CheckOutcome, MalformedInput> {
    if pack.items.is_empty() {
        return Err(MalformedInput::new("pack has no items"));
    }
    if let Some(slot) = pack.items.iter().position(|i| i.id.trim().is_empty()) {
        return Err(MalformedInput::new(format!("item in slot {slot} has no id")));
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for item in &pack.items {
        *counts.entry(item.id.as_str()).or_insert(0) += 1;
    }

    let mut outcome = CheckOutcome::default();
    let n = pack.items.len();
    let entropy = shannon_entropy(counts.values().copied());

    let repeated: Vec<(&str, usize)> = counts
        .iter()
        .filter(|(_, &c)| c > 1)
        .map(|(&id, &c)| (id, c))
        .collect();
    if !repeated.is_empty() {
        outcome.violations.push(
            Violation::new(
                ViolationKind::DuplicateItems,
                CheckKind::Entropy,
                Severity::High,
                format!("{} item id(s) appear more than once", repeated.len()),
            )
            .with_details(json!({
                "repeated": repeated
                    .iter()
                    .map(|(id, c)| json!({ "id": id, "count": c }))
                    .collect::<Vec<_>>(),
                "entropy_bits": entropy,
            })),
        );
    }

    if n >= 2 {
        let max_entropy = (n as f64).log2();
        let ratio = entropy / max_entropy;
        if ratio < config.entropy_ratio_warning {
            outcome.warnings.push(
                Violation::new(
                    ViolationKind::LowEntropyRatio,
                    CheckKind::Entropy,
                    Severity::Low,
                    format!("entropy is {:.0}% of the maximum", ratio * 100.0),
                )
                .with_details(json!({ "entropy_bits": entropy, "ratio": ratio })),
            );
        }

        let floor = config.entropy_floor_bits.min(max_entropy);
        if entropy + EPSILON < floor {
            outcome.violations.push(
                Violation::new(
                    ViolationKind::LowEntropy,
                    CheckKind::Entropy,
                    Severity::Medium,
                    format!("entropy {entropy:.2} bits is below the {floor:.2} bit floor"),
                )
                .with_details(json!({ "entropy_bits": entropy, "floor_bits": floor })),
            );
        }
    }

    Ok(outcome)
}
