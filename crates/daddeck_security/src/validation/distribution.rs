//! Slot-by-slot rarity validation against the generation config.

use daddeck_core::{GenerationConfig, Pack, Rarity, Severity};
use serde_json::json;

use super::{CheckKind, CheckOutcome, MalformedInput, Violation, ViolationKind};

/// A rarity present more often than any legal pack allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Impossible {
    pub rarity: Rarity,
    pub count: usize,
    pub max: usize,
}

impl Impossible {
    pub(crate) fn into_violation(self, check: CheckKind) -> Violation {
        Violation::new(
            ViolationKind::ImpossibleCombination,
            check,
            Severity::Critical,
            format!(
                "{} {} item(s) in one pack, at most {} possible",
                self.count, self.rarity, self.max
            ),
        )
        .with_details(json!({
            "rarity": self.rarity,
            "count": self.count,
            "max": self.max,
        }))
    }
}

/// Rarities whose count exceeds the tighter of the explicit cap and the
/// number of slots able to produce them.
pub(crate) fn impossible_combinations(pack: &Pack, config: &GenerationConfig) -> Vec<Impossible> {
    let histogram = pack.rarity_histogram();
    Rarity::ALL
        .iter()
        .filter_map(|&rarity| {
            let count = histogram[usize::from(rarity.tier())];
            let max = config.max_possible(rarity);
            (count > max).then_some(Impossible { rarity, count, max })
        })
        .collect()
}

pub(crate) fn check(pack: &Pack, config: &GenerationConfig) -> Result<CheckOutcome, MalformedInput> {
    if pack.items.is_empty() {
        return Err(MalformedInput::new("pack has no items"));
    }
    if config.slots.is_empty() {
        return Err(MalformedInput::new(format!("generation config {} has no slots", config.id)));
    }

    let mut outcome = CheckOutcome::default();

    if pack.config_ref != config.id {
        outcome.violations.push(
            Violation::new(
                ViolationKind::ConfigMismatch,
                CheckKind::Distribution,
                Severity::Critical,
                format!("pack claims config {} but was checked against {}", pack.config_ref, config.id),
            )
            .with_details(json!({ "claimed": pack.config_ref, "expected": config.id })),
        );
    }

    if pack.items.len() != config.slots.len() {
        outcome.violations.push(
            Violation::new(
                ViolationKind::SlotCountMismatch,
                CheckKind::Distribution,
                Severity::Critical,
                format!("pack has {} items, config has {} slots", pack.items.len(), config.slots.len()),
            )
            .with_details(json!({
                "items": pack.items.len(),
                "slots": config.slots.len(),
            })),
        );
    }

    for (slot, (item, rule)) in pack.items.iter().zip(&config.slots).enumerate() {
        if !rule.permits(item.rarity) {
            outcome.violations.push(
                Violation::new(
                    ViolationKind::RarityMismatch,
                    CheckKind::Distribution,
                    Severity::Critical,
                    format!("slot {slot} cannot produce {}", item.rarity),
                )
                .with_details(json!({
                    "slot": slot,
                    "item_id": item.id,
                    "expected": rule.permitted(),
                    "actual": item.rarity,
                })),
            );
        }
    }

    let actual_best = pack.actual_best_rarity();
    if actual_best != Some(pack.best_rarity) {
        outcome.violations.push(
            Violation::new(
                ViolationKind::BestRarityMismatch,
                CheckKind::Distribution,
                Severity::Critical,
                format!("pack declares best rarity {}", pack.best_rarity),
            )
            .with_details(json!({ "declared": pack.best_rarity, "actual": actual_best })),
        );
    }

    let impossible = impossible_combinations(pack, config);
    for found in &impossible {
        outcome.violations.push(found.into_violation(CheckKind::Distribution));
    }

    let histogram = pack.rarity_histogram();
    for rarity in Rarity::ALL {
        let Some(threshold) = config.improbable_threshold(rarity) else {
            continue;
        };
        let count = histogram[usize::from(rarity.tier())];
        if count >= threshold as usize && !impossible.iter().any(|i| i.rarity == rarity) {
            outcome.warnings.push(
                Violation::new(
                    ViolationKind::ImprobableCombination,
                    CheckKind::Distribution,
                    Severity::Low,
                    format!("{count} {rarity} item(s) in one pack is unusual"),
                )
                .with_details(json!({ "rarity": rarity, "count": count, "threshold": threshold })),
            );
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use daddeck_core::Item;

    fn pack(config: &GenerationConfig, rarities: &[Rarity]) -> Pack {
        let items = rarities
            .iter()
            .enumerate()
            .map(|(i, &r)| Item::new(format!("card-{i}"), r))
            .collect();
        Pack::new("p", items, chrono::Utc::now(), &config.id)
    }

    fn kinds(outcome: &CheckOutcome) -> Vec<ViolationKind> {
        outcome.violations.iter().map(|v| v.kind).collect()
    }

    const LEGAL: [Rarity; 6] = [
        Rarity::Common,
        Rarity::Common,
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Mythic,
    ];

    #[test]
    fn test_legal_standard_pack_is_clean() {
        let config = GenerationConfig::standard();
        let outcome = check(&pack(&config, &LEGAL), &config).unwrap();
        assert!(outcome.violations.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_slot_mismatch_names_slot() {
        let config = GenerationConfig::standard();
        let mut rarities = LEGAL;
        rarities[0] = Rarity::Epic;
        let outcome = check(&pack(&config, &rarities), &config).unwrap();
        assert_eq!(kinds(&outcome), vec![ViolationKind::RarityMismatch]);
        assert_eq!(outcome.violations[0].details["slot"], 0);
        assert_eq!(outcome.violations[0].details["actual"], "epic");
    }

    #[test]
    fn test_wrong_item_count() {
        let config = GenerationConfig::standard();
        let outcome = check(&pack(&config, &LEGAL[..5]), &config).unwrap();
        assert!(kinds(&outcome).contains(&ViolationKind::SlotCountMismatch));
    }

    #[test]
    fn test_lying_about_best_rarity() {
        let config = GenerationConfig::standard();
        let mut forged = pack(&config, &LEGAL);
        forged.best_rarity = Rarity::Legendary;
        let outcome = check(&forged, &config).unwrap();
        assert_eq!(kinds(&outcome), vec![ViolationKind::BestRarityMismatch]);
    }

    #[test]
    fn test_config_reference_must_match() {
        let config = GenerationConfig::standard();
        let mut forged = pack(&config, &LEGAL);
        forged.config_ref = "premium-v1".to_string();
        let outcome = check(&forged, &config).unwrap();
        assert_eq!(kinds(&outcome), vec![ViolationKind::ConfigMismatch]);
    }

    #[test]
    fn test_two_mythics_are_impossible() {
        let config = GenerationConfig::standard();
        let mut rarities = LEGAL;
        rarities[4] = Rarity::Mythic;
        let outcome = check(&pack(&config, &rarities), &config).unwrap();
        // Slot 4 cannot produce mythic, and one pack cannot hold two.
        assert!(kinds(&outcome).contains(&ViolationKind::RarityMismatch));
        assert!(kinds(&outcome).contains(&ViolationKind::ImpossibleCombination));
    }

    #[test]
    fn test_two_legendaries_in_premium_only_warn() {
        let config = GenerationConfig::premium();
        let rarities = [
            Rarity::Common,
            Rarity::Common,
            Rarity::Uncommon,
            Rarity::Rare,
            Rarity::Legendary,
            Rarity::Legendary,
        ];
        let outcome = check(&pack(&config, &rarities), &config).unwrap();
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, ViolationKind::ImprobableCombination);
    }

    #[test]
    fn test_empty_pack_is_malformed() {
        let config = GenerationConfig::standard();
        assert!(check(&pack(&config, &[]), &config).is_err());
    }
}
