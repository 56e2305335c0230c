//! # Packs and Generation Configs
//!
//! A [`Pack`] is what the generator hands back after an "open pack" action.
//! The guard only ever reads it. A [`GenerationConfig`] describes the odds the
//! generator was supposed to follow, slot by slot.
//!
//! ## Config Format
//!
//! ```toml
//! id = "standard-v1"
//! pack_type = "standard"
//!
//! [[slots]]
//! kind = "guaranteed"
//! rarity = "common"
//!
//! [[slots]]
//! kind = "pool"
//! entries = [
//!     { rarity = "rare", weight = 70 },
//!     { rarity = "mythic", weight = 2 },
//! ]
//!
//! [[max_per_pack]]
//! rarity = "mythic"
//! count = 1
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::rarity::Rarity;

/// A single card inside a pack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Card identity (catalog id).
    pub id: String,
    /// Rarity tier the generator assigned.
    pub rarity: Rarity,
    /// Special variant flag.
    #[serde(default)]
    pub holo: bool,
}

impl Item {
    /// Creates a non-holo item.
    #[must_use]
    pub fn new(id: impl Into<String>, rarity: Rarity) -> Self {
        Self { id: id.into(), rarity, holo: false }
    }

    /// Creates a holo item.
    #[must_use]
    pub fn holo(id: impl Into<String>, rarity: Rarity) -> Self {
        Self { id: id.into(), rarity, holo: true }
    }
}

/// An opened pack, immutable once generated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    /// Pack id assigned by the generator.
    pub id: String,
    /// Cards in slot order.
    pub items: Vec<Item>,
    /// When the pack was generated.
    pub created_at: DateTime<Utc>,
    /// Best rarity the generator claims the pack contains.
    pub best_rarity: Rarity,
    /// Id of the [`GenerationConfig`] the generator used.
    pub config_ref: String,
}

impl Pack {
    /// Builds a pack, declaring the best rarity from the items themselves.
    ///
    /// An empty item list declares `Common`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        items: Vec<Item>,
        created_at: DateTime<Utc>,
        config_ref: impl Into<String>,
    ) -> Self {
        let best_rarity = items.iter().map(|i| i.rarity).max().unwrap_or(Rarity::Common);
        Self {
            id: id.into(),
            items,
            created_at,
            best_rarity,
            config_ref: config_ref.into(),
        }
    }

    /// Highest rarity actually present.
    #[must_use]
    pub fn actual_best_rarity(&self) -> Option<Rarity> {
        self.items.iter().map(|i| i.rarity).max()
    }

    /// Number of items of the given rarity.
    #[must_use]
    pub fn count_of(&self, rarity: Rarity) -> usize {
        self.items.iter().filter(|i| i.rarity == rarity).count()
    }

    /// Per-tier counts indexed by [`Rarity::tier`].
    #[must_use]
    pub fn rarity_histogram(&self) -> [usize; 6] {
        let mut counts = [0usize; 6];
        for item in &self.items {
            counts[usize::from(item.rarity.tier())] += 1;
        }
        counts
    }
}

/// Pack product line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackType {
    /// Regular booster.
    #[default]
    Standard,
    /// Premium booster with richer odds.
    Premium,
}

/// A weighted rarity inside a pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Rarity that can be drawn.
    pub rarity: Rarity,
    /// Relative weight (higher = more common).
    pub weight: u32,
}

/// What a slot is allowed to contain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotRule {
    /// The slot always holds exactly this rarity.
    Guaranteed {
        /// The guaranteed rarity.
        rarity: Rarity,
    },
    /// The slot is drawn from a weighted pool.
    Pool {
        /// Weighted rarities; zero weights never occur.
        entries: Vec<PoolEntry>,
    },
}

impl SlotRule {
    /// Shorthand for a guaranteed slot.
    #[must_use]
    pub const fn guaranteed(rarity: Rarity) -> Self {
        Self::Guaranteed { rarity }
    }

    /// Shorthand for a pool slot from `(rarity, weight)` pairs.
    #[must_use]
    pub fn pool(entries: &[(Rarity, u32)]) -> Self {
        Self::Pool {
            entries: entries
                .iter()
                .map(|&(rarity, weight)| PoolEntry { rarity, weight })
                .collect(),
        }
    }

    /// Weight of `rarity` in this slot (guaranteed slots weigh 1 or 0).
    #[must_use]
    pub fn weight_of(&self, rarity: Rarity) -> u32 {
        match self {
            Self::Guaranteed { rarity: r } => u32::from(*r == rarity),
            Self::Pool { entries } => entries
                .iter()
                .filter(|e| e.rarity == rarity)
                .map(|e| e.weight)
                .sum(),
        }
    }

    /// Returns true if the slot can ever produce `rarity`.
    #[must_use]
    pub fn permits(&self, rarity: Rarity) -> bool {
        self.weight_of(rarity) > 0
    }

    /// Total pool weight.
    #[must_use]
    pub fn total_weight(&self) -> u32 {
        match self {
            Self::Guaranteed { .. } => 1,
            Self::Pool { entries } => entries.iter().map(|e| e.weight).sum(),
        }
    }

    /// Probability of drawing `rarity` from this slot.
    #[must_use]
    pub fn probability_of(&self, rarity: Rarity) -> f64 {
        let total = self.total_weight();
        if total == 0 {
            return 0.0;
        }
        f64::from(self.weight_of(rarity)) / f64::from(total)
    }

    /// Rarities this slot can produce, lowest first.
    #[must_use]
    pub fn permitted(&self) -> Vec<Rarity> {
        Rarity::ALL.into_iter().filter(|r| self.permits(*r)).collect()
    }
}

/// A `(rarity, count)` pair used for caps and thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarityCount {
    /// Rarity tier.
    pub rarity: Rarity,
    /// Item count.
    pub count: u32,
}

fn default_max_per_pack() -> Vec<RarityCount> {
    vec![RarityCount { rarity: Rarity::Mythic, count: 1 }]
}

fn default_improbable_at() -> Vec<RarityCount> {
    vec![RarityCount { rarity: Rarity::Legendary, count: 2 }]
}

/// The odds a generator follows for one pack product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Config id referenced by [`Pack::config_ref`].
    pub id: String,
    /// Product line.
    #[serde(default)]
    pub pack_type: PackType,
    /// One rule per slot, in slot order.
    pub slots: Vec<SlotRule>,
    /// Hard caps: more than `count` items of `rarity` can never be generated.
    #[serde(default = "default_max_per_pack")]
    pub max_per_pack: Vec<RarityCount>,
    /// Soft thresholds: `count` or more items of `rarity` is legal but unlikely.
    #[serde(default = "default_improbable_at")]
    pub improbable_at: Vec<RarityCount>,
}

impl GenerationConfig {
    /// The standard six-card booster.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            id: "standard-v1".to_string(),
            pack_type: PackType::Standard,
            slots: vec![
                SlotRule::guaranteed(Rarity::Common),
                SlotRule::guaranteed(Rarity::Common),
                SlotRule::guaranteed(Rarity::Common),
                SlotRule::guaranteed(Rarity::Uncommon),
                SlotRule::pool(&[(Rarity::Uncommon, 70), (Rarity::Rare, 25), (Rarity::Epic, 5)]),
                SlotRule::pool(&[
                    (Rarity::Rare, 70),
                    (Rarity::Epic, 22),
                    (Rarity::Legendary, 6),
                    (Rarity::Mythic, 2),
                ]),
            ],
            max_per_pack: default_max_per_pack(),
            improbable_at: default_improbable_at(),
        }
    }

    /// The premium six-card booster: two hit slots.
    #[must_use]
    pub fn premium() -> Self {
        Self {
            id: "premium-v1".to_string(),
            pack_type: PackType::Premium,
            slots: vec![
                SlotRule::guaranteed(Rarity::Common),
                SlotRule::guaranteed(Rarity::Common),
                SlotRule::guaranteed(Rarity::Uncommon),
                SlotRule::pool(&[(Rarity::Uncommon, 50), (Rarity::Rare, 50)]),
                SlotRule::pool(&[(Rarity::Rare, 60), (Rarity::Epic, 30), (Rarity::Legendary, 10)]),
                SlotRule::pool(&[(Rarity::Epic, 60), (Rarity::Legendary, 30), (Rarity::Mythic, 10)]),
            ],
            max_per_pack: default_max_per_pack(),
            improbable_at: default_improbable_at(),
        }
    }

    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config or has no slots.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if config.slots.is_empty() {
            return Err(ConfigError::Empty(config.id));
        }
        Ok(config)
    }

    /// Loads a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&text)
    }

    /// Explicit cap for `rarity`, if configured.
    #[must_use]
    pub fn cap_for(&self, rarity: Rarity) -> Option<u32> {
        self.max_per_pack
            .iter()
            .find(|c| c.rarity == rarity)
            .map(|c| c.count)
    }

    /// Soft threshold for `rarity`, if configured.
    #[must_use]
    pub fn improbable_threshold(&self, rarity: Rarity) -> Option<u32> {
        self.improbable_at
            .iter()
            .find(|c| c.rarity == rarity)
            .map(|c| c.count)
    }

    /// Number of slots that can produce `rarity`.
    #[must_use]
    pub fn slots_permitting(&self, rarity: Rarity) -> usize {
        self.slots.iter().filter(|s| s.permits(rarity)).count()
    }

    /// The most items of `rarity` one pack can legally hold.
    ///
    /// The tighter of the explicit cap and the structural slot limit.
    #[must_use]
    pub fn max_possible(&self, rarity: Rarity) -> usize {
        let structural = self.slots_permitting(rarity);
        match self.cap_for(rarity) {
            Some(cap) => structural.min(cap as usize),
            None => structural,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_new_declares_best_rarity() {
        let pack = Pack::new(
            "p1",
            vec![Item::new("a", Rarity::Common), Item::holo("b", Rarity::Epic)],
            Utc::now(),
            "standard-v1",
        );
        assert_eq!(pack.best_rarity, Rarity::Epic);
        assert_eq!(pack.actual_best_rarity(), Some(Rarity::Epic));
        assert_eq!(pack.count_of(Rarity::Common), 1);
        assert_eq!(pack.rarity_histogram()[3], 1);
    }

    #[test]
    fn test_slot_rule_weights() {
        let slot = SlotRule::pool(&[(Rarity::Rare, 3), (Rarity::Epic, 1), (Rarity::Mythic, 0)]);
        assert!(slot.permits(Rarity::Rare));
        assert!(!slot.permits(Rarity::Mythic));
        assert!(!slot.permits(Rarity::Common));
        assert!((slot.probability_of(Rarity::Epic) - 0.25).abs() < f64::EPSILON);
        assert_eq!(slot.permitted(), vec![Rarity::Rare, Rarity::Epic]);

        let fixed = SlotRule::guaranteed(Rarity::Common);
        assert!(fixed.permits(Rarity::Common));
        assert_eq!(fixed.weight_of(Rarity::Rare), 0);
    }

    #[test]
    fn test_standard_preset_limits() {
        let config = GenerationConfig::standard();
        assert_eq!(config.slots.len(), 6);
        assert_eq!(config.max_possible(Rarity::Mythic), 1);
        assert_eq!(config.max_possible(Rarity::Common), 3);
        assert_eq!(config.improbable_threshold(Rarity::Legendary), Some(2));
    }

    #[test]
    fn test_premium_allows_two_legendaries() {
        let config = GenerationConfig::premium();
        assert_eq!(config.max_possible(Rarity::Legendary), 2);
        assert_eq!(config.max_possible(Rarity::Mythic), 1);
    }

    #[test]
    fn test_from_toml_str() {
        let text = r#"
            id = "promo-v2"
            pack_type = "premium"

            [[slots]]
            kind = "guaranteed"
            rarity = "rare"

            [[slots]]
            kind = "pool"
            entries = [
                { rarity = "epic", weight = 9 },
                { rarity = "mythic", weight = 1 },
            ]

            [[max_per_pack]]
            rarity = "mythic"
            count = 1
        "#;
        let config = GenerationConfig::from_toml_str(text).unwrap();
        assert_eq!(config.id, "promo-v2");
        assert_eq!(config.pack_type, PackType::Premium);
        assert_eq!(config.slots[0], SlotRule::guaranteed(Rarity::Rare));
        assert_eq!(config.slots[1].weight_of(Rarity::Epic), 9);
        assert_eq!(config.improbable_threshold(Rarity::Legendary), Some(2));
    }

    #[test]
    fn test_from_toml_rejects_empty_slots() {
        let err = GenerationConfig::from_toml_str("id = \"x\"\nslots = []\n").unwrap_err();
        assert_eq!(err, ConfigError::Empty("x".to_string()));
    }
}
