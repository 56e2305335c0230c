//! Reference pack generator shared by the integration tests.
//!
//! Follows a [`GenerationConfig`] exactly, so every pack it opens is one the
//! real generator could have produced.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use daddeck_core::{GenerationConfig, Item, Pack, Rarity, SlotRule};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Cards per rarity in the fake catalog.
const CATALOG_SIZE: u32 = 500;

/// Deterministic pack generator.
pub struct ReferenceGenerator {
    rng: ChaCha8Rng,
    opened: u64,
}

impl ReferenceGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            opened: 0,
        }
    }

    /// Opens one pack stamped with the wall clock.
    pub fn open(&mut self, config: &GenerationConfig) -> Pack {
        self.open_at(config, Utc::now())
    }

    /// Opens one pack stamped `created_at`.
    pub fn open_at(&mut self, config: &GenerationConfig, created_at: DateTime<Utc>) -> Pack {
        self.opened += 1;
        let items = config
            .slots
            .iter()
            .enumerate()
            .map(|(slot, rule)| {
                let rarity = self.draw(rule);
                // Slot index in the id keeps identities distinct within a pack.
                let card = self.rng.gen_range(0..CATALOG_SIZE);
                let id = format!("{rarity}-{card:03}-s{slot}");
                if self.rng.gen_bool(0.1) {
                    Item::holo(id, rarity)
                } else {
                    Item::new(id, rarity)
                }
            })
            .collect();
        Pack::new(format!("ref-pack-{:06}", self.opened), items, created_at, &config.id)
    }

    fn draw(&mut self, rule: &SlotRule) -> Rarity {
        match rule {
            SlotRule::Guaranteed { rarity } => *rarity,
            SlotRule::Pool { entries } => {
                let total = rule.total_weight();
                let mut roll = self.rng.gen_range(0..total);
                for entry in entries {
                    if roll < entry.weight {
                        return entry.rarity;
                    }
                    roll -= entry.weight;
                }
                Rarity::Common
            }
        }
    }
}
