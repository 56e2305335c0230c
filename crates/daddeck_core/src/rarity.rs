//! # Rarity Tiers
//!
//! The ordered classification shared by the generator's odds, the validator's
//! slot rules and the anomaly score.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rarity tier for cards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Rarity {
    /// Common cards - ~70% of pulls
    Common = 0,
    /// Uncommon cards - ~20% of pulls
    Uncommon = 1,
    /// Rare cards - ~7% of pulls
    Rare = 2,
    /// Epic cards - ~2.5% of pulls
    Epic = 3,
    /// Legendary cards - ~0.4% of pulls
    Legendary = 4,
    /// Mythic cards - ~0.1% of pulls
    Mythic = 5,
}

impl Rarity {
    /// Every tier, lowest first.
    pub const ALL: [Self; 6] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Legendary,
        Self::Mythic,
    ];

    /// The top tier.
    pub const TOP: Self = Self::Mythic;

    /// Base pull rate for this rarity (in basis points, 10000 = 100%).
    #[inline]
    #[must_use]
    pub const fn base_drop_rate_bp(self) -> u32 {
        match self {
            Self::Common => 7000,
            Self::Uncommon => 2000,
            Self::Rare => 700,
            Self::Epic => 250,
            Self::Legendary => 40,
            Self::Mythic => 10,
        }
    }

    /// Position of the tier, `0` for common.
    #[inline]
    #[must_use]
    pub const fn tier(self) -> u8 {
        self as u8
    }

    /// Converts from u8, saturating at the top tier.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Common,
            1 => Self::Uncommon,
            2 => Self::Rare,
            3 => Self::Epic,
            4 => Self::Legendary,
            _ => Self::Mythic,
        }
    }

    /// Lowercase name as used by the public card API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
            Self::Mythic => "mythic",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown rarity: {s}"))
    }
}
