//! # Canonical Pack Hashing
//!
//! Two packs hash equal iff they carry the same id, the same multiset of
//! `(identity, rarity, holo)` items, the same declared best rarity and the
//! same config reference. Item order does not matter: a client reordering
//! cards must not dodge duplicate detection.
//!
//! Uses SipHash-2-4 (128-bit). Every string is length-prefixed so that
//! `("ab", "c")` and `("a", "bc")` never collide.

use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher24};
use std::fmt;
use std::hash::Hasher;

use crate::pack::Pack;

/// Default SipHash keys for canonical pack hashes.
const PACK_HASH_KEYS: (u64, u64) = (0x6461_6464_6563_6b21, 0x7061_636b_2d67_7561);

/// 128-bit canonical pack fingerprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PackHash(pub u128);

impl fmt::Display for PackHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<PackHash> for String {
    fn from(hash: PackHash) -> Self {
        hash.to_string()
    }
}

impl TryFrom<String> for PackHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        u128::from_str_radix(&value, 16)
            .map(Self)
            .map_err(|e| format!("invalid pack hash {value}: {e}"))
    }
}

/// Computes canonical pack hashes with a fixed key pair.
#[derive(Clone, Copy, Debug)]
pub struct PackHasher {
    keys: (u64, u64),
}

impl PackHasher {
    /// Hasher with the default keys.
    #[must_use]
    pub const fn new() -> Self {
        Self { keys: PACK_HASH_KEYS }
    }

    /// Hasher with deployment-specific keys.
    ///
    /// All instances sharing a duplicate cache must use the same keys.
    #[must_use]
    pub const fn with_keys(k0: u64, k1: u64) -> Self {
        Self { keys: (k0, k1) }
    }

    /// Canonical hash of `pack`.
    #[must_use]
    pub fn hash_pack(&self, pack: &Pack) -> PackHash {
        let mut items: Vec<(&str, u8, bool)> = pack
            .items
            .iter()
            .map(|i| (i.id.as_str(), i.rarity.tier(), i.holo))
            .collect();
        items.sort_unstable();

        let mut hasher = SipHasher24::new_with_keys(self.keys.0, self.keys.1);
        write_str(&mut hasher, &pack.id);
        hasher.write_u64(items.len() as u64);
        for (id, tier, holo) in items {
            write_str(&mut hasher, id);
            hasher.write_u8(tier);
            hasher.write_u8(u8::from(holo));
        }
        hasher.write_u8(pack.best_rarity.tier());
        write_str(&mut hasher, &pack.config_ref);

        let folded = hasher.finish128();
        PackHash((u128::from(folded.h1) << 64) | u128::from(folded.h2))
    }
}

impl Default for PackHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical hash of `pack` with the default keys.
#[must_use]
pub fn canonical_pack_hash(pack: &Pack) -> PackHash {
    PackHasher::new().hash_pack(pack)
}

#[inline]
fn write_str(hasher: &mut SipHasher24, value: &str) {
    hasher.write_u64(value.len() as u64);
    hasher.write(value.as_bytes());
}
