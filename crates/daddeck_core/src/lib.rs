//! # DadDeck Core
//!
//! The shared vocabulary of the pack guard.
//!
//! ## Contents
//!
//! - **Domain types**: [`Rarity`], [`Pack`], [`GenerationConfig`], [`Severity`]
//! - **Hashing**: order-independent canonical pack fingerprints
//! - **Time**: injectable [`Clock`]s so window and expiry logic is testable
//! - **Identifiers**: normalization of opaque fingerprints
//! - **Storage**: namespaced [`KeyValueStore`]s (memory, file)
//!
//! ## Example
//!
//! ```rust
//! use daddeck_core::{canonical_pack_hash, GenerationConfig, Item, Pack, Rarity};
//!
//! let config = GenerationConfig::standard();
//! let pack = Pack::new(
//!     "pack-42",
//!     vec![Item::new("grillmaster-gary", Rarity::Common)],
//!     chrono::Utc::now(),
//!     &config.id,
//! );
//! println!("{}", canonical_pack_hash(&pack));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod hash;
pub mod identifier;
pub mod pack;
pub mod rarity;
pub mod severity;
pub mod store;
pub mod time;

pub use error::{ConfigError, StoreError, StoreResult};
pub use hash::{canonical_pack_hash, PackHash, PackHasher};
pub use identifier::{normalize_identifier, ANONYMOUS};
pub use pack::{GenerationConfig, Item, Pack, PackType, PoolEntry, RarityCount, SlotRule};
pub use rarity::Rarity;
pub use severity::Severity;
pub use store::{FileStore, KeyValueStore, MemoryStore, Namespace, SharedStore};
pub use time::{
    elapsed_ms, millis, saturating_add, seconds_until, system_clock, Clock, ManualClock,
    SharedClock, SystemClock, MAX_DURATION_MS,
};
