//! Replay detection over canonical pack hashes.

use chrono::{DateTime, Duration, Utc};
use daddeck_core::{Pack, PackHash, Severity};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};

use super::{CheckKind, CheckOutcome, MalformedInput, Violation, ViolationKind};

/// Recently seen pack hashes.
///
/// `check_and_insert` must be atomic: of several concurrent submissions of
/// the same hash inside its window exactly one misses.
pub trait RecentPackCache: Send + Sync {
    /// If `hash` was seen less than `ttl` ago, returns when, leaving the
    /// cache untouched. Otherwise records it at `now` and returns `None`.
    fn check_and_insert(
        &self,
        hash: PackHash,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<DateTime<Utc>>;

    /// Number of hashes held.
    fn len(&self) -> usize;

    /// Returns true if nothing is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything.
    fn clear(&self);
}

#[derive(Default)]
struct CacheInner {
    seen: HashMap<PackHash, DateTime<Utc>>,
    /// Insertion order; may hold stale pairs for hashes re-inserted later.
    order: VecDeque<(PackHash, DateTime<Utc>)>,
}

impl CacheInner {
    fn forget_front(&mut self) {
        if let Some((hash, at)) = self.order.pop_front() {
            if self.seen.get(&hash) == Some(&at) {
                self.seen.remove(&hash);
            }
        }
    }
}

/// Bounded in-memory cache with lazy TTL eviction and oldest-first
/// eviction at capacity.
pub struct MemoryPackCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl MemoryPackCache {
    /// Creates a cache holding at most `capacity` hashes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }
}

impl RecentPackCache for MemoryPackCache {
    fn check_and_insert(
        &self,
        hash: PackHash,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<DateTime<Utc>> {
        let mut inner = self.inner.lock();

        while let Some(&(_, at)) = inner.order.front() {
            if now - at >= ttl {
                inner.forget_front();
            } else {
                break;
            }
        }

        if let Some(&seen) = inner.seen.get(&hash) {
            if now - seen < ttl {
                return Some(seen);
            }
        }

        inner.seen.insert(hash, now);
        inner.order.push_back((hash, now));
        while inner.seen.len() > self.capacity {
            inner.forget_front();
        }
        None
    }

    fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.seen.clear();
        inner.order.clear();
    }
}

impl std::fmt::Debug for MemoryPackCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPackCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Hashes `pack` and looks it up. A hit is a critical violation.
pub(crate) fn check(
    pack: &Pack,
    hash: PackHash,
    cache: &dyn RecentPackCache,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<CheckOutcome, MalformedInput> {
    if pack.id.trim().is_empty() {
        return Err(MalformedInput::new("pack id is empty"));
    }

    let mut outcome = CheckOutcome::default();
    if let Some(first_seen) = cache.check_and_insert(hash, now, ttl) {
        outcome.violations.push(
            Violation::new(
                ViolationKind::DuplicatePack,
                CheckKind::Duplicate,
                Severity::Critical,
                format!("pack {} was already submitted", pack.id),
            )
            .with_details(json!({
                "pack_id": pack.id,
                "hash": hash,
                "first_seen": first_seen,
                "age_ms": (now - first_seen).num_milliseconds(),
            })),
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_hit_inside_ttl_only() {
        let cache = MemoryPackCache::new(10);
        let ttl = Duration::milliseconds(1000);
        assert_eq!(cache.check_and_insert(PackHash(1), at(0), ttl), None);
        assert_eq!(cache.check_and_insert(PackHash(1), at(999), ttl), Some(at(0)));
        // A hit does not refresh the timestamp.
        assert_eq!(cache.check_and_insert(PackHash(1), at(1000), ttl), None);
        assert_eq!(cache.check_and_insert(PackHash(1), at(1500), ttl), Some(at(1000)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = MemoryPackCache::new(2);
        let ttl = Duration::hours(1);
        cache.check_and_insert(PackHash(1), at(0), ttl);
        cache.check_and_insert(PackHash(2), at(1), ttl);
        cache.check_and_insert(PackHash(3), at(2), ttl);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.check_and_insert(PackHash(1), at(3), ttl), None);
        assert_eq!(cache.check_and_insert(PackHash(3), at(4), ttl), Some(at(2)));
    }

    #[test]
    fn test_concurrent_inserts_miss_once_per_hash() {
        use std::sync::{Arc, Barrier};

        let cache = Arc::new(MemoryPackCache::new(1000));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8u128)
            .map(|thread| {
                let (cache, barrier) = (Arc::clone(&cache), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    let ttl = Duration::hours(1);
                    let shared = usize::from(cache.check_and_insert(PackHash(7), at(0), ttl).is_none());
                    let own = (0..50)
                        .filter(|i| {
                            let hash = PackHash(1_000 + thread * 100 + i);
                            cache.check_and_insert(hash, at(0), ttl).is_none()
                        })
                        .count();
                    (shared, own)
                })
            })
            .collect();

        let results: Vec<(usize, usize)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().map(|r| r.0).sum::<usize>(), 1);
        assert!(results.iter().all(|r| r.1 == 50));
        assert_eq!(cache.len(), 401);
    }

    #[test]
    fn test_expired_entries_are_dropped_lazily() {
        let cache = MemoryPackCache::new(100);
        let ttl = Duration::milliseconds(10);
        for i in 0..50 {
            cache.check_and_insert(PackHash(i), at(0), ttl);
        }
        cache.check_and_insert(PackHash(999), at(10), ttl);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
