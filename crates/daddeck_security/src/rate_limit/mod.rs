//! # Rate Limiter
//!
//! Fixed-window counters per `(action, identifier)` with a burst allowance on
//! top of the steady limit.
//!
//! ```text
//! window_start           window_start + window_ms
//!      |<------------------ window ------------------>|
//!      [ max_requests steady ][ burst_allowed ] blocked
//! ```
//!
//! Once `now - window_start >= window_ms` the bucket resets wholesale.
//! Actions without a configured limit are unlimited.
//!
//! A limit may carry per-[`ApiTier`] overrides of `max_requests` and
//! `burst_allowed`; the window is shared by every tier of an action.
//!
//! ```toml
//! [rate_limits.api_request]
//! max_requests = 100
//! window_ms = 60000
//! burst_allowed = 20
//!
//! [rate_limits.api_request.tiers.pro]
//! max_requests = 1000
//! burst_allowed = 100
//! ```

use chrono::{DateTime, Utc};
use daddeck_core::{
    elapsed_ms, millis, normalize_identifier, saturating_add, seconds_until, system_clock,
    Namespace, SharedClock, SharedStore, MAX_DURATION_MS,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Namespace of persisted buckets.
const RATE_LIMIT_NAMESPACE: Namespace = Namespace::new("ratelimit", 1);

/// Tracked keys above which finished windows are pruned on insert.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 10_000;

/// API access tier of a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiTier {
    /// Unauthenticated or free accounts.
    Free,
    /// Basic plan.
    Basic,
    /// Pro plan.
    Pro,
    /// Enterprise plan.
    Enterprise,
}

impl ApiTier {
    /// Lowercase name, as sent in `X-RateLimit-Tier`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for ApiTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier override of an action's allowance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    /// Steady requests per window.
    pub max_requests: u32,
    /// Extra requests tolerated on top of `max_requests`.
    #[serde(default)]
    pub burst_allowed: u32,
}

/// Limit for one action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Steady requests per window.
    pub max_requests: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Extra requests tolerated on top of `max_requests`.
    #[serde(default)]
    pub burst_allowed: u32,
    /// Allowance overrides by caller tier.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tiers: BTreeMap<ApiTier, TierLimit>,
}

impl RateLimitConfig {
    /// Creates a limit.
    #[must_use]
    pub const fn new(max_requests: u32, window_ms: u64, burst_allowed: u32) -> Self {
        Self { max_requests, window_ms, burst_allowed, tiers: BTreeMap::new() }
    }

    /// Adds or replaces the override for `tier`.
    #[must_use]
    pub fn with_tier(mut self, tier: ApiTier, limit: TierLimit) -> Self {
        self.tiers.insert(tier, limit);
        self
    }

    /// Total requests accepted per window.
    #[must_use]
    pub const fn allowance(&self) -> u32 {
        self.max_requests.saturating_add(self.burst_allowed)
    }

    /// The limit that applies to a caller of `tier`.
    #[must_use]
    pub fn for_tier(&self, tier: Option<ApiTier>) -> Self {
        match tier.and_then(|t| self.tiers.get(&t)) {
            Some(over) => Self::new(over.max_requests, self.window_ms, over.burst_allowed),
            None => Self::new(self.max_requests, self.window_ms, self.burst_allowed),
        }
    }
}

/// Limits keyed by action name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimiterConfig {
    /// Per-action limits.
    pub limits: BTreeMap<String, RateLimitConfig>,
}

impl RateLimiterConfig {
    /// No limits at all.
    #[must_use]
    pub fn empty() -> Self {
        Self { limits: BTreeMap::new() }
    }

    /// Adds or replaces the limit for `action`.
    #[must_use]
    pub fn with(mut self, action: &str, limit: RateLimitConfig) -> Self {
        self.limits.insert(action.to_string(), limit);
        self
    }

    /// Limit for `action`, if any.
    #[must_use]
    pub fn get(&self, action: &str) -> Option<&RateLimitConfig> {
        self.limits.get(action)
    }

    /// Checks every window length.
    ///
    /// # Errors
    ///
    /// Returns a description of the first bad action.
    pub fn validate(&self) -> Result<(), String> {
        for (action, limit) in &self.limits {
            if limit.window_ms == 0 {
                return Err(format!("{action}.window_ms must be positive"));
            }
            if limit.window_ms > MAX_DURATION_MS {
                return Err(format!("{action}.window_ms exceeds {MAX_DURATION_MS} ms"));
            }
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::empty()
            .with("open_pack", RateLimitConfig::new(60, 60_000, 10))
            .with("generate_pack", RateLimitConfig::new(10, 60_000, 2))
            .with("api_request", RateLimitConfig::new(100, 60_000, 20))
    }
}

/// Counter state for one `(action, identifier)` key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    /// Steady requests used in this window.
    pub count: u32,
    /// Start of the current window.
    pub window_start: DateTime<Utc>,
    /// Burst requests used in this window.
    pub burst_count: u32,
}

impl RateLimitBucket {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self { count: 0, window_start: now, burst_count: 0 }
    }

    fn used(&self) -> u32 {
        self.count.saturating_add(self.burst_count)
    }

    fn window_elapsed(&self, now: DateTime<Utc>, window_ms: u64) -> bool {
        u64::try_from(elapsed_ms(self.window_start, now)).is_ok_and(|ms| ms >= window_ms)
    }
}

/// Result of a rate-limit check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Requests accepted per window (steady plus burst).
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
    /// Whether the next request would be refused.
    pub blocked: bool,
    /// Seconds until a request would be accepted again, when blocked.
    pub retry_after_seconds: Option<u64>,
    /// Caller tier the limit was resolved for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<ApiTier>,
}

impl RateLimitStatus {
    fn unlimited(now: DateTime<Utc>, tier: Option<ApiTier>) -> Self {
        Self {
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at: now,
            blocked: false,
            retry_after_seconds: None,
            tier,
        }
    }

    fn from_bucket(
        bucket: &RateLimitBucket,
        limit: &RateLimitConfig,
        tier: Option<ApiTier>,
        now: DateTime<Utc>,
    ) -> Self {
        let allowance = limit.allowance();
        let remaining = allowance.saturating_sub(bucket.used());
        let reset_at = saturating_add(bucket.window_start, millis(limit.window_ms));
        let blocked = remaining == 0;
        Self {
            limit: allowance,
            remaining,
            reset_at,
            blocked,
            retry_after_seconds: blocked.then(|| seconds_until(now, reset_at).max(1)),
            tier,
        }
    }

    /// HTTP headers describing this status.
    ///
    /// `X-RateLimit-Tier` is only present for a tiered caller and
    /// `Retry-After` only when blocked.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.timestamp().to_string()),
        ];
        if let Some(tier) = self.tier {
            headers.push(("X-RateLimit-Tier", tier.to_string()));
        }
        if let Some(retry) = self.retry_after_seconds {
            headers.push(("Retry-After", retry.to_string()));
        }
        headers
    }
}

/// The rate limiter.
///
/// One lock covers lookup, window roll-over, increment and persistence, so
/// concurrent requests for the same key are serialized.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, RateLimitBucket>>,
    store: Option<SharedStore>,
    clock: SharedClock,
    degraded: AtomicBool,
    prune_threshold: usize,
}

impl RateLimiter {
    /// In-memory limiter on the system clock.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::open(config, None, system_clock())
    }

    /// Limiter persisting buckets to `store`.
    ///
    /// Buckets are loaded lazily the first time a key is seen.
    #[must_use]
    pub fn open(config: RateLimiterConfig, store: Option<SharedStore>, clock: SharedClock) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            store,
            clock,
            degraded: AtomicBool::new(false),
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
        }
    }

    /// Prunes finished windows whenever a new key would push the map past
    /// `threshold` entries.
    #[must_use]
    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold.max(1);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Reports the state of a key without consuming a request.
    #[must_use]
    pub fn check(&self, action: &str, identifier: &str) -> RateLimitStatus {
        self.check_tier(action, identifier, None)
    }

    /// [`RateLimiter::check`] for a caller of `tier`.
    #[must_use]
    pub fn check_tier(
        &self,
        action: &str,
        identifier: &str,
        tier: Option<ApiTier>,
    ) -> RateLimitStatus {
        let now = self.clock.now();
        let Some(limit) = self.config.get(action) else {
            return RateLimitStatus::unlimited(now, tier);
        };
        let limit = limit.for_tier(tier);
        let key = bucket_key(action, identifier);

        let mut buckets = self.buckets.lock();
        let bucket = self.current_bucket(&mut buckets, &key, &limit, now);
        RateLimitStatus::from_bucket(bucket, &limit, tier, now)
    }

    /// Consumes one request if allowed.
    ///
    /// Returns false, without counting anything, when the key is already at
    /// its allowance.
    pub fn record(&self, action: &str, identifier: &str) -> bool {
        self.acquire(action, identifier).is_some()
    }

    /// [`RateLimiter::record`] for a caller of `tier`.
    pub fn record_tier(&self, action: &str, identifier: &str, tier: Option<ApiTier>) -> bool {
        self.acquire_tier(action, identifier, tier).is_some()
    }

    /// Consumes one request if allowed and returns the updated status.
    ///
    /// `None` means the request was refused; call [`RateLimiter::check`] for
    /// the retry hint.
    pub fn acquire(&self, action: &str, identifier: &str) -> Option<RateLimitStatus> {
        self.acquire_tier(action, identifier, None)
    }

    /// [`RateLimiter::acquire`] for a caller of `tier`.
    ///
    /// The bucket is shared across tiers; only the allowance changes.
    pub fn acquire_tier(
        &self,
        action: &str,
        identifier: &str,
        tier: Option<ApiTier>,
    ) -> Option<RateLimitStatus> {
        let now = self.clock.now();
        let Some(limit) = self.config.get(action) else {
            return Some(RateLimitStatus::unlimited(now, tier));
        };
        let limit = limit.for_tier(tier);
        let key = bucket_key(action, identifier);

        let mut buckets = self.buckets.lock();
        let bucket = self.current_bucket(&mut buckets, &key, &limit, now);
        if bucket.used() >= limit.allowance() {
            tracing::debug!(action, key = %key, tier = ?tier, "rate limit exceeded");
            return None;
        }
        if bucket.count < limit.max_requests {
            bucket.count += 1;
        } else {
            bucket.burst_count += 1;
        }
        let bucket = *bucket;
        self.persist(&key, Some(&bucket));
        Some(RateLimitStatus::from_bucket(&bucket, &limit, tier, now))
    }

    /// Clears the bucket for a key.
    pub fn reset(&self, action: &str, identifier: &str) {
        let key = bucket_key(action, identifier);
        let mut buckets = self.buckets.lock();
        buckets.remove(&key);
        self.persist(&key, None);
    }

    /// Drops in-memory buckets whose window has ended. Returns how many.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        self.prune_locked(&mut buckets, now)
    }

    /// Number of buckets held in memory.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Returns true if the store has failed and the limiter runs from memory.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn current_bucket<'a>(
        &self,
        buckets: &'a mut HashMap<String, RateLimitBucket>,
        key: &str,
        limit: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> &'a mut RateLimitBucket {
        if !buckets.contains_key(key) {
            if buckets.len() >= self.prune_threshold {
                let pruned = self.prune_locked(buckets, now);
                tracing::debug!(pruned, tracked = buckets.len(), "pruned finished windows");
            }
            let loaded = self.load(key).unwrap_or_else(|| RateLimitBucket::fresh(now));
            buckets.insert(key.to_string(), loaded);
        }
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| RateLimitBucket::fresh(now));
        if bucket.window_elapsed(now, limit.window_ms) {
            *bucket = RateLimitBucket::fresh(now);
        }
        bucket
    }

    fn prune_locked(
        &self,
        buckets: &mut HashMap<String, RateLimitBucket>,
        now: DateTime<Utc>,
    ) -> usize {
        let before = buckets.len();
        buckets.retain(|key, bucket| {
            let action = key.split_once(':').map_or(key.as_str(), |(a, _)| a);
            self.config
                .get(action)
                .is_some_and(|limit| !bucket.window_elapsed(now, limit.window_ms))
        });
        before - buckets.len()
    }

    fn load(&self, key: &str) -> Option<RateLimitBucket> {
        let store = self.store.as_ref()?;
        match RATE_LIMIT_NAMESPACE.load_json(store.as_ref(), key) {
            Ok(bucket) => bucket,
            Err(err) => {
                self.mark_degraded(&err);
                None
            }
        }
    }

    fn persist(&self, key: &str, bucket: Option<&RateLimitBucket>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let result = match bucket {
            Some(bucket) => RATE_LIMIT_NAMESPACE.save_json(store.as_ref(), key, bucket),
            None => store.remove(&RATE_LIMIT_NAMESPACE.key(key)),
        };
        match result {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::AcqRel) {
                    tracing::info!("rate limit persistence recovered");
                }
            }
            Err(err) => self.mark_degraded(&err),
        }
    }

    fn mark_degraded(&self, err: &daddeck_core::StoreError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(error = %err, "rate limit storage unavailable, counting in memory only");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("actions", &self.config.limits.keys().collect::<Vec<_>>())
            .field("tracked_keys", &self.tracked_keys())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

fn bucket_key(action: &str, identifier: &str) -> String {
    format!("{action}:{}", normalize_identifier(identifier))
}
