use crate::clock::{elapsed, Clock, SystemClock};
use crate::config::BucketConfig;
use crate::error::ThrottlerResult;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use validator::Validate;

/// Per-key bucket state shared by both token bucket variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Bucket {
    /// Remaining tokens. Negative only after a first check with `cost > max`.
    pub count: i64,
    pub refilled_at: u64,
}

impl Bucket {
    /// State after the first check for a key, which always succeeds.
    pub fn first_use(max: u32, cost: u32, now: u64) -> Self {
        Self {
            count: i64::from(max) - i64::from(cost),
            refilled_at: now,
        }
    }

    /// Take `cost` tokens if enough are left.
    pub fn consume(&mut self, cost: u32) -> bool {
        let cost = i64::from(cost);
        if self.count < cost {
            return false;
        }
        self.count -= cost;
        true
    }
}

/// Token bucket that regenerates one token per elapsed refill interval.
///
/// Refill happens in whole ticks: progress toward the next tick is dropped
/// whenever a refill is applied.
///
/// Records are never evicted; every key ever checked keeps its entry.
#[derive(Debug)]
pub struct ContinuousTokenBucket<K, C = SystemClock> {
    config: BucketConfig,
    clock: C,
    storage: HashMap<K, Bucket>,
}

impl<K: Eq + Hash> ContinuousTokenBucket<K, SystemClock> {
    pub fn new(max: u32, refill_interval: Duration) -> ThrottlerResult<Self> {
        Self::with_config(BucketConfig::new(max, refill_interval), SystemClock)
    }
}

impl<K: Eq + Hash, C: Clock> ContinuousTokenBucket<K, C> {
    pub fn with_config(config: BucketConfig, clock: C) -> ThrottlerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            storage: HashMap::new(),
        })
    }

    /// Consume `cost` tokens for `key` if available.
    ///
    /// The first check for a key always succeeds. A refill is kept even when
    /// the check itself fails.
    pub fn check<Q>(&mut self, key: &Q, cost: u32) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let now = self.clock.now_ms();
        let max = self.config.max;

        let Some(bucket) = self.storage.get_mut(key) else {
            tracing::trace!(max, cost, "creating token bucket");
            self.storage.insert(key.to_owned(), Bucket::first_use(max, cost, now));
            return true;
        };

        let ticks = self.config.ticks(elapsed(now, bucket.refilled_at));
        if ticks > 0 {
            let refill = i64::try_from(ticks).unwrap_or(i64::MAX);
            bucket.count = bucket.count.saturating_add(refill).min(i64::from(max));
            bucket.refilled_at = now;
            tracing::trace!(refill, count = bucket.count, "refilled token bucket");
        }

        let allowed = bucket.consume(cost);
        if !allowed {
            tracing::debug!(count = bucket.count, cost, "token bucket exhausted");
        }
        allowed
    }

    /// Stored token count for `key`, without applying any pending refill.
    pub fn remaining<Q>(&self, key: &Q) -> Option<i64>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.storage.get(key).map(|bucket| bucket.count)
    }

    pub fn max(&self) -> u32 {
        self.config.max
    }

    pub fn refill_interval(&self) -> Duration {
        self.config.refill_interval
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bucket(
        max: u32,
        interval: Duration,
    ) -> (ContinuousTokenBucket<String, ManualClock>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let limiter =
            ContinuousTokenBucket::with_config(BucketConfig::new(max, interval), clock.clone())
                .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_first_check_creates_bucket() {
        let (mut limiter, _clock) = bucket(5, Duration::from_secs(1));

        assert!(limiter.is_empty());
        assert!(limiter.check("alice", 2));
        assert_eq!(limiter.remaining("alice"), Some(3));
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_exhaustion_and_refill() {
        let (mut limiter, clock) = bucket(5, Duration::from_secs(1));

        for _ in 0..5 {
            assert!(limiter.check("alice", 1));
        }
        assert!(!limiter.check("alice", 1));

        clock.advance(Duration::from_millis(999));
        assert!(!limiter.check("alice", 1));

        clock.advance(Duration::from_millis(1));
        assert!(limiter.check("alice", 1));
        assert!(!limiter.check("alice", 1));
    }

    #[test]
    fn test_capacity_overflow_prevention() {
        let (mut limiter, clock) = bucket(5, Duration::from_secs(1));

        assert!(limiter.check("alice", 1));
        clock.advance(Duration::from_secs(3_600));

        assert!(limiter.check("alice", 1));
        assert_eq!(limiter.remaining("alice"), Some(4));
    }

    #[test]
    fn test_refill_counts_whole_ticks_only() {
        let (mut limiter, clock) = bucket(5, Duration::from_secs(1));

        assert!(limiter.check("alice", 3));
        clock.advance(Duration::from_millis(2_500));

        // 2 + 2 refilled, then one consumed
        assert!(limiter.check("alice", 1));
        assert_eq!(limiter.remaining("alice"), Some(3));
    }

    #[test]
    fn test_partial_tick_is_discarded_on_refill() {
        let (mut limiter, clock) = bucket(5, Duration::from_secs(1));

        assert!(limiter.check("alice", 5));
        clock.advance(Duration::from_millis(1_500));
        assert!(limiter.check("alice", 1));

        // The leftover 500ms does not count toward the next token
        clock.advance(Duration::from_millis(600));
        assert!(!limiter.check("alice", 1));

        clock.advance(Duration::from_millis(400));
        assert!(limiter.check("alice", 1));
    }

    #[test]
    fn test_refill_kept_when_check_fails() {
        let (mut limiter, clock) = bucket(5, Duration::from_secs(1));

        assert!(limiter.check("alice", 5));
        clock.advance(Duration::from_secs(2));

        assert!(!limiter.check("alice", 3));
        assert_eq!(limiter.remaining("alice"), Some(2));
    }

    #[test]
    fn test_fractional_millisecond_interval() {
        let (mut limiter, clock) = bucket(10, Duration::from_micros(1_500));

        assert!(limiter.check("k", 10));
        clock.advance(Duration::from_millis(3));

        // floor(3ms / 1.5ms) = 2 tokens, one consumed
        assert!(limiter.check("k", 1));
        assert_eq!(limiter.remaining("k"), Some(1));
    }

    #[test]
    fn test_cost_above_max_goes_negative() {
        let (mut limiter, clock) = bucket(3, Duration::from_secs(1));

        assert!(limiter.check("alice", 5));
        assert_eq!(limiter.remaining("alice"), Some(-2));

        clock.advance(Duration::from_secs(2));
        assert!(!limiter.check("alice", 1));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check("alice", 1));
    }

    #[test]
    fn test_clock_going_backwards_does_not_refill() {
        let (mut limiter, clock) = bucket(2, Duration::from_secs(1));

        assert!(limiter.check("alice", 2));
        clock.set(0);
        assert!(!limiter.check("alice", 1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ContinuousTokenBucket::<String>::new(0, Duration::from_secs(1)).is_err());
        assert!(ContinuousTokenBucket::<String>::new(1, Duration::ZERO).is_err());

        let limiter = ContinuousTokenBucket::<u64>::new(10, Duration::from_secs(2)).unwrap();
        assert_eq!(limiter.max(), 10);
        assert_eq!(limiter.refill_interval(), Duration::from_secs(2));
    }
}
