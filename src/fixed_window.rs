use crate::clock::{elapsed, Clock, SystemClock};
use crate::config::BucketConfig;
use crate::error::ThrottlerResult;
use crate::token_bucket::Bucket;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use validator::Validate;

/// Token bucket that restores full capacity once the refill interval has
/// passed, instead of refilling gradually.
///
/// The window start is the time a key's record was created and is never
/// moved afterwards. Once that first window has elapsed, every check finds
/// the bucket back at `max`. Use [`FixedWindowTokenBucket::reset`] to start a
/// fresh window for a key.
#[derive(Debug)]
pub struct FixedWindowTokenBucket<K, C = SystemClock> {
    config: BucketConfig,
    clock: C,
    storage: HashMap<K, Bucket>,
}

impl<K: Eq + Hash> FixedWindowTokenBucket<K, SystemClock> {
    pub fn new(max: u32, refill_interval: Duration) -> ThrottlerResult<Self> {
        Self::with_config(BucketConfig::new(max, refill_interval), SystemClock)
    }
}

impl<K: Eq + Hash, C: Clock> FixedWindowTokenBucket<K, C> {
    pub fn with_config(config: BucketConfig, clock: C) -> ThrottlerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            storage: HashMap::new(),
        })
    }

    /// Consume `cost` tokens for `key` if available. The first check for a
    /// key always succeeds.
    pub fn check<Q>(&mut self, key: &Q, cost: u32) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let now = self.clock.now_ms();
        let max = self.config.max;

        let Some(bucket) = self.storage.get_mut(key) else {
            tracing::trace!(max, cost, "creating fixed window bucket");
            self.storage.insert(key.to_owned(), Bucket::first_use(max, cost, now));
            return true;
        };

        // refilled_at stays put
        if elapsed(now, bucket.refilled_at) >= self.config.refill_interval {
            bucket.count = i64::from(max);
        }

        let allowed = bucket.consume(cost);
        if !allowed {
            tracing::debug!(count = bucket.count, cost, "fixed window bucket exhausted");
        }
        allowed
    }

    /// Forget `key`; its next check behaves like the first one.
    pub fn reset<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.storage.remove(key).is_some() {
            tracing::debug!("reset fixed window bucket");
        }
    }

    /// Stored token count for `key`, without applying a pending window reset.
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

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}
