use crate::clock::{elapsed, Clock, SystemClock};
use crate::config::ThrottleConfig;
use crate::error::ThrottlerResult;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ThrottleCounter {
    wait_time_index: usize,
    updated_at: u64,
}

impl ThrottleCounter {
    fn new(now: u64) -> Self {
        Self {
            wait_time_index: 0,
            updated_at: now,
        }
    }
}

/// Enforces a growing minimum wait between recorded actions for a key.
///
/// Typical use: [`check`](Self::check) before an attempt,
/// [`increment`](Self::increment) after a failed attempt and
/// [`reset`](Self::reset) after a successful one. The throttler itself does
/// not enforce that pattern.
#[derive(Debug)]
pub struct EscalatingThrottler<K, C = SystemClock> {
    config: ThrottleConfig,
    clock: C,
    storage: HashMap<K, ThrottleCounter>,
}

impl<K: Eq + Hash> EscalatingThrottler<K, SystemClock> {
    pub fn new(wait_times: Vec<Duration>) -> ThrottlerResult<Self> {
        Self::with_config(ThrottleConfig::new(wait_times), SystemClock)
    }
}

impl<K: Eq + Hash, C: Clock> EscalatingThrottler<K, C> {
    pub fn with_config(config: ThrottleConfig, clock: C) -> ThrottlerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            storage: HashMap::new(),
        })
    }

    /// Whether the current wait time has passed since the last recorded action.
    ///
    /// The first call for a key creates its counter and returns `true`.
    pub fn check<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let now = self.clock.now_ms();

        let Some(counter) = self.storage.get(key) else {
            tracing::trace!("creating throttle counter");
            self.storage.insert(key.to_owned(), ThrottleCounter::new(now));
            return true;
        };

        let wait = self.config.wait_times[counter.wait_time_index];
        let allowed = elapsed(now, counter.updated_at) >= wait;
        if !allowed {
            tracing::debug!(
                wait_time_index = counter.wait_time_index,
                wait = ?wait,
                "throttled"
            );
        }
        allowed
    }

    /// Record an action, moving to the next wait time up to the last one.
    ///
    /// The first call for a key only creates its counter.
    pub fn increment<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        let now = self.clock.now_ms();
        let ceiling = self.config.wait_times.len() - 1;

        let Some(counter) = self.storage.get_mut(key) else {
            tracing::trace!("creating throttle counter");
            self.storage.insert(key.to_owned(), ThrottleCounter::new(now));
            return;
        };

        counter.updated_at = now;
        counter.wait_time_index = (counter.wait_time_index + 1).min(ceiling);
        tracing::trace!(wait_time_index = counter.wait_time_index, "escalated throttle");
    }

    /// Forget `key`; its next call behaves like the first one.
    pub fn reset<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.storage.remove(key).is_some() {
            tracing::debug!("reset throttle counter");
        }
    }

    /// Current position in the wait time sequence for `key`.
    pub fn wait_time_index<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.storage.get(key).map(|counter| counter.wait_time_index)
    }

    pub fn wait_times(&self) -> &[Duration] {
        &self.config.wait_times
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}
