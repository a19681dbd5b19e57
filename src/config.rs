use crate::error::ThrottlerResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Capacity and refill interval shared by both token bucket variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BucketConfig {
    /// Bucket capacity in tokens
    #[validate(range(min = 1))]
    pub max: u32,

    /// Time to regenerate one token (continuous) or to restore full capacity (fixed window)
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_non_zero_duration"))]
    pub refill_interval: Duration,
}

impl BucketConfig {
    pub fn new(max: u32, refill_interval: Duration) -> Self {
        Self {
            max,
            refill_interval,
        }
    }

    /// Whole refill intervals contained in `elapsed`.
    pub(crate) fn ticks(&self, elapsed: Duration) -> u128 {
        elapsed.as_nanos() / self.refill_interval.as_nanos()
    }
}

/// Ordered wait times for the escalating throttler.
///
/// `wait_times[0]` applies after the first recorded action, and the last
/// entry is the ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ThrottleConfig {
    #[serde(with = "duration_list")]
    #[validate(length(min = 1))]
    pub wait_times: Vec<Duration>,
}

impl ThrottleConfig {
    pub fn new(wait_times: Vec<Duration>) -> Self {
        Self { wait_times }
    }
}

/// A limiter policy as loaded from a JSON policy file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterPolicy {
    Continuous(BucketConfig),
    FixedWindow(BucketConfig),
    Escalating(ThrottleConfig),
}

impl LimiterPolicy {
    /// Parse and validate a policy.
    pub fn from_json(raw: &str) -> ThrottlerResult<Self> {
        let policy: LimiterPolicy = serde_json::from_str(raw)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        match self {
            LimiterPolicy::Continuous(config) | LimiterPolicy::FixedWindow(config) => {
                config.validate()?
            }
            LimiterPolicy::Escalating(config) => config.validate()?,
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LimiterPolicy::Continuous(_) => "continuous",
            LimiterPolicy::FixedWindow(_) => "fixed_window",
            LimiterPolicy::Escalating(_) => "escalating",
        }
    }
}

fn validate_non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("non_zero_duration"));
    }
    Ok(())
}

/// humantime strings for each element of a `Vec<Duration>`.
mod duration_list {
    use humantime_serde::Serde;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(durations.iter().map(|d| Serde::from(*d)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<Serde<Duration>>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(Serde::into_inner).collect())
    }
}
