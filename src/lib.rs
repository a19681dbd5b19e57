//! In-process rate limiting keyed by caller-supplied identifiers.
//!
//! ```
//! use keyed_throttle::ContinuousTokenBucket;
//! use std::time::Duration;
//!
//! let mut limiter = ContinuousTokenBucket::<String>::new(5, Duration::from_secs(1)).unwrap();
//! assert!(limiter.check("user_123", 1));
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod fixed_window;
pub mod throttler;
pub mod token_bucket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BucketConfig, LimiterPolicy, ThrottleConfig};
pub use error::{ThrottlerError, ThrottlerResult};
pub use fixed_window::FixedWindowTokenBucket;
pub use throttler::EscalatingThrottler;
pub use token_bucket::ContinuousTokenBucket;
