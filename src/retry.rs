//! Retry classification and exponential backoff
//!
//! Failed transfers are retried by the [`TaskLedger`](crate::TaskLedger) with a
//! fresh session per attempt. This module decides which failures qualify and
//! how long to wait before each attempt.
//!
//! # Example
//!
//! ```
//! use vidqueue::config::RetryConfig;
//! use vidqueue::retry::{IsRetryable, backoff_delay};
//! use vidqueue::types::FailureKind;
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     jitter: false,
//!     ..RetryConfig::default()
//! };
//! assert!(FailureKind::NetworkTransfer.is_retryable());
//! assert_eq!(backoff_delay(&config, 1), Duration::from_secs(2));
//! assert_eq!(backoff_delay(&config, 2), Duration::from_secs(4));
//! ```

use crate::config::RetryConfig;
use crate::types::FailureKind;
use rand::Rng;
use std::time::Duration;

/// Trait for failures that can be classified as retryable or not
///
/// Transient failures (connection reset, throttled transfer) should return `true`.
/// Permanent failures (unsupported URL, missing engine, user cancellation) should return `false`.
pub trait IsRetryable {
    /// Returns true if the failure is transient and the download should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FailureKind {
    fn is_retryable(&self) -> bool {
        match self {
            FailureKind::NetworkTransfer => true,
            // The engine refused the request; a new attempt gets the same answer
            FailureKind::EngineInvocation => false,
            // The file exists somewhere; downloading it again does not help
            FailureKind::OutputPathUnknown => false,
            FailureKind::CancelledByUser => false,
            FailureKind::Internal => false,
        }
    }
}

/// Delay before retry number `attempt` (1-based)
///
/// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`,
/// then jittered if enabled. With jitter the result lies in `[delay, 2 * delay]`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let max = config.max_delay.as_secs_f64();
    let delay = if secs.is_finite() {
        Duration::from_secs_f64(secs.clamp(0.0, max))
    } else {
        config.max_delay
    };

    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Add random jitter to a delay so retries of parallel tasks spread out
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
