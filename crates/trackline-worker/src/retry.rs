//! What an orchestrator does with a failed delivery.

use std::time::Duration;

/// Maximum delay before a bounded retry. Caps exponential backoff so high
/// delivery counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Nack without requeue and mark the track `error`.
    #[default]
    NoRetry,
    /// Requeue recoverable failures until the delivery has been attempted
    /// `max_attempts` times, waiting `backoff * 2^(attempt - 1)` first.
    Bounded { max_attempts: u32, backoff: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Requeue { after: Duration },
    Fail,
}

pub(crate) fn compute_retry_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}

impl RetryPolicy {
    /// Decide for a failure on the `delivery_count`-th attempt.
    pub fn decide(&self, recoverable: bool, delivery_count: u32) -> RetryDecision {
        match *self {
            RetryPolicy::NoRetry => RetryDecision::Fail,
            RetryPolicy::Bounded { .. } if !recoverable => RetryDecision::Fail,
            RetryPolicy::Bounded {
                max_attempts,
                backoff,
            } => {
                if delivery_count < max_attempts {
                    RetryDecision::Requeue {
                        after: compute_retry_backoff(backoff, delivery_count),
                    }
                } else {
                    RetryDecision::Fail
                }
            }
        }
    }
}
