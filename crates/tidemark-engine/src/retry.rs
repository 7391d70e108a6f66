//! Retry backoff policy for transient per-batch failures.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Compute the delay before retry `attempt` (1-based).
///
/// Exponential: `base * 2^(attempt-1)`, capped, with symmetric fractional
/// jitter so synchronized retries spread out.
#[must_use]
pub fn compute_backoff(policy: &RetryConfig, attempt: u32) -> Duration {
    let exp = policy
        .base_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(policy.cap_ms);

    if policy.jitter <= 0.0 {
        return Duration::from_millis(capped);
    }
    let spread = (capped as f64 * policy.jitter).round();
    let jittered = rand::thread_rng().gen_range(-spread..=spread);
    let delay = (capped as f64 + jittered).max(0.0) as u64;
    Duration::from_millis(delay)
}
