//! Backoff delay computation for retried steps.
//!
//! Stateless -- the attempt counter lives in the step record, so delays are
//! pure functions of the policy and the attempt number. All arithmetic
//! saturates; an absurd policy yields `Duration::MAX`, never a panic or wrap.

use std::time::Duration;

use duraflow_types::step::{Backoff, RetryPolicy};

/// Delay to wait after the failure of attempt `attempt` (1-based).
///
/// - `None`: constant `initial_delay`.
/// - `Linear`: `initial_delay * attempt`.
/// - `Exponential`: `initial_delay * 2^(attempt - 1)`, so the first retry
///   waits exactly `initial_delay`.
///
/// The result is clamped to `max_delay` when the policy carries one.
pub fn next_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = match policy.backoff {
        Backoff::None => policy.initial_delay,
        Backoff::Linear => policy.initial_delay.saturating_mul(attempt),
        Backoff::Exponential => {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            policy.initial_delay.saturating_mul(factor)
        }
    };
    match policy.max_delay {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
