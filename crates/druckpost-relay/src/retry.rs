// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for the delivery loop: exponential backoff bounded by a
// staleness window.
//
// There is no attempt limit.  A failing job is retried until it either
// succeeds or is older than the staleness window at the moment it fails.
// The delay grows by a constant factor per retry up to a ceiling, and drops
// back to the floor only after a successful delivery.

use std::time::Duration;

use druckpost_core::config::DeliveryPolicy;
use tracing::debug;

/// Exponential backoff state shared by consecutive jobs.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    factor: f64,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: &DeliveryPolicy) -> Self {
        Self {
            floor: policy.backoff_floor,
            factor: policy.backoff_factor,
            ceiling: policy.backoff_ceiling,
            current: policy.backoff_floor,
        }
    }

    /// The delay the next retry would use.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Return the delay to sleep now and grow the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.ceiling);
        delay
    }

    /// Back to the floor after a successful delivery.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Result of evaluating a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the job at the head and try again after this delay.
    RetryAfter(Duration),
    /// The job is past the staleness window; drop it.
    Stale,
}

/// Decide what to do with a job whose attempt just failed.
pub fn should_retry(job_age: Duration, staleness: Duration, backoff: &mut Backoff) -> RetryDecision {
    if job_age > staleness {
        debug!(age_ms = job_age.as_millis(), "job is stale");
        return RetryDecision::Stale;
    }
    let delay = backoff.next_delay();
    debug!(delay_ms = delay.as_millis(), "scheduling retry");
    RetryDecision::RetryAfter(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(&DeliveryPolicy::default())
    }

    #[test]
    fn grows_by_factor() {
        let mut b = backoff();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_millis(1500));
        assert_eq!(b.next_delay(), Duration::from_millis(2250));
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let mut b = backoff();
        let mut prev = Duration::ZERO;
        for _ in 0..40 {
            let d = b.next_delay();
            assert!(d >= prev);
            assert!(d <= Duration::from_secs(30));
            prev = d;
        }
        assert_eq!(prev, Duration::from_secs(30));
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut b = backoff();
        for _ in 0..5 {
            b.next_delay();
        }
        b.reset();
        assert_eq!(b.current(), Duration::from_secs(1));
    }

    #[test]
    fn stale_job_is_not_retried() {
        let mut b = backoff();
        let decision = should_retry(Duration::from_secs(61), Duration::from_secs(60), &mut b);
        assert_eq!(decision, RetryDecision::Stale);
        // A stale drop does not consume a backoff step.
        assert_eq!(b.current(), Duration::from_secs(1));
    }

    #[test]
    fn fresh_job_is_retried() {
        let mut b = backoff();
        let decision = should_retry(Duration::from_secs(60), Duration::from_secs(60), &mut b);
        assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_secs(1)));
    }
}
