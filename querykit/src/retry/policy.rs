// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Retry policy and backoff schedule

use crate::error::{Error, ErrorClassification, Result};
use std::time::Duration;

/// Caller-supplied override for classifying errors
///
/// Returning `None` falls back to [`Error::classify`]. Cancellation is always
/// decided before the classifier runs.
pub type Classifier = fn(&Error) -> Option<ErrorClassification>;

/// Exponential backoff with an upper bound and optional jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub const fn exponential(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: true,
        }
    }

    pub const fn constant(delay: Duration) -> Self {
        Self {
            base: delay,
            cap: delay,
            jitter: false,
        }
    }

    pub const fn without_jitter(self) -> Self {
        Self {
            base: self.base,
            cap: self.cap,
            jitter: false,
        }
    }

    /// Upper bound of the delay after the given failed attempt (1-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Delay after the given failed attempt
    ///
    /// With jitter the delay is drawn uniformly from the upper half of the
    /// ceiling, so concurrent retriers spread out but never retry sooner than
    /// half the schedule.
    pub fn delay(&self, attempt: u32, rng: &mut fastrand::Rng) -> Duration {
        let ceiling = self.ceiling(attempt);
        if !self.jitter {
            return ceiling;
        }
        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        let half = ceiling_ms / 2;
        Duration::from_millis(half + rng.u64(0..=ceiling_ms - half))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(5), Duration::from_millis(500))
    }
}

/// How a single logical operation is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Whether the work may safely run more than once after a conflict
    pub idempotent: bool,
    /// Upper bound on attempts, including the first
    pub max_attempts: u32,
    /// Upper bound on total time spent, including backoff
    pub max_elapsed: Option<Duration>,
    /// Schedule for transport errors and conflicts
    pub fast_backoff: Backoff,
    /// Schedule for overload errors
    pub slow_backoff: Backoff,
    pub classifier: Option<Classifier>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Single attempt, no retries at all
    pub fn no_retries() -> Self {
        Self::new(1)
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn with_backoff(mut self, fast: Backoff, slow: Backoff) -> Self {
        self.fast_backoff = fast;
        self.slow_backoff = slow;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidArgument(
                "retry policy needs max_attempts >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Classify an error, consulting the custom classifier first
    pub fn classify(&self, error: &Error) -> ErrorClassification {
        let natural = error.classify();
        if natural == ErrorClassification::Cancelled {
            return natural;
        }
        self.classifier
            .and_then(|classifier| classifier(error.root()))
            .unwrap_or(natural)
    }

    /// Backoff schedule appropriate for this error
    pub fn backoff_for(&self, error: &Error) -> &Backoff {
        if error.wants_slow_backoff() {
            &self.slow_backoff
        } else {
            &self.fast_backoff
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            idempotent: false,
            max_attempts: 10,
            max_elapsed: Some(Duration::from_secs(60)),
            fast_backoff: Backoff::default(),
            slow_backoff: Backoff::exponential(Duration::from_secs(1), Duration::from_secs(5)),
            classifier: None,
        }
    }
}
