//! Bounded reconnection for channel connections.
//!
//! The bus never reconnects unless the policy allows it. A [`Reconnector`]
//! tracks consecutive failures for one channel and decides between another
//! attempt after a backoff delay and giving up for good.

use std::time::Duration;

/// Exponential backoff reconnection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier applied to delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of reconnect attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ReconnectPolicy {
    /// Never reconnect; the first failure is terminal.
    pub const fn disabled() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: Some(0),
        }
    }

    /// Exponential backoff starting at one second, capped at 30 seconds.
    pub const fn exponential(max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            ..Self::disabled()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_ms = base_ms * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether another attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make reconnect attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// Terminal: stay disconnected.
    GiveUp { failures: u32 },
}

/// Per-channel retry state machine.
#[derive(Debug, Clone)]
pub struct Reconnector {
    policy: ReconnectPolicy,
    failures: u32,
    gave_up: bool,
}

impl Reconnector {
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            gave_up: false,
        }
    }

    /// Consecutive failures since the last successful open.
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    pub const fn has_given_up(&self) -> bool {
        self.gave_up
    }

    /// The connection opened; the backoff starts over.
    pub const fn on_open(&mut self) {
        self.failures = 0;
    }

    /// The connection failed or ended.
    pub fn on_failure(&mut self) -> RetryDecision {
        if self.gave_up {
            return RetryDecision::GiveUp {
                failures: self.failures,
            };
        }

        let retries_so_far = self.failures;
        self.failures = self.failures.saturating_add(1);

        if self.policy.should_retry(retries_so_far) {
            RetryDecision::Retry {
                attempt: self.failures,
                delay: self.policy.delay_for_attempt(retries_so_far),
            }
        } else {
            self.gave_up = true;
            RetryDecision::GiveUp {
                failures: self.failures,
            }
        }
    }
}
