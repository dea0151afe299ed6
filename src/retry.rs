//! Bounded retry with exponential backoff, as an executor decorator.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

use crate::cancel::{sleep_unless_cancelled, CancelSignal};
use crate::executor::{ExecutionResult, Executor};
use crate::recognizer::{Command, CommandKind};

/// Total attempts, counting the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(4);
pub const DEFAULT_MULTIPLIER: u32 = 2;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before retry number `retry` (0 = first retry).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry.min(30));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    /// Wraps `inner` so transient failures are retried under this policy.
    #[must_use]
    pub fn wrap<E: Executor>(self, inner: E) -> Retrying<E> {
        Retrying {
            inner,
            policy: self,
        }
    }
}

/// An executor that retries its inner executor on transient failures.
///
/// Each attempt gets the full deadline. Application failures, malformed
/// responses, and cancellations are returned immediately.
#[derive(Debug)]
pub struct Retrying<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E> Retrying<E> {
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: Executor> Executor for Retrying<E> {
    fn source(&self) -> &str {
        self.inner.source()
    }

    fn kind(&self) -> CommandKind {
        self.inner.kind()
    }

    fn execute(&self, command: &Command, deadline: Duration, cancel: &CancelSignal) -> ExecutionResult {
        let max_attempts = self.policy.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            let mut result = self.inner.execute(command, deadline, cancel);
            result.attempts = attempt;

            if !result.is_transient_failure() {
                if attempt > 1 && result.is_success() {
                    info!(cmd_id = ?command.id, attempt, "command succeeded after retry");
                }
                return result;
            }
            if attempt >= max_attempts {
                warn!(cmd_id = ?command.id, attempts = attempt, detail = %result.error_detail, "retries exhausted");
                return result;
            }

            let delay = self.policy.jittered(self.policy.delay_for(attempt - 1));
            warn!(
                cmd_id = ?command.id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                detail = %result.error_detail,
                "transient failure, retrying"
            );
            if !sleep_unless_cancelled(delay, cancel) {
                info!(cmd_id = ?command.id, attempts = attempt, "cancelled during retry backoff");
                let mut cancelled = ExecutionResult::cancelled(command, started);
                cancelled.attempts = attempt;
                return cancelled;
            }
            attempt += 1;
        }
    }
}
