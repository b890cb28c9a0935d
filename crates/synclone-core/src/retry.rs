//! Retry decisions and backoff computation.
//!
//! Everything here is a pure function of its inputs plus a random source.
//! Callers own the sleep and its cancellation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// How a request or operation failed below the HTTP status level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportFailure {
    /// Refused, reset, timed out, DNS or network unreachable.
    Connection,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub retryable_status_codes: Vec<u16>,
    /// Upper bound for server-provided back-off hints.
    pub max_hint_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            max_hint_delay_ms: 5 * 60 * 1000,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = duration_ms(base);
        self.max_delay_ms = duration_ms(max);
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Decide whether a finished request attempt should be retried.
    ///
    /// `attempt` is the 1-based number of the attempt that just finished.
    pub fn decide(
        &self,
        attempt: u32,
        method: &str,
        status: Option<u16>,
        failure: Option<TransportFailure>,
    ) -> RetryDecision {
        self.decide_with_rng(attempt, method, status, failure, &mut rand::rng())
    }

    pub fn decide_with_rng<R: Rng + ?Sized>(
        &self,
        attempt: u32,
        method: &str,
        status: Option<u16>,
        failure: Option<TransportFailure>,
        rng: &mut R,
    ) -> RetryDecision {
        if !self.should_retry(attempt, method, status, failure) {
            return RetryDecision::stop();
        }
        RetryDecision {
            retry: true,
            delay: self.jittered_delay(attempt, rng),
        }
    }

    /// Decide whether a failed repository operation should run again.
    pub fn decide_operation(&self, attempt: u32, retryable: bool) -> RetryDecision {
        if !retryable || attempt > self.max_retries {
            return RetryDecision::stop();
        }
        RetryDecision {
            retry: true,
            delay: self.jittered_delay(attempt, &mut rand::rng()),
        }
    }

    pub fn should_retry(
        &self,
        attempt: u32,
        method: &str,
        status: Option<u16>,
        failure: Option<TransportFailure>,
    ) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        if let Some(failure) = failure {
            return failure == TransportFailure::Connection;
        }
        if !is_idempotent(method) {
            return false;
        }
        status.is_some_and(|code| self.retryable_status_codes.contains(&code))
    }

    /// Unjittered delay before the attempt following `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exp);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.backoff_delay(attempt).as_secs_f64();
        let spread = delay * self.jitter_factor * rng.random::<f64>();
        let jittered = if rng.random::<bool>() {
            delay + spread
        } else {
            delay - spread
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Stretch a computed delay to honor a server hint such as `Retry-After`.
    pub fn apply_hint(&self, delay: Duration, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => delay.max(hint.min(Duration::from_millis(self.max_hint_delay_ms))),
            None => delay,
        }
    }
}

pub fn is_idempotent(method: &str) -> bool {
    matches!(
        method.to_ascii_uppercase().as_str(),
        "GET" | "HEAD" | "OPTIONS" | "PUT" | "DELETE"
    )
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
