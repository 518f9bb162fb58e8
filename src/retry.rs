//! Retry policy for register operations
//!
//! A policy of `N` retries allows at most `N + 1` attempts. Each attempt ends
//! in an [`AttemptOutcome`]; only `Retryable` outcomes lead to another attempt.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::warn;

use crate::error::{ModbusError, ModbusResult};

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: u8 = 3;

/// Result of a single request/response attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Failed, another attempt may succeed
    Retryable(ModbusError),
    /// Failed, retrying cannot help
    Fatal(ModbusError),
}

impl<T> AttemptOutcome<T> {
    /// Classify a result using [`ModbusError::is_retryable`]
    pub fn from_result(result: ModbusResult<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) if e.is_retryable() => Self::Retryable(e),
            Err(e) => Self::Fatal(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> ModbusResult<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Retryable(e) | Self::Fatal(e) => Err(e),
        }
    }
}

impl<T> From<ModbusResult<T>> for AttemptOutcome<T> {
    fn from(result: ModbusResult<T>) -> Self {
        Self::from_result(result)
    }
}

/// Future of one attempt, borrowing the state handed to [`RetryPolicy::run`]
pub type AttemptFuture<'a, T> = Pin<Box<dyn Future<Output = AttemptOutcome<T>> + Send + 'a>>;

/// How many times a failed operation is retried, and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u8,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u8) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Total attempts allowed
    pub fn max_attempts(&self) -> u32 {
        u32::from(self.retries) + 1
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Wait between attempts
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Drive `attempt` until it succeeds, fails fatally, or attempts run out.
    ///
    /// The closure gets `state` back on every attempt together with the
    /// 1-based attempt number. The last error is returned when every attempt
    /// was retryable.
    pub async fn run<S, T, F>(&self, state: &mut S, mut attempt: F) -> ModbusResult<T>
    where
        F: for<'a> FnMut(&'a mut S, u32) -> AttemptFuture<'a, T>,
    {
        let mut number = 1;
        loop {
            let error = match attempt(&mut *state, number).await {
                AttemptOutcome::Retryable(e) => e,
                done => return done.into_result(),
            };
            if !self.allows_another(number) {
                return Err(error);
            }
            warn!(
                "attempt {}/{} failed: {}, retrying",
                number,
                self.max_attempts(),
                error
            );
            self.pause().await;
            number += 1;
        }
    }
}
