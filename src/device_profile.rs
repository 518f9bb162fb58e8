//! # Device Profiles
//!
//! Per-device-class tuning of the request/response cycle.
//!
//! Field nodes on the same gateway behave very differently:
//!
//! - **Sensor nodes** answer register reads within a few hundred
//!   milliseconds. A short deadline with several retries recovers quickly
//!   from a lost frame.
//! - **Actuator nodes** (valves, pumps) may take seconds to acknowledge a
//!   write while the mechanism moves. A long deadline with few retries avoids
//!   re-issuing a command that is still being carried out.
//!
//! A profile is attached to a client as its default and can be overridden
//! per call with the `*_with_profile` operations.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default response deadline (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Response deadline of the [`DeviceProfile::sensor`] preset (milliseconds)
pub const SENSOR_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Response deadline of the [`DeviceProfile::actuator`] preset (milliseconds)
pub const ACTUATOR_RESPONSE_TIMEOUT_MS: u64 = 10_000;

/// Retry and deadline settings for one class of device.
///
/// # Example
///
/// ```rust
/// use sbapi_modbus::DeviceProfile;
/// use std::time::Duration;
///
/// let profile = DeviceProfile::actuator().with_retries(0);
///
/// assert_eq!(profile.retry.retries, 0);
/// assert_eq!(profile.response_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Retries and delay between attempts.
    pub retry: RetryPolicy,
    /// How long to wait for the matching response of one attempt.
    pub response_timeout: Duration,
}

impl DeviceProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast-answering sensor node: 1 s deadline, 3 retries.
    pub fn sensor() -> Self {
        Self {
            retry: RetryPolicy::new(3),
            response_timeout: Duration::from_millis(SENSOR_RESPONSE_TIMEOUT_MS),
        }
    }

    /// Slow-acknowledging actuator node: 10 s deadline, 1 retry after 500 ms.
    pub fn actuator() -> Self {
        Self {
            retry: RetryPolicy::new(1).with_delay(Duration::from_millis(500)),
            response_timeout: Duration::from_millis(ACTUATOR_RESPONSE_TIMEOUT_MS),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the number of retries, keeping the delay.
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retry.retries = retries;
        self
    }

    /// Set the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
