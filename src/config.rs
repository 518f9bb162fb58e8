//! Client configuration
//!
//! ```rust
//! use sbapi_modbus::{ClientConfig, DeviceProfile};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new("gateway.local")
//!     .with_port(1502)
//!     .with_timeout(Duration::from_secs(2))
//!     .with_profile(DeviceProfile::sensor());
//!
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use crate::device_profile::DeviceProfile;
use crate::error::{ModbusError, ModbusResult};

/// Default Modbus TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default socket timeout (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Upper bound for any configured timeout
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Connection settings for [`crate::ModbusTcpClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host name or IP address of the gateway
    pub host: String,
    pub port: u16,
    /// Socket I/O timeout; also the response deadline unless a profile is set
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Default per-call retry and response deadline. `None` uses the default
    /// retry policy with `timeout` as the response deadline.
    pub profile: Option<DeviceProfile>,
    /// Dump every frame through `tracing` at info level
    pub packet_logging: bool,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the I/O, connect and (without an explicit profile) response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Profile applied to operations that do not pass their own
    pub fn profile(&self) -> DeviceProfile {
        self.profile
            .unwrap_or_else(|| DeviceProfile::default().with_response_timeout(self.timeout))
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the settings before any connection is attempted
    pub fn validate(&self) -> ModbusResult<()> {
        if self.host.trim().is_empty() {
            return Err(ModbusError::configuration("host must not be empty"));
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(ModbusError::configuration(format!(
                "host '{}' contains whitespace",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(ModbusError::configuration("port must be in 1..=65535"));
        }

        check_timeout("timeout", self.timeout)?;
        check_timeout("connect timeout", self.connect_timeout)?;
        let profile = self.profile();
        check_timeout("response timeout", profile.response_timeout)?;
        if profile.retry.delay > MAX_TIMEOUT {
            return Err(ModbusError::configuration(format!(
                "retry delay {:?} exceeds {:?}",
                profile.retry.delay, MAX_TIMEOUT
            )));
        }
        Ok(())
    }
}

fn check_timeout(name: &str, value: Duration) -> ModbusResult<()> {
    if value.is_zero() || value >= MAX_TIMEOUT {
        return Err(ModbusError::configuration(format!(
            "{} must be between 0 and {}s, got {:?}",
            name,
            MAX_TIMEOUT.as_secs(),
            value
        )));
    }
    Ok(())
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            profile: None,
            packet_logging: false,
        }
    }
}
