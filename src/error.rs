//! Error types for the Modbus TCP client
//!
//! Every failure the engine can report falls into one of these categories:
//!
//! ```text
//! ModbusError
//! ├── Connection       - socket level failure, reconnect attempted automatically
//! ├── Timeout          - no response within the deadline
//! ├── Framing          - malformed or truncated MBAP frame
//! ├── InvalidArgument  - caller supplied value out of range, never retried
//! ├── Exception        - remote device answered with an exception response
//! ├── Mismatch         - response does not belong to the request sent
//! └── Configuration    - invalid client settings
//! ```

use std::io;

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors returned by transports and the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// Socket level failure (refused, reset, DNS failure, peer closed)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No data within the configured deadline
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or truncated MBAP frame, or inconsistent declared length
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// Caller supplied an address, quantity or value outside the protocol range
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Exception response returned by the remote device
    #[error("Modbus exception on function 0x{function:02X}: {exception} (code 0x{code:02X})")]
    Exception {
        function: u8,
        code: u8,
        exception: ExceptionCode,
    },

    /// Response does not correspond to the request that was sent
    #[error("Protocol mismatch: {message}")]
    Mismatch { message: String },

    /// Invalid client configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a framing error
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an exception error from the raw response function code and exception code
    pub fn exception(function: u8, code: u8) -> Self {
        Self::Exception {
            function: function & 0x7F,
            code,
            exception: ExceptionCode::from_u8(code),
        }
    }

    /// Create a protocol mismatch error
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::Mismatch {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether a failed attempt with this error may be retried.
    ///
    /// Argument and configuration errors are raised before any I/O and
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidArgument { .. } | Self::Configuration { .. }
        )
    }

    /// Whether the socket may hold unread or partial bytes after this error.
    ///
    /// The engine drops the connection for these before the next attempt.
    pub fn invalidates_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Framing { .. }
        )
    }

    /// Exception code carried by an exception response, if any
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            Self::Exception { exception, .. } => Some(*exception),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Self::timeout(format!("socket I/O: {}", err), 0)
            }
            io::ErrorKind::UnexpectedEof => {
                Self::connection(format!("connection closed by peer: {}", err))
            }
            _ => Self::connection(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ModbusError::connection("reset").is_retryable());
        assert!(ModbusError::timeout("read", 100).is_retryable());
        assert!(ModbusError::framing("zero length").is_retryable());
        assert!(ModbusError::mismatch("unit id").is_retryable());
        assert!(ModbusError::exception(0x83, 0x02).is_retryable());
        assert!(!ModbusError::invalid_argument("count").is_retryable());
        assert!(!ModbusError::configuration("port").is_retryable());
    }

    #[test]
    fn test_exception_strips_flag() {
        let err = ModbusError::exception(0x90, 0x02);
        match err {
            ModbusError::Exception {
                function,
                code,
                exception,
            } => {
                assert_eq!(function, 0x10);
                assert_eq!(code, 0x02);
                assert_eq!(exception, ExceptionCode::IllegalDataAddress);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_mapping() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "early eof");
        assert!(ModbusError::from(eof).is_connection());

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert!(ModbusError::from(timed_out).is_timeout());

        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(ModbusError::from(refused).is_connection());
    }

    #[test]
    fn test_display_mentions_exception_name() {
        let err = ModbusError::exception(0x83, 0x04);
        let text = err.to_string();
        assert!(text.contains("0x03"));
        assert!(text.contains("slave device failure"));
    }
}
