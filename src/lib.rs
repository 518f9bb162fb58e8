//! # sbapi_modbus - Modbus TCP Client for Field Nodes
//!
//! Async Modbus TCP client for reading and writing holding registers on
//! remote sensor and actuator nodes behind a Modbus TCP gateway.
//!
//! ## Features
//!
//! - **Transaction correlation**: wrap-around transaction ids, stale frames discarded
//! - **Strict validation**: unit id, function code and write echo checked on every response
//! - **Per-call retries**: every retry is a fresh request with a fresh transaction id
//! - **Device profiles**: deadline and retry presets for sensors and actuators
//! - **Frame hooks**: observe every raw frame sent or received
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//! | 0x17 | Read/Write Multiple Registers | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sbapi_modbus::{ModbusTcpClient, ModbusClient, ModbusResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     // Connect to the gateway
//!     let mut client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(5)).await?;
//!
//!     // Read holding registers 100..102 of unit 3
//!     let values = client.read_03(3, 100, 2).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     // Write one register on unit 4, no retries
//!     client.write_10_with_retries(4, 500, &[1], 0).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// PDU with stack-allocated fixed array
pub mod pdu;

/// MBAP framing, requests and responses
pub mod protocol;

/// TCP transport layer
pub mod transport;

/// Protocol engine and client API
pub mod client;

/// Retry policy and attempt outcomes
pub mod retry;

/// Per-device-class deadline and retry presets
pub mod device_profile;

/// Client configuration
pub mod config;

/// Logging system for the library
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use sbapi_modbus::tokio) ===
pub use tokio;

// === Core client API ===
pub use client::{EngineStats, GenericModbusClient, ModbusClient, ModbusTcpClient};
pub use config::ClientConfig;
pub use device_profile::DeviceProfile;
pub use retry::{AttemptFuture, AttemptOutcome, RetryPolicy};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{
    ExceptionCode, MbapHeader, ModbusFunction, ModbusRequest, ModbusResponse, OperationReply,
    RegisterOperation, TransactionId, UnitId,
};

// === Monitoring ===
pub use transport::{ModbusTransport, TcpTransport, TransportStats};

// === Protocol limits (commonly needed constants) ===
pub use constants::{MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

// === Logging ===
pub use logging::{CallbackLogger, Direction, FrameCallback, LogCallback, LogLevel, LoggingMode};

// === PDU (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};

pub use config::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("sbapi_modbus v{} - Modbus TCP client for field nodes", VERSION)
}
