//! High-level Modbus TCP client
//!
//! [`GenericModbusClient`] is the protocol engine: it allocates transaction
//! ids, frames requests, correlates responses, validates them and retries
//! failed attempts. It is generic over [`ModbusTransport`] so the same engine
//! runs against a real socket ([`ModbusTcpClient`]) or a scripted transport in
//! tests.
//!
//! # Request lifecycle
//!
//! ```text
//! IDLE -> SENDING -> AWAITING -> DECODING -> SUCCESS
//!            ^                      |
//!            +------- RETRY <-------+-----> FAILED
//! ```
//!
//! Every attempt uses a fresh transaction id. Frames carrying an older id are
//! discarded while waiting, so a late answer to an abandoned attempt is never
//! taken for the current one.
//!
//! # API Naming Convention
//!
//! | Function Code | Primary Name | Semantic Alias |
//! |---------------|--------------|----------------|
//! | 0x03 | `read_03()` | `read_holding_registers()` |
//! | 0x10 | `write_10()` | `write_multiple_registers()` |
//! | 0x17 | `read_write_17()` | `read_write_multiple_registers()` |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sbapi_modbus::{ClientConfig, ModbusClient, ModbusResult, ModbusTcpClient};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::open(ClientConfig::new("192.168.0.20")).await?;
//!
//!     // Two registers from unit 3, starting at address 100
//!     let registers = client.read_03(3, 100, 2).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     // Open valve on unit 4
//!     client.write_10(4, 500, &[1]).await?;
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::ClientConfig;
use crate::device_profile::DeviceProfile;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::{CallbackLogger, Direction};
use crate::protocol::{
    ModbusRequest, ModbusResponse, OperationReply, RegisterOperation, TransactionId, UnitId,
};
use crate::retry::AttemptOutcome;
use crate::transport::{ModbusTransport, TcpTransport, TransportStats};

/// Interface for register operations on a Modbus TCP gateway.
///
/// Every operation validates its arguments before touching the connection;
/// an out-of-range quantity fails with [`ModbusError::InvalidArgument`]
/// without any network I/O.
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Holding Registers (0x03) | 125 registers |
/// | Write Multiple Registers (0x10) | 123 registers |
/// | Read/Write Multiple Registers (0x17) | 125 read, 121 written |
pub trait ModbusClient: Send + Sync {
    /// Read holding registers (function code 0x03).
    ///
    /// # Arguments
    ///
    /// * `unit_id` - Unit behind the gateway
    /// * `address` - Starting register address
    /// * `quantity` - Number of registers to read (1-125)
    fn read_03(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Write multiple registers (function code 0x10).
    ///
    /// Succeeds only when the device echoes the same address and quantity.
    fn write_10(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write then read registers in one transaction (function code 0x17).
    fn read_write_17(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send;

    /// Check if client is connected
    fn is_connected(&self) -> bool;

    /// Close the client connection
    fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Get transport statistics
    fn get_stats(&self) -> TransportStats;

    // ========================================================================
    // Semantic aliases
    // ========================================================================

    fn read_holding_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_03(unit_id, address, quantity)
    }

    fn write_multiple_registers(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<()>> + Send {
        self.write_10(unit_id, address, values)
    }

    fn read_write_multiple_registers(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = ModbusResult<Vec<u16>>> + Send {
        self.read_write_17(unit_id, read_address, read_quantity, write_address, values)
    }
}

/// Counters kept by the protocol engine, on top of [`TransportStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Request frames built, one per attempt
    pub attempts: u64,
    pub retries: u64,
    /// Frames discarded because their transaction id was not the outstanding one
    pub stale_frames: u64,
    pub exceptions: u64,
    /// Operations that returned an error to the caller
    pub failures: u64,
}

/// Protocol engine over any transport
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    logger: Option<CallbackLogger>,
    profile: DeviceProfile,
    /// Id of the most recently sent request
    last_transaction_id: TransactionId,
    stats: EngineStats,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    /// Create a new client; the first request carries transaction id 1
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            logger: None,
            profile: DeviceProfile::default(),
            last_transaction_id: 0,
            stats: EngineStats::default(),
        }
    }

    /// Create a new client with logging
    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        let mut client = Self::new(transport);
        client.logger = Some(logger);
        client
    }

    /// Default profile used by operations without an explicit one
    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Start numbering requests at `id` instead of 1
    pub fn with_initial_transaction_id(mut self, id: TransactionId) -> Self {
        self.last_transaction_id = id.wrapping_sub(1);
        self
    }

    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = Some(logger);
    }

    pub fn set_profile(&mut self, profile: DeviceProfile) {
        self.profile = profile;
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Get a reference to the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn engine_stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Transaction id used by the most recent request
    pub fn last_transaction_id(&self) -> TransactionId {
        self.last_transaction_id
    }

    // ========================================================================
    // Operations with explicit retry count or profile
    // ========================================================================

    /// FC03 with `retries` retries after the first attempt
    pub async fn read_03_with_retries(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
        retries: u8,
    ) -> ModbusResult<Vec<u16>> {
        let profile = self.profile.with_retries(retries);
        self.read_03_with_profile(unit_id, address, quantity, &profile)
            .await
    }

    /// FC16 with `retries` retries after the first attempt
    pub async fn write_10_with_retries(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
        retries: u8,
    ) -> ModbusResult<()> {
        let profile = self.profile.with_retries(retries);
        self.write_10_with_profile(unit_id, address, values, &profile)
            .await
    }

    pub async fn read_03_with_profile(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
        profile: &DeviceProfile,
    ) -> ModbusResult<Vec<u16>> {
        let operation = RegisterOperation::read(address, quantity)?;
        let reply = self.execute(unit_id, &operation, profile).await?;
        into_registers(reply)
    }

    pub async fn write_10_with_profile(
        &mut self,
        unit_id: UnitId,
        address: u16,
        values: &[u16],
        profile: &DeviceProfile,
    ) -> ModbusResult<()> {
        let operation = RegisterOperation::write(address, values)?;
        match self.execute(unit_id, &operation, profile).await? {
            OperationReply::Written => Ok(()),
            OperationReply::Registers(_) => Err(ModbusError::mismatch(
                "write answered with register data",
            )),
        }
    }

    pub async fn read_write_17_with_profile(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
        profile: &DeviceProfile,
    ) -> ModbusResult<Vec<u16>> {
        let operation =
            RegisterOperation::read_write(read_address, read_quantity, write_address, values)?;
        let reply = self.execute(unit_id, &operation, profile).await?;
        into_registers(reply)
    }

    // ========================================================================
    // Engine
    // ========================================================================

    /// Run a validated operation to completion under `profile`.
    ///
    /// At most `profile.retry.retries + 1` attempts are made. The error of the
    /// last attempt is returned when all of them fail.
    pub async fn execute(
        &mut self,
        unit_id: UnitId,
        operation: &RegisterOperation,
        profile: &DeviceProfile,
    ) -> ModbusResult<OperationReply> {
        let response_timeout = profile.response_timeout;
        let result = profile
            .retry
            .run(&mut *self, move |client, attempt| {
                let operation = operation.clone();
                Box::pin(async move {
                    client
                        .attempt(unit_id, &operation, response_timeout, attempt)
                        .await
                })
            })
            .await;

        if let Err(ref e) = result {
            self.stats.failures += 1;
            debug!(
                "unit {} {}: giving up: {}",
                unit_id,
                operation.function(),
                e
            );
        }
        result
    }

    /// Attempt number `attempt` of [`Self::execute`], classified for the retry policy
    async fn attempt(
        &mut self,
        unit_id: UnitId,
        operation: &RegisterOperation,
        response_timeout: Duration,
        attempt: u32,
    ) -> AttemptOutcome<OperationReply> {
        if attempt > 1 {
            self.stats.retries += 1;
        }

        let outcome =
            AttemptOutcome::from_result(self.transact(unit_id, operation, response_timeout).await);

        if let AttemptOutcome::Retryable(ref error) | AttemptOutcome::Fatal(ref error) = outcome {
            if matches!(error, ModbusError::Exception { .. }) {
                self.stats.exceptions += 1;
            }
            if error.invalidates_connection() {
                // Partial or late bytes may still arrive on this socket
                let _ = self.transport.close().await;
            }
            debug!(
                "unit {} {}: attempt {} failed: {}",
                unit_id,
                operation.function(),
                attempt,
                error
            );
        }
        outcome
    }

    /// One full attempt: fresh id, send, await the matching frame, decode
    async fn transact(
        &mut self,
        unit_id: UnitId,
        operation: &RegisterOperation,
        response_timeout: Duration,
    ) -> ModbusResult<OperationReply> {
        let transaction_id = self.next_transaction_id();
        let request = ModbusRequest::new(transaction_id, unit_id, operation.clone());
        let frame = request.encode()?;
        self.stats.attempts += 1;

        if let Some(ref logger) = self.logger {
            logger.log_request(&request);
            logger.log_frame(Direction::Tx, unit_id, &frame);
        }

        self.send_frame(&frame).await?;
        let response = self
            .await_response(transaction_id, unit_id, response_timeout)
            .await?;

        if let Some(ref logger) = self.logger {
            logger.log_response(&response);
        }

        operation.decode_reply(&response.pdu)
    }

    fn next_transaction_id(&mut self) -> TransactionId {
        self.last_transaction_id = self.last_transaction_id.wrapping_add(1);
        self.last_transaction_id
    }

    /// Send, connecting first if needed and reconnecting once if the socket failed
    async fn send_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        if !self.transport.is_connected() {
            self.transport.connect().await?;
        }

        match self.transport.send(frame).await {
            Err(e) if e.is_connection() => {
                debug!("send failed ({}), reconnecting once", e);
                let _ = self.transport.close().await;
                self.transport.connect().await?;
                self.transport.send(frame).await
            }
            other => other,
        }
    }

    /// Read frames until the one answering `transaction_id` arrives
    async fn await_response(
        &mut self,
        transaction_id: TransactionId,
        unit_id: UnitId,
        response_timeout: Duration,
    ) -> ModbusResult<ModbusResponse> {
        let deadline = Instant::now() + response_timeout;
        let timed_out = || {
            ModbusError::timeout(
                format!("response to transaction {}", transaction_id),
                response_timeout.as_millis() as u64,
            )
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }

            let response = match self.transport.receive(remaining).await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => return Err(timed_out()),
                Err(e) => return Err(e),
            };

            if let Some(ref logger) = self.logger {
                logger.log_frame(Direction::Rx, response.unit_id(), &response.to_bytes());
            }

            if response.transaction_id() != transaction_id {
                self.stats.stale_frames += 1;
                debug!(
                    "discarding stale frame tid={} while awaiting tid={}",
                    response.transaction_id(),
                    transaction_id
                );
                continue;
            }

            if response.unit_id() != unit_id {
                return Err(ModbusError::mismatch(format!(
                    "response from unit {}, request was for unit {}",
                    response.unit_id(),
                    unit_id
                )));
            }

            return Ok(response);
        }
    }
}

fn into_registers(reply: OperationReply) -> ModbusResult<Vec<u16>> {
    match reply {
        OperationReply::Registers(values) => Ok(values),
        OperationReply::Written => Err(ModbusError::mismatch(
            "read answered without register data",
        )),
    }
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    async fn read_03(
        &mut self,
        unit_id: UnitId,
        address: u16,
        quantity: u16,
    ) -> ModbusResult<Vec<u16>> {
        let profile = self.profile;
        self.read_03_with_profile(unit_id, address, quantity, &profile)
            .await
    }

    async fn write_10(&mut self, unit_id: UnitId, address: u16, values: &[u16]) -> ModbusResult<()> {
        let profile = self.profile;
        self.write_10_with_profile(unit_id, address, values, &profile)
            .await
    }

    async fn read_write_17(
        &mut self,
        unit_id: UnitId,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<Vec<u16>> {
        let profile = self.profile;
        self.read_write_17_with_profile(
            unit_id,
            read_address,
            read_quantity,
            write_address,
            values,
            &profile,
        )
        .await
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

/// Split `host:port`, accepting bracketed IPv6 literals such as `[::1]:502`
fn split_address(addr: &str) -> ModbusResult<(String, u16)> {
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Ok((socket.ip().to_string(), socket.port()));
    }

    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        ModbusError::configuration(format!("address '{}' is not host:port", addr))
    })?;
    if host.contains(':') {
        return Err(ModbusError::configuration(format!(
            "IPv6 address '{}' must be bracketed",
            addr
        )));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| ModbusError::configuration(format!("invalid port '{}': {}", port, e)))?;
    Ok((host.to_string(), port))
}

/// Modbus TCP client: the protocol engine over a [`TcpTransport`]
pub type ModbusTcpClient = GenericModbusClient<TcpTransport>;

impl GenericModbusClient<TcpTransport> {
    /// Build a client from a validated configuration. Connects on first use.
    pub fn from_config(config: ClientConfig) -> ModbusResult<Self> {
        config.validate()?;
        let profile = config.profile();
        let transport = TcpTransport::new(config.host, config.port, config.timeout)
            .with_connect_timeout(config.connect_timeout)
            .with_packet_logging(config.packet_logging);
        Ok(Self::new(transport).with_profile(profile))
    }

    /// Build a client and connect immediately
    pub async fn open(config: ClientConfig) -> ModbusResult<Self> {
        let mut client = Self::from_config(config)?;
        client.transport.connect().await?;
        Ok(client)
    }

    /// Connect to a `host:port` address string.
    ///
    /// `timeout` bounds connect, send and the wait for each response.
    pub async fn from_address(addr: &str, timeout: Duration) -> ModbusResult<Self> {
        let (host, port) = split_address(addr)?;
        Self::open(ClientConfig::new(host).with_port(port).with_timeout(timeout)).await
    }

    /// `host:port` of the gateway
    pub fn peer(&self) -> String {
        self.transport.peer()
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport.set_packet_logging(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MbapHeader;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    // =========================================================================
    // MockTransport: replays scripted replies, records sent frames
    // =========================================================================

    enum Scripted {
        /// Answer the last sent frame with this PDU
        Reply(Vec<u8>),
        /// Frame carrying the previous transaction id
        Stale(Vec<u8>),
        /// Correct transaction id, different unit
        WrongUnit(Vec<u8>),
        Fail(ModbusError),
    }

    #[derive(Default)]
    struct MockTransport {
        sent: Vec<Vec<u8>>,
        script: VecDeque<Scripted>,
        send_failures: VecDeque<ModbusError>,
        connected: bool,
        connects: u64,
        closes: u64,
    }

    impl MockTransport {
        fn new() -> Self {
            Self::default()
        }

        fn reply(mut self, pdu: &[u8]) -> Self {
            self.script.push_back(Scripted::Reply(pdu.to_vec()));
            self
        }

        fn then(mut self, scripted: Scripted) -> Self {
            self.script.push_back(scripted);
            self
        }

        fn fail_next_send(mut self, error: ModbusError) -> Self {
            self.send_failures.push_back(error);
            self
        }

        fn sent_transaction_ids(&self) -> Vec<u16> {
            self.sent
                .iter()
                .map(|f| u16::from_be_bytes([f[0], f[1]]))
                .collect()
        }

        fn frame_for(&self, tid_offset: u16, unit_delta: u8, pdu: &[u8]) -> ModbusResponse {
            let last = self.sent.last().expect("reply scripted before any send");
            let tid = u16::from_be_bytes([last[0], last[1]]).wrapping_sub(tid_offset);
            let unit = last[6].wrapping_add(unit_delta);
            ModbusResponse::from_parts(MbapHeader::for_pdu(tid, unit, pdu.len()), pdu).unwrap()
        }
    }

    impl ModbusTransport for MockTransport {
        async fn connect(&mut self) -> ModbusResult<()> {
            if !self.connected {
                self.connected = true;
                self.connects += 1;
            }
            Ok(())
        }

        async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
            if let Some(e) = self.send_failures.pop_front() {
                self.connected = false;
                return Err(e);
            }
            if !self.connected {
                return Err(ModbusError::connection("not connected"));
            }
            self.sent.push(frame.to_vec());
            Ok(())
        }

        async fn receive(&mut self, timeout: Duration) -> ModbusResult<ModbusResponse> {
            match self.script.pop_front() {
                Some(Scripted::Reply(pdu)) => Ok(self.frame_for(0, 0, &pdu)),
                Some(Scripted::Stale(pdu)) => Ok(self.frame_for(1, 0, &pdu)),
                Some(Scripted::WrongUnit(pdu)) => Ok(self.frame_for(0, 1, &pdu)),
                Some(Scripted::Fail(e)) => Err(e),
                None => Err(ModbusError::timeout(
                    "mock receive",
                    timeout.as_millis() as u64,
                )),
            }
        }

        async fn close(&mut self) -> ModbusResult<()> {
            self.connected = false;
            self.closes += 1;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats {
                requests_sent: self.sent.len() as u64,
                connects: self.connects,
                ..TransportStats::default()
            }
        }
    }

    fn register_pdu(values: &[u16]) -> Vec<u8> {
        let mut pdu = vec![0x03, (values.len() * 2) as u8];
        for value in values {
            pdu.extend_from_slice(&value.to_be_bytes());
        }
        pdu
    }

    fn fast_profile(retries: u8) -> DeviceProfile {
        DeviceProfile::default()
            .with_retries(retries)
            .with_response_timeout(Duration::from_millis(50))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    #[tokio::test]
    async fn test_read_returns_registers_in_order() {
        let mock = MockTransport::new().reply(&register_pdu(&[250, 600]));
        let mut client = GenericModbusClient::new(mock);

        let values = client.read_holding_registers(3, 100, 2).await.unwrap();

        assert_eq!(values, vec![250, 600]);
        assert_eq!(
            client.transport().sent,
            vec![vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x03, 0x03, 0x00, 0x64, 0x00, 0x02]]
        );
        assert!(client.is_connected());
        assert_eq!(client.transport().connects, 1);
    }

    #[tokio::test]
    async fn test_read_quantity_out_of_range_does_no_io() {
        let mut client = GenericModbusClient::new(MockTransport::new());

        for quantity in [0, 126, 130] {
            let err = client.read_03(1, 0, quantity).await.unwrap_err();
            assert!(matches!(err, ModbusError::InvalidArgument { .. }), "{err:?}");
        }

        assert!(client.transport().sent.is_empty());
        assert_eq!(client.transport().connects, 0);
        assert_eq!(client.engine_stats().attempts, 0);
    }

    #[tokio::test]
    async fn test_read_past_address_space_rejected() {
        let mut client = GenericModbusClient::new(MockTransport::new());
        let err = client.read_03(1, 0xFFFF, 2).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument { .. }));
        assert!(client.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_short_register_payload_is_mismatch() {
        let mock = MockTransport::new().reply(&register_pdu(&[250]));
        let mut client = GenericModbusClient::new(mock);

        let err = client.read_03_with_retries(3, 100, 2, 0).await.unwrap_err();
        assert!(matches!(err, ModbusError::Mismatch { .. }), "{err:?}");
    }

    // =========================================================================
    // Writes
    // =========================================================================

    #[tokio::test]
    async fn test_write_matching_echo_succeeds() {
        let mock = MockTransport::new().reply(&[0x10, 0x01, 0xF4, 0x00, 0x01]);
        let mut client = GenericModbusClient::new(mock);

        client.write_multiple_registers(4, 500, &[1]).await.unwrap();

        assert_eq!(
            client.transport().sent[0],
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x09, 0x04, 0x10, 0x01, 0xF4, 0x00, 0x01, 0x02, 0x00, 0x01]
        );
    }

    #[tokio::test]
    async fn test_write_wrong_echo_is_mismatch() {
        let mock = MockTransport::new().reply(&[0x10, 0x01, 0xF4, 0x00, 0x02]);
        let mut client = GenericModbusClient::new(mock);

        let err = client.write_10_with_retries(4, 500, &[1], 0).await.unwrap_err();
        assert!(matches!(err, ModbusError::Mismatch { .. }), "{err:?}");
        assert_eq!(client.engine_stats().failures, 1);
    }

    #[tokio::test]
    async fn test_write_too_many_values_rejected() {
        let mut client = GenericModbusClient::new(MockTransport::new());
        let values = vec![0u16; 124];
        let err = client.write_10(1, 0, &values).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument { .. }));
        let err = client.write_10(1, 0, &[]).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument { .. }));
        assert!(client.transport().sent.is_empty());
    }

    #[tokio::test]
    async fn test_read_write_17() {
        let mock = MockTransport::new().reply(&[0x17, 0x02, 0x12, 0x34]);
        let mut client = GenericModbusClient::new(mock);

        let values = client
            .read_write_multiple_registers(1, 10, 1, 20, &[7])
            .await
            .unwrap();
        assert_eq!(values, vec![0x1234]);
    }

    // =========================================================================
    // Correlation and transaction ids
    // =========================================================================

    #[tokio::test]
    async fn test_transaction_ids_increase_and_wrap() {
        let mock = MockTransport::new()
            .reply(&register_pdu(&[1]))
            .reply(&register_pdu(&[2]))
            .reply(&register_pdu(&[3]));
        let mut client = GenericModbusClient::new(mock).with_initial_transaction_id(65534);

        for expected in 1..=3u16 {
            assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![expected]);
        }

        assert_eq!(client.transport().sent_transaction_ids(), vec![65534, 65535, 0]);
        assert_eq!(client.last_transaction_id(), 0);
    }

    #[tokio::test]
    async fn test_stale_frame_is_discarded() {
        let mock = MockTransport::new()
            .then(Scripted::Stale(register_pdu(&[999, 999])))
            .reply(&register_pdu(&[250, 600]));
        let mut client = GenericModbusClient::new(mock);

        let values = client.read_03_with_retries(3, 100, 2, 0).await.unwrap();

        assert_eq!(values, vec![250, 600]);
        assert_eq!(client.engine_stats().stale_frames, 1);
        assert_eq!(client.transport().sent.len(), 1);
    }

    #[tokio::test]
    async fn test_only_stale_frames_times_out() {
        let mock = MockTransport::new().then(Scripted::Stale(register_pdu(&[1])));
        let mut client = GenericModbusClient::new(mock);

        let err = client
            .read_03_with_profile(1, 0, 1, &fast_profile(0))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
    }

    #[tokio::test]
    async fn test_wrong_unit_is_mismatch() {
        let mock = MockTransport::new().then(Scripted::WrongUnit(register_pdu(&[1])));
        let mut client = GenericModbusClient::new(mock);

        let err = client.read_03_with_retries(5, 0, 1, 0).await.unwrap_err();
        assert!(matches!(err, ModbusError::Mismatch { .. }), "{err:?}");
    }

    // =========================================================================
    // Exceptions and retries
    // =========================================================================

    #[tokio::test]
    async fn test_exception_without_retries() {
        let mock = MockTransport::new().reply(&[0x83, 0x02]);
        let mut client = GenericModbusClient::new(mock);

        let err = client.read_03_with_retries(1, 0, 1, 0).await.unwrap_err();

        assert_eq!(err.exception_code(), Some(crate::ExceptionCode::IllegalDataAddress));
        assert_eq!(client.transport().sent.len(), 1);
        assert_eq!(client.engine_stats().retries, 0);
        assert_eq!(client.engine_stats().exceptions, 1);
    }

    #[tokio::test]
    async fn test_exception_is_retried() {
        let mock = MockTransport::new()
            .reply(&[0x83, 0x06])
            .reply(&register_pdu(&[42]));
        let mut client = GenericModbusClient::new(mock);

        assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![42]);
        assert_eq!(client.engine_stats().retries, 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retries() {
        for retries in [0u8, 1, 3] {
            let mut client = GenericModbusClient::new(MockTransport::new());

            let err = client
                .read_03_with_profile(1, 0, 1, &fast_profile(retries))
                .await
                .unwrap_err();

            assert!(err.is_timeout(), "{err:?}");
            let ids = client.transport().sent_transaction_ids();
            assert_eq!(ids.len(), retries as usize + 1);
            // Each attempt uses a fresh transaction id
            assert!(ids.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
        }
    }

    #[tokio::test]
    async fn test_timeout_drops_connection_before_retry() {
        let mock = MockTransport::new()
            .then(Scripted::Fail(ModbusError::timeout("read", 50)))
            .reply(&register_pdu(&[9]));
        let mut client = GenericModbusClient::new(mock);

        assert_eq!(client.read_03(1, 0, 1).await.unwrap(), vec![9]);
        assert_eq!(client.transport().closes, 1);
        assert_eq!(client.transport().connects, 2);
    }

    #[tokio::test]
    async fn test_send_failure_reconnects_within_attempt() {
        let mock = MockTransport::new()
            .fail_next_send(ModbusError::connection("broken pipe"))
            .reply(&register_pdu(&[7]));
        let mut client = GenericModbusClient::new(mock);

        let values = client.read_03_with_retries(1, 0, 1, 0).await.unwrap();

        assert_eq!(values, vec![7]);
        assert_eq!(client.transport().connects, 2);
        assert_eq!(client.engine_stats().attempts, 1);
    }

    #[tokio::test]
    async fn test_callback_logger_sees_frames() {
        use std::sync::{Arc, Mutex};

        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let logger = CallbackLogger::disabled().with_frame_hook(Arc::new(
            move |dir: Direction, bytes: &[u8]| {
                sink.lock().unwrap().push((dir, bytes.len()));
            },
        ));

        let mock = MockTransport::new().reply(&register_pdu(&[1, 2]));
        let mut client = GenericModbusClient::with_logger(mock, logger);
        client.read_03(1, 0, 2).await.unwrap();

        assert_eq!(
            frames.lock().unwrap().as_slice(),
            &[(Direction::Tx, 12), (Direction::Rx, 13)]
        );
    }

    #[test]
    fn test_tcp_client_from_invalid_config() {
        let err = ModbusTcpClient::from_config(ClientConfig::new("").with_port(502));
        assert!(matches!(err, Err(ModbusError::Configuration { .. })));

        let client = ModbusTcpClient::from_config(ClientConfig::new("10.1.1.1")).unwrap();
        assert_eq!(client.peer(), "10.1.1.1:502");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_from_address_rejects_malformed() {
        let err = ModbusTcpClient::from_address("no-port", Duration::from_secs(1)).await;
        assert!(matches!(err, Err(ModbusError::Configuration { .. })));
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("10.0.0.7:502").unwrap(), ("10.0.0.7".to_string(), 502));
        assert_eq!(
            split_address("gateway.local:1502").unwrap(),
            ("gateway.local".to_string(), 1502)
        );
        assert_eq!(split_address("[::1]:1502").unwrap(), ("::1".to_string(), 1502));
        assert_eq!(
            split_address("[fe80::2]:502").unwrap(),
            ("fe80::2".to_string(), 502)
        );

        for bad in ["no-port", "host:", "host:70000", "::1:502"] {
            assert!(
                matches!(split_address(bad), Err(ModbusError::Configuration { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_from_config_uses_timeout_as_response_deadline() {
        let config = ClientConfig::new("10.1.1.1").with_timeout(Duration::from_millis(200));
        let client = ModbusTcpClient::from_config(config).unwrap();
        assert_eq!(client.profile().response_timeout, Duration::from_millis(200));

        let config = ClientConfig::new("10.1.1.1")
            .with_profile(DeviceProfile::actuator())
            .with_timeout(Duration::from_millis(200));
        let client = ModbusTcpClient::from_config(config).unwrap();
        assert_eq!(client.profile(), &DeviceProfile::actuator());
    }

    proptest! {
        #[test]
        fn prop_transaction_ids_follow_counter(
            start in any::<u16>(),
            count in 1usize..=40,
        ) {
            let mut mock = MockTransport::new();
            for _ in 0..count {
                mock = mock.reply(&register_pdu(&[1]));
            }
            let mut client = GenericModbusClient::new(mock).with_initial_transaction_id(start);

            for _ in 0..count {
                tokio_test::block_on(client.read_03(1, 0, 1)).unwrap();
            }

            let expected: Vec<u16> = (0..count as u16).map(|i| start.wrapping_add(i)).collect();
            prop_assert_eq!(client.last_transaction_id(), expected[count - 1]);
            prop_assert_eq!(client.transport().sent_transaction_ids(), expected);
        }

        #[test]
        fn prop_read_decodes_synthetic_response(
            address in 0u16..=0xFF00,
            values in proptest::collection::vec(any::<u16>(), 1..=125),
        ) {
            let mock = MockTransport::new().reply(&register_pdu(&values));
            let mut client = GenericModbusClient::new(mock);
            let quantity = values.len() as u16;

            let decoded = tokio_test::block_on(client.read_03(1, address, quantity)).unwrap();
            prop_assert_eq!(decoded, values);
        }

        #[test]
        fn prop_write_echo_decides_outcome(
            address in 0u16..=0xFF00,
            count in 1usize..=123,
            echo_delta in 0u16..3,
        ) {
            let values = vec![0xA5A5u16; count];
            let echo_quantity = count as u16 + echo_delta;
            let mut echo = vec![0x10];
            echo.extend_from_slice(&address.to_be_bytes());
            echo.extend_from_slice(&echo_quantity.to_be_bytes());

            let mock = MockTransport::new().reply(&echo);
            let mut client = GenericModbusClient::new(mock);
            let result =
                tokio_test::block_on(client.write_10_with_retries(1, address, &values, 0));

            if echo_delta == 0 {
                prop_assert!(result.is_ok());
            } else {
                let is_mismatch = matches!(result, Err(ModbusError::Mismatch { .. }));
                prop_assert!(is_mismatch);
            }
        }
    }
}
