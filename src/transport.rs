//! # Modbus TCP Transport Layer
//!
//! Byte-level delivery of frames to and from one Modbus TCP gateway.
//!
//! The transport knows nothing about transactions or retries. It opens the
//! socket, writes whole frames, and reads exactly one MBAP-framed response at
//! a time:
//!
//! 1. read the 7-byte MBAP header,
//! 2. validate the declared length,
//! 3. read exactly `length - 1` PDU bytes.
//!
//! Any failure that may leave unread bytes on the socket drops the stream, so
//! the next [`ModbusTransport::connect`] starts from a clean connection.
//!
//! ```rust,no_run
//! use sbapi_modbus::transport::{ModbusTransport, TcpTransport};
//! use std::time::Duration;
//!
//! # async fn example() -> sbapi_modbus::ModbusResult<()> {
//! let mut transport = TcpTransport::new("192.168.0.20", 502, Duration::from_secs(5));
//! transport.connect().await?;
//! transport
//!     .send(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x03, 0x03, 0x00, 0xCB, 0x00, 0x06])
//!     .await?;
//! let response = transport.receive(Duration::from_secs(2)).await?;
//! println!("{:?}", response.pdu.as_slice());
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::logging::{log_packet, Direction};
use crate::protocol::{MbapHeader, ModbusResponse};

/// Transport layer abstraction the protocol engine is generic over
///
/// Implementations own a single connection and serve one call at a time;
/// every method takes `&mut self`.
pub trait ModbusTransport: Send + Sync + 'static {
    /// Open the connection. A no-op when already connected.
    fn connect(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Write a complete frame.
    ///
    /// Fails with [`ModbusError::Connection`] when not connected or when the
    /// socket reports an error.
    fn send(&mut self, frame: &[u8]) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    /// Read exactly one MBAP-framed message, waiting at most `timeout`.
    fn receive(
        &mut self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = ModbusResult<ModbusResponse>> + Send;

    /// Release the connection. Safe to call repeatedly.
    fn close(&mut self) -> impl std::future::Future<Output = ModbusResult<()>> + Send;

    fn is_connected(&self) -> bool;

    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub connects: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl TransportStats {
    fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

/// Modbus TCP transport over a tokio `TcpStream`
#[derive(Debug)]
pub struct TcpTransport {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    io_timeout: Duration,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl TcpTransport {
    /// Create a transport; the connection is opened lazily on first use
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
            connect_timeout: timeout,
            io_timeout: timeout,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` of the gateway
    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Drop the socket after a failure and count it
    fn fail(&mut self, error: ModbusError) -> ModbusError {
        self.stats.errors += 1;
        if error.is_timeout() {
            self.stats.timeouts += 1;
        }
        if error.invalidates_connection() && self.stream.take().is_some() {
            debug!("{}: dropping connection after error: {}", self.peer(), error);
        }
        error
    }

    async fn read_frame(
        stream: &mut TcpStream,
        deadline: Instant,
        wait: Duration,
    ) -> ModbusResult<(MbapHeader, Vec<u8>)> {
        let wait_ms = wait.as_millis() as u64;

        let mut header_buf = [0u8; MbapHeader::SIZE];
        timeout_at(deadline, stream.read_exact(&mut header_buf))
            .await
            .map_err(|_| ModbusError::timeout("read response header", wait_ms))??;

        let header = MbapHeader::decode(&header_buf)?;

        let mut pdu = vec![0u8; header.pdu_len()];
        if !pdu.is_empty() {
            timeout_at(deadline, stream.read_exact(&mut pdu))
                .await
                .map_err(|_| ModbusError::timeout("read response PDU", wait_ms))?
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => ModbusError::connection(format!(
                        "connection closed after header, {} PDU bytes missing",
                        header.pdu_len()
                    )),
                    _ => ModbusError::from(e),
                })?;
        }

        Ok((header, pdu))
    }
}

impl ModbusTransport for TcpTransport {
    async fn connect(&mut self) -> ModbusResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let peer = self.peer();
        debug!("connecting to {}", peer);

        let stream = match timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ModbusError::connection(format!(
                    "failed to connect to {}: {}",
                    peer, e
                )));
            }
            Err(_) => {
                self.stats.errors += 1;
                return Err(ModbusError::connection(format!(
                    "connect to {} timed out after {}ms",
                    peer,
                    self.connect_timeout.as_millis()
                )));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("{}: failed to set TCP_NODELAY: {}", peer, e);
        }

        self.stream = Some(stream);
        self.stats.connects += 1;
        self.stats.touch();
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let io_timeout = self.io_timeout;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.fail(ModbusError::connection("not connected")));
        };

        let result = match timeout(io_timeout, stream.write_all(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ModbusError::connection(format!("send failed: {}", e))),
            Err(_) => Err(ModbusError::timeout(
                "send request",
                io_timeout.as_millis() as u64,
            )),
        };
        if let Err(e) = result {
            return Err(self.fail(e));
        }

        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;
        self.stats.touch();

        if self.packet_logging {
            log_packet(Direction::Tx, frame, &self.peer());
        }
        Ok(())
    }

    async fn receive(&mut self, wait: Duration) -> ModbusResult<ModbusResponse> {
        let deadline = Instant::now() + wait;
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.fail(ModbusError::connection("not connected")));
        };

        let (header, pdu) = match Self::read_frame(stream, deadline, wait).await {
            Ok(parts) => parts,
            Err(e) => return Err(self.fail(e)),
        };

        let response = match ModbusResponse::from_parts(header, &pdu) {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += (MbapHeader::SIZE + pdu.len()) as u64;
        self.stats.touch();

        if self.packet_logging {
            log_packet(Direction::Rx, &response.to_bytes(), &self.peer());
        }
        Ok(response)
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("closing connection to {}", self.peer());
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const READ_FRAME: [u8; 12] = [
        0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x03, 0x03, 0x00, 0x64, 0x00, 0x02,
    ];

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_send_and_receive_frame() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 12];
            socket.read_exact(&mut request).await.unwrap();
            assert_eq!(request, READ_FRAME);
            socket
                .write_all(&[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x03, 0x03, 0x04, 0x00, 0xFA, 0x02, 0x58,
                ])
                .await
                .unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(2));
        assert!(!transport.is_connected());
        transport.connect().await.unwrap();
        // Idempotent
        transport.connect().await.unwrap();
        assert_eq!(transport.get_stats().connects, 1);

        transport.send(&READ_FRAME).await.unwrap();
        let response = transport.receive(Duration::from_secs(2)).await.unwrap();
        assert_eq!(response.transaction_id(), 1);
        assert_eq!(response.unit_id(), 3);
        assert_eq!(response.pdu.as_slice(), &[0x03, 0x04, 0x00, 0xFA, 0x02, 0x58]);

        let stats = transport.get_stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_sent, 12);
        assert_eq!(stats.bytes_received, 13);
        assert!(stats.last_activity.is_some());

        server.await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let mut transport = TcpTransport::new("127.0.0.1", 1, Duration::from_millis(100));
        let err = transport.send(&READ_FRAME).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_connection(), "{err:?}");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_receive_timeout_drops_connection() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(socket);
        });

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        transport.connect().await.unwrap();
        let err = transport
            .receive(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "{err:?}");
        assert!(!transport.is_connected());
        assert_eq!(transport.get_stats().timeouts, 1);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_mid_frame() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Header promises 6 more bytes, only 2 follow
            socket
                .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x03, 0x03, 0x04])
                .await
                .unwrap();
        });

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        transport.connect().await.unwrap();
        server.await.unwrap();

        let err = transport.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_connection(), "{err:?}");
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_zero_length_header_is_framing_error() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x03])
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        transport.connect().await.unwrap();
        let err = transport.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ModbusError::Framing { .. }), "{err:?}");
        assert!(!transport.is_connected());

        server.await.unwrap();
    }
}
