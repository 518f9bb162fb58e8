//! Request/response logging
//!
//! Frames are logged as `Tx [MBAP] PDU` hex dumps. By default everything goes
//! through `tracing`; a [`CallbackLogger`] can route messages to a user
//! callback instead and can observe every raw frame sent or received.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::constants::MBAP_HEADER_LEN;
use crate::protocol::{ModbusRequest, ModbusResponse, UnitId};

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Where log messages go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// Drop all messages
    Disabled,
    /// Emit through `tracing`
    #[default]
    Tracing,
    /// Hand messages to the registered [`LogCallback`]
    Callback,
}

/// Frame direction relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => f.write_str("Tx"),
            Self::Rx => f.write_str("Rx"),
        }
    }
}

/// Receives formatted log messages
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Receives every raw frame sent or received
pub type FrameCallback = Arc<dyn Fn(Direction, &[u8]) + Send + Sync>;

/// Format raw bytes as an uppercase hex string, space separated
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a frame as `[MBAP] PDU`
pub fn format_frame(frame: &[u8]) -> String {
    let split = frame.len().min(MBAP_HEADER_LEN);
    format!(
        "[{}] {}",
        format_hex_packet(&frame[..split]),
        format_hex_packet(&frame[split..])
    )
}

/// Emit a packet dump through `tracing`
pub fn log_packet(direction: Direction, frame: &[u8], peer: &str) {
    info!("[MODBUS-TCP] {} {} {}", peer, direction, format_frame(frame));
}

/// Logger attached to a client
#[derive(Clone, Default)]
pub struct CallbackLogger {
    mode: LoggingMode,
    min_level: Option<LogLevel>,
    callback: Option<LogCallback>,
    frame_hook: Option<FrameCallback>,
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("mode", &self.mode)
            .field("min_level", &self.min_level)
            .field("callback", &self.callback.is_some())
            .field("frame_hook", &self.frame_hook.is_some())
            .finish()
    }
}

impl CallbackLogger {
    /// Logger that forwards messages to `callback`
    pub fn new(callback: LogCallback) -> Self {
        Self {
            mode: LoggingMode::Callback,
            min_level: None,
            callback: Some(callback),
            frame_hook: None,
        }
    }

    /// Logger that emits through `tracing`
    pub fn tracing() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            mode: LoggingMode::Disabled,
            ..Self::default()
        }
    }

    /// Drop messages below `level`
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Observe every raw frame, independent of the logging mode
    pub fn with_frame_hook(mut self, hook: FrameCallback) -> Self {
        self.frame_hook = Some(hook);
        self
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if self.min_level.is_some_and(|min| level < min) {
            return;
        }
        match self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Tracing => match level {
                LogLevel::Trace => trace!("{}", message),
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            },
            LoggingMode::Callback => {
                if let Some(callback) = &self.callback {
                    callback(level, message);
                }
            }
        }
    }

    /// Log a raw frame and notify the frame hook
    pub fn log_frame(&self, direction: Direction, unit_id: UnitId, frame: &[u8]) {
        if let Some(hook) = &self.frame_hook {
            hook(direction, frame);
        }
        self.log(
            LogLevel::Debug,
            &format!("unit:{} {} {}", unit_id, direction, format_frame(frame)),
        );
    }

    pub fn log_request(&self, request: &ModbusRequest) {
        self.log(
            LogLevel::Debug,
            &format!(
                "request tid={} unit={} {} {:?}",
                request.transaction_id,
                request.unit_id,
                request.function(),
                request.operation
            ),
        );
    }

    pub fn log_response(&self, response: &ModbusResponse) {
        self.log(
            LogLevel::Debug,
            &format!(
                "response tid={} unit={} pdu={}",
                response.transaction_id(),
                response.unit_id(),
                format_hex_packet(response.pdu.as_slice())
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_format_frame_splits_header() {
        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x03, 0x03, 0x00, 0x64, 0x00, 0x02];
        assert_eq!(
            format_frame(&frame),
            "[00 01 00 00 00 06 03] 03 00 64 00 02"
        );
        assert_eq!(format_frame(&[0xAB]), "[AB] ");
    }

    #[test]
    fn test_callback_receives_messages_above_min_level() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger = CallbackLogger::new(Arc::new(move |level: LogLevel, msg: &str| {
            sink.lock().unwrap().push((level, msg.to_string()));
        }))
        .with_min_level(LogLevel::Info);

        logger.log(LogLevel::Debug, "hidden");
        logger.log(LogLevel::Warn, "shown");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (LogLevel::Warn, "shown".to_string()));
    }

    #[test]
    fn test_frame_hook_sees_raw_bytes() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();
        let logger = CallbackLogger::disabled().with_frame_hook(Arc::new(move |dir: Direction, bytes: &[u8]| {
            sink.lock().unwrap().push((dir, bytes.to_vec()));
        }));

        logger.log_frame(Direction::Tx, 1, &[1, 2, 3]);

        let frames = frames.lock().unwrap();
        assert_eq!(frames.as_slice(), &[(Direction::Tx, vec![1, 2, 3])]);
    }
}
