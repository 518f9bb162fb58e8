//! Modbus TCP message model
//!
//! A Modbus TCP frame is the MBAP header followed by the PDU, big-endian throughout:
//!
//! | Offset | Field          | Size |
//! |--------|----------------|------|
//! | 0      | Transaction ID | 2B   |
//! | 2      | Protocol ID    | 2B   |
//! | 4      | Length         | 2B   |
//! | 6      | Unit ID        | 1B   |
//! | 7..    | Function + data| var  |
//!
//! [`RegisterOperation`] describes *what* the caller asked for and is validated
//! once. Each attempt wraps it into a [`ModbusRequest`] with a fresh
//! transaction id.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{
    ADDRESS_SPACE, EXCEPTION_ACKNOWLEDGE, EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
    EXCEPTION_GATEWAY_TARGET_FAILED, EXCEPTION_ILLEGAL_DATA_ADDRESS,
    EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION, EXCEPTION_MEMORY_PARITY_ERROR,
    EXCEPTION_NEGATIVE_ACKNOWLEDGE, EXCEPTION_SERVER_DEVICE_BUSY,
    EXCEPTION_SERVER_DEVICE_FAILURE, FC_READ_HOLDING_REGISTERS, FC_READ_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, MAX_MBAP_LENGTH, MAX_READ_REGISTERS,
    MAX_READ_WRITE_WRITE_REGISTERS, MAX_WRITE_REGISTERS, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{ModbusPdu, PduBuilder};

/// Unit identifier of the device behind the gateway
pub type UnitId = u8;

/// MBAP transaction identifier
pub type TransactionId = u16;

// ============================================================================
// Function codes
// ============================================================================

/// Function codes this client issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    /// FC03
    ReadHoldingRegisters,
    /// FC16
    WriteMultipleRegisters,
    /// FC23
    ReadWriteMultipleRegisters,
}

impl ModbusFunction {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
            Self::ReadWriteMultipleRegisters => FC_READ_WRITE_MULTIPLE_REGISTERS,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            FC_READ_HOLDING_REGISTERS => Some(Self::ReadHoldingRegisters),
            FC_WRITE_MULTIPLE_REGISTERS => Some(Self::WriteMultipleRegisters),
            FC_READ_WRITE_MULTIPLE_REGISTERS => Some(Self::ReadWriteMultipleRegisters),
            _ => None,
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:02X})",
            ModbusPdu::function_code_description(self.to_u8()),
            self.to_u8()
        )
    }
}

// ============================================================================
// Exception codes
// ============================================================================

/// Exception code carried by an exception response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    /// Code outside the standard table
    Unknown(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => Self::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Self::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => Self::IllegalDataValue,
            EXCEPTION_SERVER_DEVICE_FAILURE => Self::SlaveDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => Self::Acknowledge,
            EXCEPTION_SERVER_DEVICE_BUSY => Self::SlaveDeviceBusy,
            EXCEPTION_NEGATIVE_ACKNOWLEDGE => Self::NegativeAcknowledge,
            EXCEPTION_MEMORY_PARITY_ERROR => Self::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Self::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => Self::GatewayTargetFailedToRespond,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            Self::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Self::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            Self::SlaveDeviceFailure => EXCEPTION_SERVER_DEVICE_FAILURE,
            Self::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            Self::SlaveDeviceBusy => EXCEPTION_SERVER_DEVICE_BUSY,
            Self::NegativeAcknowledge => EXCEPTION_NEGATIVE_ACKNOWLEDGE,
            Self::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            Self::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            Self::GatewayTargetFailedToRespond => EXCEPTION_GATEWAY_TARGET_FAILED,
            Self::Unknown(code) => code,
        }
    }

    /// Short name of the exception
    pub fn name(self) -> &'static str {
        match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::Acknowledge => "acknowledge",
            Self::SlaveDeviceBusy => "slave device busy",
            Self::NegativeAcknowledge => "negative acknowledge",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "gateway target device failed to respond",
            Self::Unknown(_) => "unreferenced exception",
        }
    }

    /// Verbose description of what the device is telling us
    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => {
                "Function code received in the query is not recognized or allowed by slave"
            }
            Self::IllegalDataAddress => {
                "Data address of some or all the required entities are not allowed or do not exist in slave"
            }
            Self::IllegalDataValue => "Value is not accepted by slave",
            Self::SlaveDeviceFailure => {
                "Unrecoverable error occurred while slave was attempting to perform requested action"
            }
            Self::Acknowledge => {
                "Slave has accepted request and is processing it, but a long duration of time is required"
            }
            Self::SlaveDeviceBusy => "Slave is engaged in processing a long-duration command",
            Self::NegativeAcknowledge => "Slave cannot perform the programming functions",
            Self::MemoryParityError => "Slave detected a parity error in memory",
            Self::GatewayPathUnavailable => {
                "Specialized for Modbus gateways: gateway is misconfigured or overloaded"
            }
            Self::GatewayTargetFailedToRespond => {
                "Specialized for Modbus gateways: no response was obtained from the target device"
            }
            Self::Unknown(_) => "Exception code outside the Modbus table",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unreferenced exception 0x{:02X}", code),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// MBAP header
// ============================================================================

/// Modbus Application Protocol header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: TransactionId,
    pub protocol_id: u16,
    /// Byte count following the length field (unit id + PDU)
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    pub const SIZE: usize = MBAP_HEADER_LEN;

    /// Header for a PDU of `pdu_len` bytes
    pub fn for_pdu(transaction_id: TransactionId, unit_id: UnitId, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.transaction_id);
        buf.put_u16(self.protocol_id);
        buf.put_u16(self.length);
        buf.put_u8(self.unit_id);
    }

    /// Decode and validate a received header.
    ///
    /// A zero length cannot even hold the unit id, and anything above 254
    /// exceeds the largest PDU, so both are treated as a desynchronized stream.
    pub fn decode(bytes: &[u8]) -> ModbusResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(ModbusError::framing(format!(
                "MBAP header truncated: {} of {} bytes",
                bytes.len(),
                Self::SIZE
            )));
        }

        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };

        if header.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(ModbusError::framing(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }
        if header.length == 0 {
            return Err(ModbusError::framing("MBAP length is zero"));
        }
        if header.length as usize > MAX_MBAP_LENGTH {
            return Err(ModbusError::framing(format!(
                "MBAP length {} exceeds maximum {}",
                header.length, MAX_MBAP_LENGTH
            )));
        }

        Ok(header)
    }

    /// Number of PDU bytes following the header
    #[inline]
    pub fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }
}

// ============================================================================
// Operations and requests
// ============================================================================

/// Register operation requested by the caller, validated before any I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOperation {
    /// FC03
    Read { address: u16, quantity: u16 },
    /// FC16
    Write { address: u16, values: Vec<u16> },
    /// FC23: write `values` at `write_address`, then read `read_quantity` from `read_address`
    ReadWrite {
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: Vec<u16>,
    },
}

/// Decoded reply to a [`RegisterOperation`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationReply {
    Registers(Vec<u16>),
    Written,
}

fn check_range(what: &str, address: u16, count: usize, max: usize) -> ModbusResult<()> {
    if count == 0 || count > max {
        return Err(ModbusError::invalid_argument(format!(
            "{} count {} out of range (valid from 1 to {})",
            what, count, max
        )));
    }
    if address as u32 + count as u32 > ADDRESS_SPACE {
        return Err(ModbusError::invalid_argument(format!(
            "{} of {} registers at {} runs past the end of the address space",
            what, count, address
        )));
    }
    Ok(())
}

impl RegisterOperation {
    /// Read `quantity` holding registers (1..=125) starting at `address`
    pub fn read(address: u16, quantity: u16) -> ModbusResult<Self> {
        check_range("read", address, quantity as usize, MAX_READ_REGISTERS)?;
        Ok(Self::Read { address, quantity })
    }

    /// Write 1..=123 registers starting at `address`
    pub fn write(address: u16, values: &[u16]) -> ModbusResult<Self> {
        check_range("write", address, values.len(), MAX_WRITE_REGISTERS)?;
        Ok(Self::Write {
            address,
            values: values.to_vec(),
        })
    }

    /// Write 1..=121 registers then read 1..=125 registers in one transaction
    pub fn read_write(
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<Self> {
        check_range(
            "read",
            read_address,
            read_quantity as usize,
            MAX_READ_REGISTERS,
        )?;
        check_range(
            "write",
            write_address,
            values.len(),
            MAX_READ_WRITE_WRITE_REGISTERS,
        )?;
        Ok(Self::ReadWrite {
            read_address,
            read_quantity,
            write_address,
            values: values.to_vec(),
        })
    }

    pub fn function(&self) -> ModbusFunction {
        match self {
            Self::Read { .. } => ModbusFunction::ReadHoldingRegisters,
            Self::Write { .. } => ModbusFunction::WriteMultipleRegisters,
            Self::ReadWrite { .. } => ModbusFunction::ReadWriteMultipleRegisters,
        }
    }

    pub fn to_pdu(&self) -> ModbusResult<ModbusPdu> {
        match self {
            Self::Read { address, quantity } => {
                PduBuilder::build_read_holding_registers(*address, *quantity)
            }
            Self::Write { address, values } => {
                PduBuilder::build_write_multiple_registers(*address, values)
            }
            Self::ReadWrite {
                read_address,
                read_quantity,
                write_address,
                values,
            } => PduBuilder::build_read_write_multiple_registers(
                *read_address,
                *read_quantity,
                *write_address,
                values,
            ),
        }
    }

    /// Decode a response PDU against this operation.
    ///
    /// Exception responses become [`ModbusError::Exception`]. A function code,
    /// register count or write echo that does not match becomes
    /// [`ModbusError::Mismatch`].
    pub fn decode_reply(&self, pdu: &ModbusPdu) -> ModbusResult<OperationReply> {
        let expected_fc = self.function().to_u8();
        let fc = pdu
            .function_code()
            .ok_or_else(|| ModbusError::framing("empty response PDU"))?;

        if pdu.is_exception() {
            if fc & 0x7F != expected_fc {
                return Err(ModbusError::mismatch(format!(
                    "exception for function 0x{:02X}, expected 0x{:02X}",
                    fc & 0x7F,
                    expected_fc
                )));
            }
            let code = pdu
                .exception_code()
                .ok_or_else(|| ModbusError::framing("exception response without code"))?;
            return Err(ModbusError::exception(fc, code));
        }

        if fc != expected_fc {
            return Err(ModbusError::mismatch(format!(
                "function code 0x{:02X} in response, expected 0x{:02X}",
                fc, expected_fc
            )));
        }

        match self {
            Self::Read { quantity, .. } => pdu.registers(*quantity).map(OperationReply::Registers),
            Self::ReadWrite { read_quantity, .. } => {
                pdu.registers(*read_quantity).map(OperationReply::Registers)
            }
            Self::Write { address, values } => {
                let (echo_address, echo_quantity) = match (pdu.u16_at(1), pdu.u16_at(3)) {
                    (Some(a), Some(q)) if pdu.len() == 5 => (a, q),
                    _ => {
                        return Err(ModbusError::framing(format!(
                            "write response must be 5 bytes, got {}",
                            pdu.len()
                        )))
                    }
                };
                if echo_address != *address || echo_quantity as usize != values.len() {
                    return Err(ModbusError::mismatch(format!(
                        "write echo address={} quantity={}, expected address={} quantity={}",
                        echo_address,
                        echo_quantity,
                        address,
                        values.len()
                    )));
                }
                Ok(OperationReply::Written)
            }
        }
    }
}

/// One attempt of an operation, bound to a transaction id and unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub transaction_id: TransactionId,
    pub unit_id: UnitId,
    pub operation: RegisterOperation,
}

impl ModbusRequest {
    pub fn new(transaction_id: TransactionId, unit_id: UnitId, operation: RegisterOperation) -> Self {
        Self {
            transaction_id,
            unit_id,
            operation,
        }
    }

    pub fn function(&self) -> ModbusFunction {
        self.operation.function()
    }

    /// Serialize into a complete MBAP + PDU frame
    pub fn encode(&self) -> ModbusResult<Bytes> {
        let pdu = self.operation.to_pdu()?;
        let header = MbapHeader::for_pdu(self.transaction_id, self.unit_id, pdu.len());

        let mut buf = BytesMut::with_capacity(MbapHeader::SIZE + pdu.len());
        header.encode(&mut buf);
        buf.put_slice(pdu.as_slice());
        Ok(buf.freeze())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// A received frame: validated header plus PDU
#[derive(Debug, Clone)]
pub struct ModbusResponse {
    pub header: MbapHeader,
    pub pdu: ModbusPdu,
}

impl ModbusResponse {
    /// Assemble a response from a decoded header and the PDU bytes read after it
    pub fn from_parts(header: MbapHeader, pdu: &[u8]) -> ModbusResult<Self> {
        if pdu.len() != header.pdu_len() {
            return Err(ModbusError::framing(format!(
                "declared PDU length {} but got {} bytes",
                header.pdu_len(),
                pdu.len()
            )));
        }
        Ok(Self {
            header,
            pdu: ModbusPdu::from_slice(pdu)?,
        })
    }

    /// Decode one complete frame from a byte slice
    pub fn decode(frame: &[u8]) -> ModbusResult<Self> {
        let header = MbapHeader::decode(frame)?;
        let body = &frame[MbapHeader::SIZE..];
        if body.len() < header.pdu_len() {
            return Err(ModbusError::framing(format!(
                "frame truncated: {} of {} PDU bytes",
                body.len(),
                header.pdu_len()
            )));
        }
        Self::from_parts(header, &body[..header.pdu_len()])
    }

    #[inline]
    pub fn transaction_id(&self) -> TransactionId {
        self.header.transaction_id
    }

    #[inline]
    pub fn unit_id(&self) -> UnitId {
        self.header.unit_id
    }

    /// Re-serialize the frame (used for packet logging)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MbapHeader::SIZE + self.pdu.len());
        self.header.encode(&mut buf);
        buf.put_slice(self.pdu.as_slice());
        buf.freeze()
    }
}
