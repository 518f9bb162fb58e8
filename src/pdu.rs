//! Modbus PDU data structure
//!
//! Use a fixed-size stack array to avoid heap allocation per request and response.

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, MAX_PDU_SIZE,
};
use crate::error::{ModbusError, ModbusResult};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_PDU_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from received bytes
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::framing(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        match pdu.function_code() {
            Some(fc) if pdu.is_exception() => debug!(
                "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                fc,
                Self::function_code_description(fc),
                pdu.exception_code().unwrap_or(0)
            ),
            Some(fc) => debug!(
                "PDU parsed: FC={:02X} ({}), data_len={}",
                fc,
                Self::function_code_description(fc),
                pdu.len - 1
            ),
            None => debug!("PDU parsed: empty PDU"),
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::invalid_argument("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        if self.len + 2 > MAX_PDU_SIZE {
            return Err(ModbusError::invalid_argument("PDU buffer full"));
        }
        self.data[self.len..self.len + 2].copy_from_slice(&value.to_be_bytes());
        self.len += 2;
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Read a big-endian u16 at `offset`
    #[inline]
    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        if offset + 2 <= self.len {
            Some(u16::from_be_bytes([self.data[offset], self.data[offset + 1]]))
        } else {
            None
        }
    }

    /// Decode the register block of a FC03/FC23 response.
    ///
    /// The byte count must agree with the bytes actually present (else the
    /// frame is malformed) and with the quantity requested (else the response
    /// answers some other request).
    pub fn registers(&self, expected_quantity: u16) -> ModbusResult<Vec<u16>> {
        if self.len < 2 {
            return Err(ModbusError::framing(format!(
                "register response too short: {} bytes",
                self.len
            )));
        }

        let byte_count = self.data[1] as usize;
        let payload = &self.data[2..self.len];
        if byte_count != payload.len() || byte_count % 2 != 0 {
            return Err(ModbusError::framing(format!(
                "byte count {} inconsistent with {} payload bytes",
                byte_count,
                payload.len()
            )));
        }
        if byte_count != expected_quantity as usize * 2 {
            return Err(ModbusError::mismatch(format!(
                "expected {} registers, response carries {}",
                expected_quantity,
                byte_count / 2
            )));
        }

        Ok(payload
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_WRITE_MULTIPLE_REGISTERS => "Write Multiple Registers",
            FC_READ_WRITE_MULTIPLE_REGISTERS => "Read/Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> ModbusResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    /// Add register values in big-endian
    #[inline]
    pub fn registers(mut self, values: &[u16]) -> ModbusResult<Self> {
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    /// Build the PDU
    #[inline]
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Build a read holding registers PDU (FC03)
    pub fn build_read_holding_registers(
        start_address: u16,
        quantity: u16,
    ) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(start_address)?
            .quantity(quantity)?
            .build())
    }

    /// Build a write multiple registers PDU (FC16)
    pub fn build_write_multiple_registers(address: u16, values: &[u16]) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(address)?
            .quantity(values.len() as u16)?
            .byte((values.len() * 2) as u8)?
            .registers(values)?
            .build())
    }

    /// Build a read/write multiple registers PDU (FC23)
    ///
    /// The device performs the write before the read.
    pub fn build_read_write_multiple_registers(
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        values: &[u16],
    ) -> ModbusResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_READ_WRITE_MULTIPLE_REGISTERS)?
            .address(read_address)?
            .quantity(read_quantity)?
            .address(write_address)?
            .quantity(values.len() as u16)?
            .byte((values.len() * 2) as u8)?
            .registers(values)?
            .build())
    }
}
