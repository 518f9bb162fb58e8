//! Arbitrary bytes into the response decoder: must never panic.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sbapi_modbus::{ModbusResponse, RegisterOperation};

#[derive(Debug, Arbitrary)]
struct Input {
    address: u16,
    quantity: u16,
    values: Vec<u16>,
    frame: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let Ok(response) = ModbusResponse::decode(&input.frame) else {
        return;
    };

    if let Ok(read) = RegisterOperation::read(input.address, input.quantity) {
        if let Ok(sbapi_modbus::OperationReply::Registers(values)) = read.decode_reply(&response.pdu) {
            assert_eq!(values.len(), input.quantity as usize);
        }
    }
    if let Ok(write) = RegisterOperation::write(input.address, &input.values) {
        let _ = write.decode_reply(&response.pdu);
    }

    // Re-encoding a decoded frame reproduces its prefix
    let bytes = response.to_bytes();
    assert_eq!(&bytes[..], &input.frame[..bytes.len()]);
});
