//! sbapi_modbus Demo
//!
//! Reads a block of holding registers from one unit behind a Modbus TCP
//! gateway and optionally writes a block back.
//!
//! Usage: cargo run --features cli --bin demo -- <host> [port] [unit] [address] [count] [--write <address> <v1,v2,...>] [--actuator]
//! Example: cargo run --features cli --bin demo -- 192.168.0.20 502 3 100 2
//!
//! Log verbosity follows `RUST_LOG` (e.g. `RUST_LOG=sbapi_modbus=debug`).

use std::time::Duration;

use sbapi_modbus::{
    ClientConfig, DeviceProfile, ModbusClient, ModbusError, ModbusResult, ModbusTcpClient,
    DEFAULT_TCP_PORT,
};
use tracing_subscriber::EnvFilter;

struct Args {
    host: String,
    port: u16,
    unit: u8,
    address: u16,
    count: u16,
    write: Option<(u16, Vec<u16>)>,
    actuator: bool,
}

fn parse_number<N: std::str::FromStr>(value: Option<&String>, name: &str, default: N) -> ModbusResult<N> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ModbusError::invalid_argument(format!("invalid {}: '{}'", name, raw))),
    }
}

fn parse_args() -> ModbusResult<Args> {
    let mut positional = Vec::new();
    let mut write = None;
    let mut actuator = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--actuator" => actuator = true,
            "--write" => {
                let address = args.next();
                let values = args.next().unwrap_or_default();
                let address = parse_number(address.as_ref(), "write address", 0u16)?;
                let values = values
                    .split(',')
                    .filter(|v| !v.is_empty())
                    .map(|v| {
                        v.trim().parse::<u16>().map_err(|_| {
                            ModbusError::invalid_argument(format!("invalid register value '{}'", v))
                        })
                    })
                    .collect::<ModbusResult<Vec<u16>>>()?;
                write = Some((address, values));
            }
            _ => positional.push(arg),
        }
    }

    Ok(Args {
        host: positional
            .first()
            .cloned()
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        port: parse_number(positional.get(1), "port", DEFAULT_TCP_PORT)?,
        unit: parse_number(positional.get(2), "unit", 1u8)?,
        address: parse_number(positional.get(3), "address", 0u16)?,
        count: parse_number(positional.get(4), "count", 10u16)?,
        write,
        actuator,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let profile = if args.actuator {
        DeviceProfile::actuator()
    } else {
        DeviceProfile::sensor()
    };

    println!("sbapi_modbus v{} demo", sbapi_modbus::VERSION);
    println!("Gateway {}:{}, unit {}", args.host, args.port, args.unit);

    let config = ClientConfig::new(args.host)
        .with_port(args.port)
        .with_timeout(Duration::from_secs(5))
        .with_profile(profile);
    let mut client = ModbusTcpClient::open(config).await?;

    // =========================================================================
    // Read
    // =========================================================================
    let registers = client
        .read_holding_registers(args.unit, args.address, args.count)
        .await?;
    println!("\nHolding registers {}..{}:", args.address, args.address as u32 + args.count as u32);
    for (offset, value) in registers.iter().enumerate() {
        println!("  [{:5}] {:5}  0x{:04X}", args.address as usize + offset, value, value);
    }

    // =========================================================================
    // Optional write
    // =========================================================================
    if let Some((address, values)) = args.write {
        match client.write_multiple_registers(args.unit, address, &values).await {
            Ok(()) => println!("\nWrote {} register(s) at {}", values.len(), address),
            Err(e) => {
                if let Some(code) = e.exception_code() {
                    println!("\nDevice rejected the write: {} ({})", code, code.description());
                }
                return Err(e.into());
            }
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================
    let stats = client.get_stats();
    let engine = client.engine_stats();
    println!("\nStatistics:");
    println!("  Requests sent:      {}", stats.requests_sent);
    println!("  Responses received: {}", stats.responses_received);
    println!("  Bytes sent/recv:    {}/{}", stats.bytes_sent, stats.bytes_received);
    println!("  Retries:            {}", engine.retries);
    println!("  Stale frames:       {}", engine.stale_frames);

    client.close().await?;
    Ok(())
}
