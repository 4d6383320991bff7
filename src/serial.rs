//! Serial transport: port discovery, open, and the session reset handshake.
//!
//! The controller speaks 9600 8N1. On open the host writes three `0x00`
//! delimiters and drains whatever was buffered, which the firmware takes
//! as "start of session" and which guarantees the receiver starts on a
//! packet boundary.

use crate::error::MountError;
use crate::Result;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BAUD: u32 = 9600;

/// Read timeout of the receiver loop; timeouts are swallowed so the loop
/// can poll its stop flag.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Candidate device paths on a Raspberry Pi class host, tried in order.
pub const CANDIDATE_PORTS: [&str; 4] =
    ["/dev/ttyS0", "/dev/serial0", "/dev/ttyAMA0", "/dev/ttyUSB0"];

/// Environment variable that short-circuits discovery.
pub const PORT_ENV: &str = "ALTAIR_PORT";

/// Pick a serial device: `ALTAIR_PORT` if set, otherwise the first
/// candidate path that exists.
pub fn discover_port() -> Option<String> {
    if let Ok(path) = std::env::var(PORT_ENV) {
        let path = path.trim().to_string();
        if !path.is_empty() {
            return Some(path);
        }
    }
    CANDIDATE_PORTS
        .iter()
        .find(|p| Path::new(p).exists())
        .map(|p| p.to_string())
}

/// Open a mount serial port at 9600 8N1 and run the reset handshake:
/// three `0x00` bytes, a 100 ms pause, then an input-buffer drain.
pub fn open_port(path: &str) -> Result<Box<dyn SerialPort>> {
    let mut port = serialport::new(path, DEFAULT_BAUD)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(READ_TIMEOUT)
        .open()?;

    log::info!("opened {} at {} baud", path, DEFAULT_BAUD);

    port.write_all(&[0, 0, 0])?;
    port.flush()?;
    std::thread::sleep(Duration::from_millis(100));
    port.clear(ClearBuffer::Input)?;

    Ok(port)
}

/// Discover and open, failing with the candidate list if nothing exists.
pub fn open_default() -> Result<Box<dyn SerialPort>> {
    let path = discover_port()
        .ok_or_else(|| MountError::NoDevice(CANDIDATE_PORTS.join(", ")))?;
    open_port(&path)
}
