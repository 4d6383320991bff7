//! Length-prefixed framing for the camera live-view TCP channel.
//!
//! This is a separate transport from the mount serial protocol: frames
//! are `[u8 type][u32 big-endian length][payload]` with no stuffing and
//! no checksum, carried over TCP which already guarantees integrity.

use std::io::{self, Read, Write};

/// Frame type: JSON metadata about the running exposure.
pub const FRAME_METADATA: u8 = 0x01;
/// Frame type: a JPEG preview image.
pub const FRAME_PREVIEW: u8 = 0x02;
/// Frame type: JSON command from the viewer to the camera host.
pub const FRAME_COMMAND: u8 = 0x03;

/// Upper bound on an accepted payload; a preview frame should never come
/// close, so anything larger means a desynchronized stream.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Write one frame.
pub fn write_frame<W: Write>(w: &mut W, kind: u8, payload: &[u8]) -> io::Result<()> {
    w.write_all(&[kind])?;
    w.write_all(&(payload.len() as u32).to_be_bytes())?;
    w.write_all(payload)?;
    w.flush()
}

/// Read one frame, returning its type and payload.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header)?;
    let kind = header[0];
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("live-view frame of {} bytes exceeds limit", len),
        ));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok((kind, payload))
}
