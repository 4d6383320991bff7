//! Raw frame layout and packet assembly.
//!
//! A raw frame is `[CMD][ID][LEN][PAYLOAD...][CRC8]`; on the wire it is
//! COBS-stuffed and followed by a single `0x00` delimiter. All payload
//! scalars are little-endian.

use crate::cobs;
use crate::crc::crc8;
use crate::error::MountError;
use rand::Rng;

// -- Host to mount --
pub const CMD_PING: u8 = 0x01;
pub const CMD_ACK: u8 = 0x06;
pub const CMD_MOVE_STATIC: u8 = 0x10;
pub const CMD_MOVE_RELATIVE: u8 = 0x11;
pub const CMD_MOVE_LINEAR: u8 = 0x12;
pub const CMD_TRACK_CELESTIAL: u8 = 0x13;
pub const CMD_STOP: u8 = 0x20;
pub const CMD_PAUSE: u8 = 0x21;
pub const CMD_RESUME: u8 = 0x22;
pub const CMD_GET_POSITIONS: u8 = 0x30;

// -- Mount to host --
pub const EVT_POSITION: u8 = 0x40;
pub const EVT_STATUS: u8 = 0x41;
pub const EVT_REFLOST: u8 = 0x42;

/// Frame overhead: CMD + ID + LEN + CRC8.
pub const HEADER_AND_CRC: usize = 4;

/// A parsed raw frame.
///
/// `payload` holds every byte between LEN and the CRC, even when the
/// declared LEN disagrees with the observed block size; `declared_len`
/// keeps the value the firmware wrote so callers can log the mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub id: u8,
    pub declared_len: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// True when the declared length matched the observed block size.
    pub fn len_consistent(&self) -> bool {
        self.declared_len as usize == self.payload.len()
    }
}

/// Assemble a complete wire packet: stuffed frame plus the `0x00` delimiter.
pub fn build_packet(cmd: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(id != 0, "message ID 0 is reserved");
    debug_assert!(payload.len() <= u8::MAX as usize);

    let mut raw = Vec::with_capacity(payload.len() + HEADER_AND_CRC);
    raw.push(cmd);
    raw.push(id);
    raw.push(payload.len() as u8);
    raw.extend_from_slice(payload);
    raw.push(crc8(&raw));

    let mut packet = cobs::encode(&raw);
    packet.push(0);
    packet
}

/// Parse an unstuffed raw frame.
///
/// Checks the minimum size, the CRC (always over every byte before the
/// CRC octet, independent of LEN), and the ID. A frame whose declared LEN
/// disagrees with the observed size is still returned; the payload is
/// re-derived from the block size and the caller decides how loudly to
/// complain. Firmware is known to append unadvertised trailing fields.
pub fn parse_frame(raw: &[u8]) -> Result<Frame, MountError> {
    if raw.len() < HEADER_AND_CRC {
        return Err(MountError::Protocol(format!(
            "frame too short: {} bytes",
            raw.len()
        )));
    }

    let computed = crc8(&raw[..raw.len() - 1]);
    let received = raw[raw.len() - 1];
    if computed != received {
        return Err(MountError::Integrity { computed, received });
    }

    let id = raw[1];
    if id == 0 {
        return Err(MountError::Protocol("message ID 0 received".into()));
    }

    Ok(Frame {
        cmd: raw[0],
        id,
        declared_len: raw[2],
        payload: raw[3..raw.len() - 1].to_vec(),
    })
}

/// Message-ID allocator.
///
/// IDs are one octet, 1..=255; 0 is reserved. Each allocation draws a
/// fresh uniform value that differs from the previous one, so the peer
/// can tell a retransmission (same ID) from a new command (new ID).
#[derive(Debug)]
pub struct MsgIdGen {
    last: u8,
}

impl MsgIdGen {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_id(&mut self) -> u8 {
        let mut rng = rand::thread_rng();
        loop {
            let id: u8 = rng.gen_range(1..=255);
            if id != self.last {
                self.last = id;
                return id;
            }
        }
    }
}

impl Default for MsgIdGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cobs;

    fn strip(packet: &[u8]) -> Vec<u8> {
        assert_eq!(*packet.last().unwrap(), 0, "packet must end in delimiter");
        cobs::decode(&packet[..packet.len() - 1]).unwrap()
    }

    #[test]
    fn packet_has_single_trailing_zero() {
        let packet = build_packet(CMD_PAUSE, 0x42, &[]);
        assert_eq!(packet.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(*packet.last().unwrap(), 0);
    }

    #[test]
    fn round_trip_fields() {
        for cmd in [CMD_PING, CMD_MOVE_STATIC, CMD_TRACK_CELESTIAL, EVT_STATUS] {
            for id in 1..=255u8 {
                let payload: Vec<u8> = (0..(id % 61)).collect();
                let packet = build_packet(cmd, id, &payload);
                let frame = parse_frame(&strip(&packet)).unwrap();
                assert_eq!(frame.cmd, cmd);
                assert_eq!(frame.id, id);
                assert_eq!(frame.payload, payload);
                assert!(frame.len_consistent());
            }
        }
    }

    #[test]
    fn zero_heavy_payload_survives_stuffing() {
        let payload = [0u8; 32];
        let packet = build_packet(CMD_MOVE_LINEAR, 7, &payload);
        assert_eq!(packet.iter().filter(|&&b| b == 0).count(), 1);
        let frame = parse_frame(&strip(&packet)).unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn rejects_bad_crc() {
        let packet = build_packet(CMD_STOP, 9, &[1, 2, 3]);
        let mut raw = strip(&packet);
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        assert!(matches!(
            parse_frame(&raw),
            Err(MountError::Integrity { .. })
        ));
    }

    #[test]
    fn rejects_zero_id() {
        let mut raw = vec![CMD_STOP, 0, 0];
        raw.push(crc8(&raw));
        assert!(matches!(parse_frame(&raw), Err(MountError::Protocol(_))));
    }

    #[test]
    fn rejects_short_frame() {
        assert!(parse_frame(&[CMD_ACK, 1, 0]).is_err());
    }

    #[test]
    fn tolerates_unadvertised_trailing_bytes() {
        // LEN says 2 but the block carries 4 payload bytes.
        let mut raw = vec![EVT_POSITION, 5, 2, 0xAA, 0xBB, 0xCC, 0xDD];
        raw.push(crc8(&raw));
        let frame = parse_frame(&raw).unwrap();
        assert!(!frame.len_consistent());
        assert_eq!(frame.declared_len, 2);
        assert_eq!(frame.payload, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn id_allocator_never_repeats_adjacent() {
        let mut gen = MsgIdGen::new();
        let mut last = 0u8;
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert_ne!(id, 0);
            assert_ne!(id, last);
            last = id;
        }
    }
}
