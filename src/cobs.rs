//! Consistent-Overhead Byte Stuffing.
//!
//! Removes every `0x00` from a payload so a zero byte can delimit packets
//! on the wire. Worst-case overhead is one byte per 254 bytes of input
//! plus the leading code byte.

use crate::error::MountError;
use crate::Result;

/// Stuff `src` so the output contains no zero byte.
///
/// The caller appends the `0x00` delimiter itself when framing a packet.
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() + src.len() / 254 + 1);
    let mut code_idx = out.len();
    out.push(0); // placeholder for the first code byte
    let mut code: u8 = 1;

    for &b in src {
        if b == 0 {
            out[code_idx] = code;
            code = 1;
            code_idx = out.len();
            out.push(0);
        } else {
            out.push(b);
            code += 1;
            if code == 0xFF {
                out[code_idx] = code;
                code = 1;
                code_idx = out.len();
                out.push(0);
            }
        }
    }

    out[code_idx] = code;
    out
}

/// Unstuff a block (without its trailing delimiter).
///
/// Fails on a zero code byte or a code that runs past the end of input;
/// both mean the block was corrupted or mis-delimited.
pub fn decode(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;

    while i < src.len() {
        let code = src[i];
        if code == 0 {
            return Err(MountError::Framing("zero code byte inside stuffed block"));
        }
        i += 1;
        let end = i + code as usize - 1;
        if end > src.len() {
            return Err(MountError::Framing("code byte runs past end of block"));
        }
        out.extend_from_slice(&src[i..end]);
        i = end;
        if code < 0xFF && i < src.len() {
            out.push(0);
        }
    }

    Ok(out)
}
