//! Software flow-control demultiplexing.
//!
//! When the controlling terminal has IXOFF set, XON/XOFF characters embedded
//! in its input are requests aimed at the wrapper, not data for the child.
//! The demultiplexer strips them in place and tracks whether the terminal is
//! currently willing to receive output. It never generates XON/XOFF toward
//! the child; the child's own pseudo-terminal carries independent
//! flow-control settings.

/// DC1, resumes transmission toward the terminal.
pub const XON: u8 = 0x11;

/// DC3, suspends transmission toward the terminal.
pub const XOFF: u8 = 0x13;

/// Remove XON/XOFF characters from `bytes`, compacting the remainder to the
/// front of the buffer, and return the new length.
///
/// Each XON sets `transmit_ok` and each XOFF clears it; when several appear
/// in one buffer the last one wins. A buffer without flow-control characters
/// leaves `transmit_ok` untouched.
pub fn strip_flow_control(bytes: &mut [u8], transmit_ok: &mut bool) -> usize {
    let mut kept = 0;
    for index in 0..bytes.len() {
        let byte = bytes[index];
        if byte == XON || byte == XOFF {
            *transmit_ok = byte == XON;
        } else {
            bytes[kept] = byte;
            kept += 1;
        }
    }
    kept
}
