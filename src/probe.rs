//! Terminal liveness probing via ANSI Cursor Position Reports.
//!
//! The probe writes `ESC [ 6 n` to the terminal and waits, in raw mode and
//! under a deadline, for anything to come back. A syntactically valid CPR
//! reply (`ESC [ rows ; cols R`) is consumed silently; any other non-control
//! byte still proves the terminal is alive but is captured so the caller can
//! forward it to the wrapped program instead of swallowing a keystroke that
//! raced the probe. The row and column values are never parsed; only the
//! shape of the reply matters.

use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{tcdrain, InputFlags, SetArg, Termios};
use nix::unistd::read;

use crate::clock::Deadline;
use crate::flow::XOFF;
use crate::tty::{write_all, TermiosGuard};

/// The Cursor Position Report request, `ESC [ 6 n`.
pub const CPR_REQUEST: &[u8] = b"\x1b[6n";

const ESC: u8 = 0x1b;

/// Longest well-formed reply: `ESC [ 9 9 9 ; 9 9 9 R`.
const REPLY_CAPACITY: usize = 10;

/// How much longer to wait when the terminal suspends transmission
/// mid-reply.
const XOFF_EXTENSION: Duration = Duration::from_millis(100);

/// What a probe concluded about the device on the far end of the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// An I/O error prevented the probe from reaching a verdict.
    Unknown,
    /// The deadline passed without a single non-control byte.
    Offline,
    /// Something answered. A malformed reply still counts: only a terminal
    /// (or a human at one) produces bytes at all.
    Online,
}

/// Fixed-size capture area for the bytes that fed the reply validator.
#[derive(Debug, Clone, Copy)]
pub struct ReplyBuffer {
    bytes: [u8; REPLY_CAPACITY],
    len: usize,
}

impl ReplyBuffer {
    fn new() -> Self {
        Self {
            bytes: [0; REPLY_CAPACITY],
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len < REPLY_CAPACITY {
            self.bytes[self.len] = byte;
            self.len += 1;
        }
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Outcome of a single probe.
///
/// `stray` is empty when a well-formed CPR was received and consumed; after
/// a mismatch it holds the captured bytes, in arrival order, for forwarding
/// to the child. `error` carries the failing errno when `state` is
/// [`DeviceState::Unknown`].
#[derive(Debug)]
pub struct ProbeReport {
    pub state: DeviceState,
    pub stray: ReplyBuffer,
    pub error: Option<Errno>,
}

impl ProbeReport {
    fn unknown(error: Option<Errno>) -> Self {
        Self {
            state: DeviceState::Unknown,
            stray: ReplyBuffer::new(),
            error,
        }
    }
}

/// Byte classes the reply validator distinguishes. Control characters other
/// than ESC never reach the validator; the probe loop filters them first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteClass {
    Esc,
    OpenBracket,
    Digit,
    Semicolon,
    Terminator,
    Other,
}

fn classify(byte: u8) -> ByteClass {
    match byte {
        ESC => ByteClass::Esc,
        b'[' => ByteClass::OpenBracket,
        b'0'..=b'9' => ByteClass::Digit,
        b';' => ByteClass::Semicolon,
        b'R' => ByteClass::Terminator,
        _ => ByteClass::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Advanced,
    Complete,
    Mismatch,
}

/// Ten-step acceptor for `ESC \[ [0-9]{1,3} ; [0-9]{1,3} R`.
///
/// Steps: 0 = ESC, 1 = `[`, 2-4 = row digits, 5 = `;`, 6-8 = column digits,
/// 9 = `R`. The row and column fields are one to three digits wide; a `;`
/// arriving at step 3 or 4, or an `R` at step 7 or 8, jumps to the start of
/// the next field.
#[derive(Debug, Default)]
struct CprValidator {
    step: u8,
}

impl CprValidator {
    fn feed(&mut self, byte: u8) -> Progress {
        let class = classify(byte);

        // Short row/column fields end early.
        match (self.step, class) {
            (3 | 4, ByteClass::Semicolon) => self.step = 5,
            (7 | 8, ByteClass::Terminator) => self.step = 9,
            _ => {}
        }

        let accepted = matches!(
            (self.step, class),
            (0, ByteClass::Esc)
                | (1, ByteClass::OpenBracket)
                | (2..=4, ByteClass::Digit)
                | (5, ByteClass::Semicolon)
                | (6..=8, ByteClass::Digit)
                | (9, ByteClass::Terminator)
        );

        if !accepted {
            Progress::Mismatch
        } else if self.step == 9 {
            Progress::Complete
        } else {
            self.step += 1;
            Progress::Advanced
        }
    }
}

/// ASCII control characters, including DEL and the C1 range.
fn is_control(byte: u8) -> bool {
    matches!(byte, 0x00..=0x1f | 0x7f | 0x80..=0x9f)
}

/// Probe the terminal behind `tty` and report whether it is alive.
///
/// The terminal is switched to raw mode for the duration (pending input is
/// flushed so stale bytes cannot be mistaken for a reply) and its original
/// attributes are restored on every exit path. `reply_timeout` should be at
/// least 10 ms; an XOFF received mid-reply extends the deadline by 100 ms
/// when the original attributes have IXOFF set, so a terminal that pauses
/// transmission can still finish answering.
pub fn ping_tty(tty: BorrowedFd<'_>, reply_timeout: Duration) -> ProbeReport {
    // Restore with TCSADRAIN so a reply already queued for output is not
    // discarded along with the raw attributes.
    let guard = match TermiosGuard::enter_raw(tty, SetArg::TCSAFLUSH, SetArg::TCSADRAIN) {
        Ok(guard) => guard,
        Err(err) => return ProbeReport::unknown(Some(err)),
    };

    let report = exchange(tty, guard.original(), reply_timeout);
    drop(guard);
    report
}

fn exchange(tty: BorrowedFd<'_>, original: &Termios, reply_timeout: Duration) -> ProbeReport {
    if let Err(err) = write_all(tty, CPR_REQUEST) {
        return ProbeReport::unknown(Some(err));
    }
    if let Err(err) = tcdrain(tty) {
        return ProbeReport::unknown(Some(err));
    }

    let ixoff = original.input_flags.contains(InputFlags::IXOFF);
    let mut deadline = Deadline::after(reply_timeout);
    let mut validator = CprValidator::default();
    let mut report = ProbeReport {
        state: DeviceState::Offline,
        stray: ReplyBuffer::new(),
        error: None,
    };

    loop {
        let remaining = deadline.remaining_ms();
        if remaining <= 0 {
            break;
        }

        let mut fds = [PollFd::new(tty, PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(remaining).unwrap_or(PollTimeout::MAX);
        match poll(&mut fds, timeout) {
            Ok(0) => break,
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents
                    .intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL)
                {
                    break;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => {
                report.state = DeviceState::Unknown;
                report.error = Some(err);
                break;
            }
        }

        let mut byte = [0u8; 1];
        match read(tty, &mut byte) {
            Ok(0) => break,
            Ok(_) => {
                let byte = byte[0];

                // Stray flow control or line noise proves nothing about the
                // device; only bytes that could be part of a reply (or of
                // someone typing) do.
                if byte != ESC && is_control(byte) {
                    if byte == XOFF && ixoff {
                        deadline.extend(XOFF_EXTENSION);
                    }
                    continue;
                }

                report.state = DeviceState::Online;
                let progress = validator.feed(byte);
                report.stray.push(byte);
                match progress {
                    Progress::Advanced => {}
                    Progress::Complete => {
                        report.stray.clear();
                        break;
                    }
                    Progress::Mismatch => break,
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => {
                report.state = DeviceState::Unknown;
                report.error = Some(err);
                break;
            }
        }
    }

    tracing::debug!(state = ?report.state, stray = report.stray.as_bytes().len(), "probe finished");
    report
}
