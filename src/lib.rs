//! Terminal hangup detection and software flow-control bridging.
//!
//! Serial-attached terminals without hardware carrier-detect give no signal
//! when they are switched off or unplugged. This crate wraps a command on a
//! fresh pseudo-terminal, forwards bytes between the controlling terminal
//! and the child, and periodically probes the terminal with an ANSI Cursor
//! Position Report request. When a probe goes unanswered the child receives
//! SIGHUP, the same way a modem hangup would be reported. The wrapper also
//! strips embedded XON/XOFF characters for children that do not speak
//! software flow control themselves.

pub mod clock;
pub mod flow;
pub mod probe;
pub mod proxy;
pub mod pty;
pub mod signal;
pub mod status;
pub mod trace;
pub mod tty;
