//! One-shot terminal status reporting.

use std::io::{self, Write};
use std::os::fd::BorrowedFd;
use std::time::Duration;

use crate::probe::{self, DeviceState};

/// Probe the terminal once and print one of `DEVICE_STATUS_UNKNOWN`,
/// `DEVICE_OFFLINE`, or `DEVICE_ONLINE` to standard output.
///
/// A probe-level failure still prints its label (and a diagnostic to
/// standard error); the only error this function itself reports is a failure
/// to write the label.
pub fn print_tty_status(tty: BorrowedFd<'_>, reply_timeout: Duration) -> io::Result<()> {
    let report = probe::ping_tty(tty, reply_timeout);

    let label = match report.state {
        DeviceState::Unknown => {
            match report.error {
                Some(errno) => eprintln!("hupmon: unable to query the terminal: {errno}"),
                None => eprintln!("hupmon: unable to query the terminal"),
            }
            "DEVICE_STATUS_UNKNOWN"
        }
        DeviceState::Offline => "DEVICE_OFFLINE",
        DeviceState::Online => "DEVICE_ONLINE",
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{label}")?;
    stdout.flush()
}
