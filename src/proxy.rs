//! The bidirectional proxy between the controlling terminal and the child.
//!
//! One readiness loop owns both descriptors. Terminal input is demultiplexed
//! for embedded XON/XOFF before it reaches the child; child output is
//! forwarded verbatim, and only while the terminal is willing to receive it.
//! While transmission is suspended the child's descriptor is simply not
//! polled: the kernel PTY buffer backs the child off naturally. An
//! inactivity timeout triggers a liveness probe; a probe that concludes the
//! terminal is offline delivers one SIGHUP to the child and leaves the loop
//! draining until the child exits or the terminal reaches EOF.

use std::ffi::OsString;
use std::os::fd::BorrowedFd;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::sys::termios::{cfmakeraw, tcgetattr, InputFlags, SetArg, Termios};
use nix::unistd::read;
use thiserror::Error;

use crate::clock;
use crate::flow;
use crate::probe::{self, DeviceState};
use crate::pty::{ChildSession, SpawnError};
use crate::signal::{self, SigwinchGuard};
use crate::tty::{self, TermiosGuard};

const IO_BUFFER_SIZE: usize = 8192;

const DEAD: PollFlags = PollFlags::POLLERR
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLNVAL);

/// Failures that prevent a wrap session from starting. They map to exit 1
/// at the binary boundary; once the child is running, problems surface as
/// the child's exit status instead.
#[derive(Debug, Error)]
pub enum WrapError {
    #[error("no command specified")]
    EmptyCommand,
    #[error("unable to install the SIGWINCH handler: {0}")]
    SignalHandler(#[source] Errno),
    #[error("unable to read the terminal window size: {0}")]
    WindowSize(#[source] Errno),
    #[error("unable to configure the terminal: {0}")]
    RawMode(#[source] Errno),
    #[error(transparent)]
    Spawn(SpawnError),
}

#[derive(Debug, Clone, Copy)]
pub struct WrapOptions {
    /// Terminal inactivity threshold before a probe is sent. `None` disables
    /// probing entirely (flow-control-only operation).
    pub inactivity_timeout: Option<Duration>,
    /// How long a probe waits for the terminal's reply.
    pub reply_timeout: Duration,
}

/// Wrap `command` on a fresh pseudo-terminal attached to `tty` and proxy
/// bytes between the two until the child exits or the terminal goes away.
///
/// Returns the child's decoded exit status; a command that could not be
/// started yields 126 or 127 (after a diagnostic), matching what a shell
/// would report. The terminal's attributes and the SIGWINCH disposition are
/// restored on every exit path.
pub fn wrap(
    tty: BorrowedFd<'_>,
    command: &[OsString],
    tty_path: &Path,
    options: &WrapOptions,
) -> Result<i32, WrapError> {
    let Some((program, args)) = command.split_first() else {
        return Err(WrapError::EmptyCommand);
    };

    let _sigwinch = SigwinchGuard::install().map_err(WrapError::SignalHandler)?;
    let size = tty::window_size(tty).map_err(WrapError::WindowSize)?;
    let guard = TermiosGuard::enter_raw(tty, SetArg::TCSAFLUSH, SetArg::TCSAFLUSH)
        .map_err(WrapError::RawMode)?;

    // The child's terminal gets the saved, cooked attributes; raw mode is
    // the wrapper's business only.
    let session = match ChildSession::spawn(program, args, guard.original(), &size, tty_path) {
        Ok(session) => session,
        Err(err @ SpawnError::Pty(_)) => return Err(WrapError::Spawn(err)),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("hupmon: {err}");
            return Ok(code);
        }
    };

    let mut raw_attrs = guard.original().clone();
    cfmakeraw(&mut raw_attrs);
    run_loop(tty, &session, options, raw_attrs);

    Ok(session.reap())
}

fn run_loop(
    tty: BorrowedFd<'_>,
    session: &ChildSession,
    options: &WrapOptions,
    mut last_attrs: Termios,
) {
    let mut buffer = [0u8; IO_BUFFER_SIZE];
    let mut transmit_ok = true;
    let mut probing = options.inactivity_timeout;
    let mut poll_timeout_ms: i32 = probing.map_or(-1, clock::poll_millis);

    loop {
        let started = Instant::now();
        if probing.is_some() {
            // An EINTR adjustment below may have pushed the timeout negative.
            poll_timeout_ms = poll_timeout_ms.max(0);
        }

        let mut fds = [
            PollFd::new(tty, PollFlags::POLLIN),
            PollFd::new(session.master(), PollFlags::POLLIN),
        ];
        // While the terminal has asked us to pause, the child is not polled:
        // anything it writes could not be delivered anyway.
        let polled = if transmit_ok { 2 } else { 1 };
        let timeout = if poll_timeout_ms < 0 {
            PollTimeout::NONE
        } else {
            PollTimeout::try_from(poll_timeout_ms).unwrap_or(PollTimeout::MAX)
        };

        let mut interrupted = false;
        match poll(&mut fds[..polled], timeout) {
            Ok(0) => {
                let state = if transmit_ok {
                    let report = probe::ping_tty(tty, options.reply_timeout);
                    if !report.stray.is_empty() {
                        // Keystrokes that raced the probe belong to the child.
                        let _ = tty::write_all(session.master(), report.stray.as_bytes());
                    }
                    report.state
                } else {
                    // Probing would mean transmitting against the terminal's
                    // explicit request; a terminal that never resumes is
                    // indistinguishable from a dead one.
                    DeviceState::Offline
                };

                if state == DeviceState::Offline {
                    probing = None;
                    poll_timeout_ms = -1;
                    tracing::info!("terminal offline, hanging up the child");
                    let _ = session.signal(Signal::SIGHUP);
                } else {
                    poll_timeout_ms = probing.map_or(-1, clock::poll_millis);
                }
            }
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if !revents.is_empty() {
                    if revents.intersects(DEAD) {
                        break;
                    }
                    let count = match read(tty, &mut buffer) {
                        Ok(0) | Err(_) => break,
                        Ok(count) => count,
                    };

                    // Flow-control settings can change under us at any time
                    // (the child owns its own line discipline, the user owns
                    // stty); re-query and fall back to the last known
                    // attributes if the query fails.
                    if let Ok(attrs) = tcgetattr(tty) {
                        last_attrs = attrs;
                    }
                    let count = if last_attrs.input_flags.contains(InputFlags::IXOFF) {
                        flow::strip_flow_control(&mut buffer[..count], &mut transmit_ok)
                    } else {
                        count
                    };

                    if count > 0 {
                        let _ = tty::write_all(session.master(), &buffer[..count]);
                    }
                    if let Some(threshold) = probing {
                        poll_timeout_ms = clock::poll_millis(threshold);
                    }
                }

                if polled > 1 {
                    let revents = fds[1].revents().unwrap_or(PollFlags::empty());
                    if revents.intersects(DEAD) {
                        break;
                    }
                    if !revents.is_empty() {
                        let count = match read(session.master(), &mut buffer) {
                            Ok(0) | Err(_) => break,
                            Ok(count) => count,
                        };
                        let _ = tty::write_all(tty, &buffer[..count]);
                    }
                }
            }
            Err(Errno::EINTR) => interrupted = true,
            Err(_) => break,
        }

        if signal::take_sigwinch() {
            if let Ok(size) = tty::window_size(tty) {
                if session.set_window_size(&size).is_ok() {
                    let _ = session.signal(Signal::SIGWINCH);
                    tracing::debug!(
                        rows = size.ws_row,
                        cols = size.ws_col,
                        "window size propagated"
                    );
                }
            }
        }

        if interrupted && probing.is_some() {
            // Account for the time spent handling the signal; the clamp at
            // the top of the loop catches an overshoot.
            poll_timeout_ms -= clock::poll_millis(started.elapsed());
        }
    }
}
