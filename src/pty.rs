//! Child supervision: PTY pair allocation, spawn, and reaping.
//!
//! The slave side is created with the controlling terminal's saved (non-raw)
//! attributes and window size, so the wrapped program sees an ordinary
//! terminal even though the wrapper itself runs the real one raw.

use std::ffi::OsStr;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus};

use nix::errno::Errno;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::termios::Termios;
use nix::unistd::Pid;
use thiserror::Error;

use crate::tty;

/// Exit status used when a child was killed by a signal: the offset plus the
/// signal number.
pub const TERMSIG_OFFSET: i32 = 128;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("unable to allocate a pseudo-terminal: {0}")]
    Pty(#[source] Errno),
    /// The command could not be started. An ENOENT here means the binary was
    /// not found (exit 127); anything else maps to exit 126.
    #[error("{program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// The exit code the wrap reports when the child never ran.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpawnError::Pty(_) => -1,
            SpawnError::Exec { source, .. } => {
                if source.kind() == io::ErrorKind::NotFound {
                    127
                } else {
                    126
                }
            }
        }
    }
}

/// A running child attached to a fresh PTY pair. The master endpoint is
/// owned here and closed by [`ChildSession::reap`] before waiting, so a
/// child blocked on terminal I/O observes EOF and can exit.
pub struct ChildSession {
    child: Child,
    master: OwnedFd,
}

impl ChildSession {
    /// Allocate a PTY pair and start `program` with the slave as its stdin,
    /// stdout, stderr, and controlling terminal.
    ///
    /// The slave inherits `slave_attrs` and `size`. The child also receives
    /// `HUPMON_PID` and `HUPMON_TTY` in its environment, naming the wrapper
    /// and the real terminal it is mediating.
    pub fn spawn(
        program: &OsStr,
        args: &[std::ffi::OsString],
        slave_attrs: &Termios,
        size: &Winsize,
        tty_path: &Path,
    ) -> Result<Self, SpawnError> {
        let pty = openpty(Some(size), Some(slave_attrs)).map_err(SpawnError::Pty)?;
        let master_fd = pty.master.as_raw_fd();
        let slave_fd = pty.slave.as_raw_fd();

        let exec_error = |source: io::Error| SpawnError::Exec {
            program: program.to_string_lossy().into_owned(),
            source,
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .env("HUPMON_PID", std::process::id().to_string())
            .env("HUPMON_TTY", tty_path)
            .stdin(pty.slave.try_clone().map_err(exec_error)?)
            .stdout(pty.slave.try_clone().map_err(exec_error)?)
            .stderr(pty.slave.try_clone().map_err(exec_error)?);

        unsafe {
            command.pre_exec(move || {
                // New session, then adopt the slave as controlling terminal.
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                // Stdio is already wired up; the raw descriptors must not
                // leak into the child.
                libc::close(slave_fd);
                libc::close(master_fd);
                Ok(())
            });
        }

        let child = command.spawn().map_err(exec_error)?;
        drop(pty.slave);

        tracing::debug!(pid = child.id(), "child spawned");
        Ok(Self {
            child,
            master: pty.master,
        })
    }

    pub fn master(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// Deliver a signal to the child process.
    pub fn signal(&self, signal: Signal) -> Result<(), Errno> {
        kill(self.pid(), signal)
    }

    /// Push a window size onto the child's terminal.
    pub fn set_window_size(&self, size: &Winsize) -> Result<(), Errno> {
        tty::set_window_size(self.master.as_fd(), size)
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as libc::pid_t)
    }

    /// Close the master endpoint, wait for the child, and decode its status.
    pub fn reap(self) -> i32 {
        let Self { mut child, master } = self;
        drop(master);
        match child.wait() {
            Ok(status) => decode_exit_status(status),
            Err(_) => -1,
        }
    }
}

/// Map a wait status to the exit code the wrapper propagates: the child's
/// own code on a normal exit, `128 + signum` when killed by a signal.
pub fn decode_exit_status(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        code
    } else if let Some(signum) = status.signal() {
        TERMSIG_OFFSET + signum
    } else {
        -1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn normal_exit_passes_the_code_through() {
        let status = Command::new("sh")
            .args(["-c", "exit 7"])
            .status()
            .expect("run sh");
        assert_eq!(decode_exit_status(status), 7);
    }

    #[test]
    fn signal_death_maps_to_offset_plus_signum() {
        let status = Command::new("sh")
            .args(["-c", "kill -TERM $$"])
            .status()
            .expect("run sh");
        assert_eq!(decode_exit_status(status), TERMSIG_OFFSET + libc::SIGTERM);
    }
}
