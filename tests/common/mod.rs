//! Real-PTY harness for driving the hupmon binary.
//!
//! Each session allocates a fresh PTY pair and starts the built binary with
//! the slave as stdin, stdout, stderr, and controlling terminal. The test
//! plays the part of the physical terminal on the master side: it answers
//! (or ignores) probe requests and types input. A slave handle is kept open
//! so terminal attributes can be inspected after the wrapper exits.

// Each test binary uses its own subset of the harness.
#![allow(dead_code)]

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::openpty;
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::{read, write};

pub struct TtySession {
    master: Option<OwnedFd>,
    slave: OwnedFd,
    child: Child,
    output: Vec<u8>,
}

impl TtySession {
    /// Start `hupmon` with the given arguments on a fresh PTY.
    pub fn spawn(args: &[&str]) -> io::Result<Self> {
        Self::spawn_with(args, |_| {})
    }

    /// Like [`TtySession::spawn`], but lets the test adjust the terminal
    /// attributes (e.g. set IXOFF) before the wrapper starts.
    pub fn spawn_with(
        args: &[&str],
        configure: impl FnOnce(&mut Termios),
    ) -> io::Result<Self> {
        let pty = openpty(None, None).map_err(io::Error::from)?;

        let mut attrs = tcgetattr(&pty.slave).map_err(io::Error::from)?;
        configure(&mut attrs);
        tcsetattr(&pty.slave, SetArg::TCSANOW, &attrs).map_err(io::Error::from)?;

        let slave_fd = pty.slave.as_raw_fd();
        let master_fd = pty.master.as_raw_fd();

        let mut command = Command::new(env!("CARGO_BIN_EXE_hupmon"));
        command
            .args(args)
            .stdin(pty.slave.try_clone()?)
            .stdout(pty.slave.try_clone()?)
            .stderr(pty.slave.try_clone()?);
        unsafe {
            command.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                libc::close(slave_fd);
                libc::close(master_fd);
                Ok(())
            });
        }
        let child = command.spawn()?;

        Ok(Self {
            master: Some(pty.master),
            slave: pty.slave,
            child,
            output: Vec::new(),
        })
    }

    fn master(&self) -> &OwnedFd {
        self.master.as_ref().expect("master side already closed")
    }

    /// Type bytes at the terminal.
    pub fn send(&self, bytes: &[u8]) {
        let mut written = 0;
        while written < bytes.len() {
            match write(self.master(), &bytes[written..]) {
                Ok(count) => written += count,
                Err(Errno::EINTR) => continue,
                Err(err) => panic!("write to master failed: {err}"),
            }
        }
    }

    /// Collect output from the wrapper until `needle` appears or `timeout`
    /// elapses. Returns whether the needle was seen.
    pub fn wait_for_output(&mut self, needle: &[u8], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if contains(&self.output, needle) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }

            let mut fds = [PollFd::new(self.master().as_fd(), PollFlags::POLLIN)];
            let ms = remaining.as_millis().min(u16::MAX as u128) as u16;
            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(0) => return contains(&self.output, needle),
                Ok(_) => {
                    let mut buffer = [0u8; 1024];
                    match read(self.master(), &mut buffer) {
                        Ok(0) => return contains(&self.output, needle),
                        Ok(count) => self.output.extend_from_slice(&buffer[..count]),
                        Err(Errno::EINTR) => continue,
                        Err(_) => return contains(&self.output, needle),
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(err) => panic!("poll on master failed: {err}"),
            }
        }
    }

    /// Collect whatever output arrives within `duration`, without looking
    /// for anything in particular.
    pub fn pump(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }

            let mut fds = [PollFd::new(self.master().as_fd(), PollFlags::POLLIN)];
            let ms = remaining.as_millis().min(u16::MAX as u128) as u16;
            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(0) => return,
                Ok(_) => {
                    let mut buffer = [0u8; 1024];
                    match read(self.master(), &mut buffer) {
                        Ok(0) => return,
                        Ok(count) => self.output.extend_from_slice(&buffer[..count]),
                        Err(Errno::EINTR) => continue,
                        Err(_) => return,
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(_) => return,
            }
        }
    }

    /// Everything the wrapper has written to the terminal so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Poll for the wrapper's exit, up to `timeout`.
    pub fn wait_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait().expect("try_wait failed") {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Current attributes of the terminal the wrapper was (or is) attached
    /// to. Usable after exit, since the harness keeps its own slave handle.
    pub fn terminal_attrs(&self) -> Termios {
        tcgetattr(&self.slave).expect("tcgetattr on slave failed")
    }
}

impl Drop for TtySession {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

pub fn count(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}
