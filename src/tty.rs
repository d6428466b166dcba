//! Controlling-terminal state: termios save/restore, raw mode, window size.

use std::ffi::{CStr, OsStr};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::pty::Winsize;
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::{isatty, write};

/// Scoped raw-mode entry. The terminal attributes captured at construction
/// are re-applied when the guard is dropped, on every exit path.
///
/// Restoration failures are ignored so they never displace the error that
/// caused the early exit.
pub struct TermiosGuard<'fd> {
    fd: BorrowedFd<'fd>,
    saved: Termios,
    restore_how: SetArg,
}

impl<'fd> TermiosGuard<'fd> {
    /// Save the current attributes of `fd` and switch it to raw mode.
    ///
    /// `apply_how` controls how raw mode is applied (the probe flushes
    /// pending input, so stale bytes cannot masquerade as a reply);
    /// `restore_how` controls how the saved attributes are re-applied on
    /// drop.
    pub fn enter_raw(
        fd: BorrowedFd<'fd>,
        apply_how: SetArg,
        restore_how: SetArg,
    ) -> Result<Self, Errno> {
        let saved = tcgetattr(fd)?;
        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        tcsetattr(fd, apply_how, &raw)?;
        Ok(Self {
            fd,
            saved,
            restore_how,
        })
    }

    /// The attributes the terminal had before raw mode was applied.
    pub fn original(&self) -> &Termios {
        &self.saved
    }
}

impl Drop for TermiosGuard<'_> {
    fn drop(&mut self) {
        let _ = tcsetattr(self.fd, self.restore_how, &self.saved);
    }
}

/// Current window size of the terminal.
pub fn window_size(fd: BorrowedFd<'_>) -> Result<Winsize, Errno> {
    let mut size: Winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            libc::TIOCGWINSZ as libc::c_ulong,
            &mut size,
        )
    };
    if rc == -1 {
        return Err(Errno::last());
    }
    Ok(size)
}

/// Push a window size onto a terminal (normally a PTY master, so the slave
/// side observes the change).
pub fn set_window_size(fd: BorrowedFd<'_>, size: &Winsize) -> Result<(), Errno> {
    let rc = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            libc::TIOCSWINSZ as libc::c_ulong,
            size as *const Winsize,
        )
    };
    if rc == -1 {
        return Err(Errno::last());
    }
    Ok(())
}

/// Whether `fd` refers to a terminal.
pub fn is_tty<F: AsFd>(fd: &F) -> bool {
    isatty(fd).unwrap_or(false)
}

/// Whether two descriptors refer to the same underlying file, compared by
/// device and inode. Any `fstat` failure counts as "not the same".
pub fn same_file<A: AsFd, B: AsFd>(a: &A, b: &B) -> bool {
    fn identity(fd: BorrowedFd<'_>) -> Option<(libc::dev_t, libc::ino_t)> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        let rc = unsafe { libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        let stat = unsafe { stat.assume_init() };
        Some((stat.st_dev, stat.st_ino))
    }

    match (identity(a.as_fd()), identity(b.as_fd())) {
        (Some(first), Some(second)) => first == second,
        _ => false,
    }
}

/// Filesystem path of the terminal behind `fd`.
pub fn path(fd: BorrowedFd<'_>) -> io::Result<PathBuf> {
    let mut buffer = [0 as libc::c_char; 256];
    let rc = unsafe { libc::ttyname_r(fd.as_raw_fd(), buffer.as_mut_ptr(), buffer.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    let name = unsafe { CStr::from_ptr(buffer.as_ptr()) };
    Ok(PathBuf::from(OsStr::from_bytes(name.to_bytes())))
}

/// Write the whole buffer, retrying on EINTR.
pub(crate) fn write_all(fd: BorrowedFd<'_>, bytes: &[u8]) -> Result<(), Errno> {
    let mut written = 0;
    while written < bytes.len() {
        match write(fd, &bytes[written..]) {
            Ok(count) => written += count,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
