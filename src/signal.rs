//! SIGWINCH bridge.
//!
//! The handler only marks a flag; the event loop applies the size change.
//! Window-size events are idempotent, so coalescing multiple signals into
//! one pending flag loses nothing.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// The one piece of process-wide mutable state: set by the SIGWINCH handler,
/// swapped out by the event loop.
static SIGWINCH_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigwinch(_: libc::c_int) {
    SIGWINCH_PENDING.store(true, Ordering::SeqCst);
}

/// Consume the pending flag, returning whether a SIGWINCH arrived since the
/// last call.
pub fn take_sigwinch() -> bool {
    SIGWINCH_PENDING.swap(false, Ordering::SeqCst)
}

/// Installs the SIGWINCH handler and restores the previous disposition on
/// drop.
///
/// SA_RESTART is deliberately not set: the event loop relies on `poll`
/// returning EINTR to notice a size change before the next timeout expires.
pub struct SigwinchGuard {
    previous: SigAction,
}

impl SigwinchGuard {
    pub fn install() -> Result<Self, Errno> {
        let action = SigAction::new(
            SigHandler::Handler(handle_sigwinch),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let previous = unsafe { sigaction(Signal::SIGWINCH, &action)? };
        Ok(Self { previous })
    }
}

impl Drop for SigwinchGuard {
    fn drop(&mut self) {
        let _ = unsafe { sigaction(Signal::SIGWINCH, &self.previous) };
    }
}
