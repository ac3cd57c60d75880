//! The only process-global state in the mediator: two flags a signal
//! handler can set without touching anything but a plain atomic, per the
//! session-context redesign — everything else lives in [`crate::session::Session`].

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction, sigprocmask};
use nix::sys::signal::SigmaskHow;

use crate::error::MediatorResult;

/// Set by the `SIGCHLD` handler; cleared by the scheduler after a
/// successful reap attempt.
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

/// Three-valued per spec: 0 untouched, 1 requested by `SIGUSR1`, 2 applied
/// by the scheduler.
static STDIO_SOCKET_REQUESTED: AtomicU8 = AtomicU8::new(0);

pub const STDIO_SOCKET_UNTOUCHED: u8 = 0;
pub const STDIO_SOCKET_REQUESTED_FLAG: u8 = 1;
pub const STDIO_SOCKET_APPLIED: u8 = 2;

pub fn child_exited() -> bool {
    CHILD_EXITED.load(Ordering::SeqCst)
}

pub fn clear_child_exited() {
    CHILD_EXITED.store(false, Ordering::SeqCst);
}

pub fn stdio_socket_requested() -> u8 {
    STDIO_SOCKET_REQUESTED.load(Ordering::SeqCst)
}

pub fn mark_stdio_socket_applied() {
    STDIO_SOCKET_REQUESTED.store(STDIO_SOCKET_APPLIED, Ordering::SeqCst);
}

/// Reset both flags. Exposed for tests that install handlers repeatedly in
/// one process; the real CLI only ever calls [`install`] once.
pub fn reset_for_test() {
    CHILD_EXITED.store(false, Ordering::SeqCst);
    STDIO_SOCKET_REQUESTED.store(STDIO_SOCKET_UNTOUCHED, Ordering::SeqCst);
}

extern "C" fn handle_sigchld(_: libc::c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

extern "C" fn handle_sigusr1(_: libc::c_int) {
    STDIO_SOCKET_REQUESTED.store(STDIO_SOCKET_REQUESTED_FLAG, Ordering::SeqCst);
    // sigaction is async-signal-safe; re-arm to ignore so a second SIGUSR1
    // before the scheduler applies the first request is simply dropped.
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGUSR1, &ignore);
    }
}

/// Install the mediator's two signal handlers. Must run before the
/// scheduler's readiness loop starts. `SIGUSR1` re-ignores itself after one
/// delivery is recorded — a second `SIGUSR1` before the first is applied is
/// a no-op, matching the at-most-once dup request in §4.F.
pub fn install() -> MediatorResult<()> {
    let sigchld_action = SigAction::new(
        SigHandler::Handler(handle_sigchld),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to a `'static` atomic.
    unsafe { sigaction(Signal::SIGCHLD, &sigchld_action) }?;

    let sigusr1_action = SigAction::new(
        SigHandler::Handler(handle_sigusr1),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: same as above.
    unsafe { sigaction(Signal::SIGUSR1, &sigusr1_action) }?;

    Ok(())
}

/// Block `SIGCHLD` process-wide. The scheduler only unblocks it again for
/// the duration of its `ppoll` wait, so the flag-check/reap sequence in
/// steps 1 and 6 never races a handler.
pub fn block_sigchld() -> MediatorResult<()> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None)?;
    Ok(())
}

/// Set `QREXEC_AGENT_PID` to this process's own pid so a spawned child can
/// address the mediator that launched it (§6). Set once per session, after
/// the handshake and before any child is spawned, mirroring the original's
/// `prepare_child_env`.
///
/// # Safety
/// Must only be called while the process is still single-threaded, since
/// `setenv` is not thread-safe with concurrent environment reads elsewhere.
/// The mediator's own readiness loop has not started any other thread at
/// the point this runs.
pub unsafe fn set_agent_pid_env() {
    // SAFETY: upheld by the caller per the contract above.
    unsafe {
        std::env::set_var("QREXEC_AGENT_PID", std::process::id().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigchld_sets_flag() {
        reset_for_test();
        install().unwrap();
        assert!(!child_exited());
        nix::sys::signal::raise(Signal::SIGCHLD).unwrap();
        assert!(child_exited());
        clear_child_exited();
        assert!(!child_exited());
    }

    #[test]
    fn sigusr1_sets_requested_flag() {
        reset_for_test();
        install().unwrap();
        assert_eq!(stdio_socket_requested(), STDIO_SOCKET_UNTOUCHED);
        nix::sys::signal::raise(Signal::SIGUSR1).unwrap();
        assert_eq!(stdio_socket_requested(), STDIO_SOCKET_REQUESTED_FLAG);
        mark_stdio_socket_applied();
        assert_eq!(stdio_socket_requested(), STDIO_SOCKET_APPLIED);
    }
}
