//! Component F: the single-threaded readiness loop that drives D, E, the
//! reaper, and the stdin staging buffer.

use std::os::fd::{BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, ppoll};
use nix::sys::signal::SigSet;
use nix::sys::time::TimeSpec;
use nix::unistd::write;
use qrexec_proto::{HEADER_SIZE, MessageType};
use vchan::VchanConnection;

use crate::error::{MediatorError, MediatorResult};
use crate::fd::{Direction, FdKind, ManagedFd};
use crate::pump_in::{self, PumpInResult};
use crate::pump_out::{self, PumpOutResult};
use crate::reaper::{self, ReapOutcome};
use crate::session::Session;
use crate::signals;

/// Liveness-only safeguard: correctness never depends on waking up this
/// often, only on waking up *eventually*.
const WAIT_CEILING: Duration = Duration::from_secs(10);

/// What the loop exited for. The dispatcher uses this to decide what to
/// report, since service-connect mode returns as soon as the remote side's
/// exit code arrives rather than waiting for full fd teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerOutcome {
    /// Ordinary termination: local and remote state are both wound down,
    /// or the vchan went away with nothing left to drain.
    Done,
    /// Service-connect mode only: the remote side's `EXIT_CODE` arrived and
    /// the mode dispatcher should return immediately.
    RemoteExitedEarly(i32),
}

/// Run the loop until termination. `is_service_connect` selects the
/// early-return-on-remote-exit behavior from §4.F step 6.
pub fn run(
    conn: &mut impl VchanConnection,
    session: &mut Session,
    is_service_connect: bool,
) -> MediatorResult<SchedulerOutcome> {
    // Keep SIGCHLD blocked for the whole loop body; only the `ppoll` wait in
    // step 5 unblocks it, so the flag-check/reap sequence in steps 1 and 6
    // never races the handler (§5).
    signals::block_sigchld()?;

    loop {
        // Step 1: reap if pending.
        if signals::child_exited() {
            signals::clear_child_exited();
            if let Some(pid) = session.child_pid
                && let ReapOutcome::Exited(code) = reaper::reap(pid)?
            {
                session.child_exit_code = Some(code);
                close_stdin_toward_child(session)?;
            }
        }

        // Step 2: termination test.
        if session.local_state_wound_down() {
            teardown(session)?;
            return Ok(SchedulerOutcome::Done);
        }
        if !conn.is_open() && conn.data_ready() == 0 && session.stdin_buffer.is_empty() {
            teardown(session)?;
            return Ok(SchedulerOutcome::Done);
        }

        // Step 3: apply a pending single-socket dup request.
        if signals::stdio_socket_requested() == signals::STDIO_SOCKET_REQUESTED_FLAG {
            apply_stdio_dup(session)?;
            signals::mark_stdio_socket_applied();
        }

        // Step 4: build the readiness set.
        let vchan_fd = conn.event_fd();
        let vchan_has_room = conn.buffer_space() > HEADER_SIZE;
        let stdout_raw = raw_if_open(&session.stdout_fd);
        let stderr_raw = raw_if_open(&session.stderr_fd);
        let stdin_raw = raw_if_open(&session.stdin_fd);
        let want_stdin_write = stdin_raw.is_some() && !session.stdin_buffer.is_empty();

        let mut slots: Vec<(RawFd, PollFlags)> = vec![(vchan_fd, PollFlags::POLLIN)];
        if vchan_has_room {
            if let Some(fd) = stdout_raw {
                slots.push((fd, PollFlags::POLLIN));
            }
            if let Some(fd) = stderr_raw {
                slots.push((fd, PollFlags::POLLIN));
            }
        }
        if want_stdin_write && let Some(fd) = stdin_raw {
            slots.push((fd, PollFlags::POLLOUT));
        }

        let mut poll_fds: Vec<PollFd<'_>> = slots
            .iter()
            .map(|(fd, flags)| {
                // SAFETY: each fd is borrowed only for this single ppoll
                // call; the owning `ManagedFd`/`VchanConnection` outlives it.
                unsafe { PollFd::new(BorrowedFd::borrow_raw(*fd), *flags) }
            })
            .collect();

        // Step 5: wait.
        let timeout = if session.stdin_buffer.is_empty() && conn.data_ready() > 0 {
            TimeSpec::new(0, 0)
        } else {
            TimeSpec::from(WAIT_CEILING)
        };
        ppoll(&mut poll_fds, Some(timeout), Some(SigSet::empty()))?;

        // Step 6: dispatch.
        let vchan_ready = poll_fds
            .first()
            .and_then(PollFd::revents)
            .is_some_and(|r| r.contains(PollFlags::POLLIN));
        if vchan_ready {
            conn.wait()?;
            match pump_in::pump(conn, session)? {
                PumpInResult::Continue => {}
                PumpInResult::RemoteEof => close_stdin_toward_child(session)?,
                PumpInResult::RemoteExited => {
                    close_stdout_toward_child(session)?;
                    close_stderr(session)?;
                    if is_service_connect {
                        let code = session.remote_exit_code.unwrap_or(1);
                        return Ok(SchedulerOutcome::RemoteExitedEarly(code));
                    }
                }
            }
        }

        for (idx, (fd, flags)) in slots.iter().enumerate() {
            if *flags != PollFlags::POLLIN || *fd == vchan_fd {
                continue;
            }
            let revents = poll_fds.get(idx).and_then(PollFd::revents);
            if !revents.is_some_and(|r| r.contains(PollFlags::POLLIN)) {
                continue;
            }
            let is_stdout = Some(*fd) == stdout_raw;
            // Service-connect has no local child of its own to report a
            // STDOUT stream from; its "stdout fd" instead feeds the peer's
            // stdin, so the outbound frame type flips to STDIN (§4.G).
            let msg_type = if is_stdout {
                if is_service_connect {
                    MessageType::Stdin
                } else {
                    MessageType::Stdout
                }
            } else {
                MessageType::Stderr
            };
            let policy = if is_stdout {
                session.replace_chars_stdout
            } else {
                session.replace_chars_stderr
            };
            let result = pump_out::handle_input(
                *fd,
                msg_type,
                conn,
                session.send_back_on_same_socket,
                policy,
                session.sanitize_by_default,
            )?;
            if result == PumpOutResult::RemoteEof {
                if is_stdout {
                    close_stdout_toward_child(session)?;
                } else {
                    close_stderr(session)?;
                }
            }
        }

        if want_stdin_write
            && let Some(fd) = stdin_raw
        {
            // SAFETY: `fd` is open for the duration of this write; it's
            // borrowed from `session.stdin_fd`, which we don't mutate here.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            if let Ok(n) = write(borrowed, &session.stdin_buffer) {
                session.stdin_buffer.drain(..n);
            }
        }
    }
}

fn raw_if_open(fd: &Option<ManagedFd>) -> Option<RawFd> {
    fd.as_ref().and_then(ManagedFd::raw)
}

fn close_stdin_toward_child(session: &mut Session) -> MediatorResult<()> {
    if let Some(fd) = session.stdin_fd.as_mut() {
        fd.close_toward_peer(Direction::Write, 1)?;
    }
    Ok(())
}

fn close_stdout_toward_child(session: &mut Session) -> MediatorResult<()> {
    if let Some(fd) = session.stdout_fd.as_mut() {
        fd.close_toward_peer(Direction::Read, 0)?;
    }
    Ok(())
}

fn close_stderr(session: &mut Session) -> MediatorResult<()> {
    if let Some(fd) = session.stderr_fd.as_mut() {
        fd.close_toward_peer(Direction::Read, -1)?;
    }
    Ok(())
}

fn teardown(session: &mut Session) -> MediatorResult<()> {
    close_stdin_toward_child(session)?;
    close_stdout_toward_child(session)?;
    close_stderr(session)?;
    Ok(())
}

/// Dup `stdin_fd` onto `stdout_fd`, creating `stdout_fd` fresh (at >= 3) if
/// it was already closed. Retries on `EINTR`/`EBUSY`; any other error is
/// fatal. Uses raw `dup3(2)` directly since this is a one-shot syscall with
/// no benefit from a higher-level wrapper.
fn apply_stdio_dup(session: &mut Session) -> MediatorResult<()> {
    let Some(stdin_fd) = session.stdin_fd.as_ref().and_then(ManagedFd::raw) else {
        return Ok(());
    };

    // `dup3` atomically closes `target` as part of rebinding it, so the old
    // `OwnedFd` (if any) must be released *without* running its own close
    // first — otherwise we'd close the fd number out from under the dup, and
    // then again when the new `ManagedFd` built around it is dropped.
    let target: RawFd = match session.stdout_fd.as_mut().and_then(ManagedFd::take) {
        Some(owned) => owned.into_raw_fd(),
        None => {
            // SAFETY: dup(2) on a valid fd returns a fresh descriptor or -1.
            let fresh = unsafe { libc::dup(stdin_fd) };
            if fresh < 0 {
                return Err(MediatorError::Fd(std::io::Error::last_os_error()));
            }
            fresh
        }
    };

    loop {
        // SAFETY: both fds are valid for the duration of this call.
        let rc = unsafe { libc::dup3(stdin_fd, target, 0) };
        if rc >= 0 {
            break;
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) | Some(libc::EBUSY) => continue,
            _ => return Err(MediatorError::Fd(err)),
        }
    }

    // SAFETY: `target` now refers to a valid, newly-dup'd fd we exclusively own.
    let owned = unsafe { OwnedFd::from_raw_fd(target) };
    crate::fd::set_nonblocking(target)?;
    session.stdout_fd = Some(ManagedFd::new(owned, FdKind::Socket));
    session.send_back_on_same_socket = true;
    Ok(())
}
