//! The process-spawning collaborator spec.md §4.G treats as external glue:
//! turn a command line into a running child plus the three fds the
//! scheduler pumps against. Kept as a small trait so tests can substitute a
//! fake without forking anything.

use std::os::fd::{AsRawFd, OwnedFd};
use std::process::{Command, Stdio};

use nix::unistd::Pid;

use crate::error::{MediatorError, MediatorResult};
use crate::fd::{FdKind, ManagedFd};

/// What a successful spawn hands back to the dispatcher.
pub struct SpawnedChild {
    pub pid: Pid,
    pub stdin: ManagedFd,
    pub stdout: ManagedFd,
    pub stderr: ManagedFd,
    /// Bytes already read by the spawn helper's own RPC framing before the
    /// child existed (e.g. stdin data that arrived bundled with the command
    /// line itself). Seeds the scheduler's stdin staging buffer so it isn't
    /// lost ahead of whatever the vchan delivers afterward (spec.md §3, §4.G).
    pub initial_stdin: Vec<u8>,
}

/// Abstracts "run this command line, give me back a pid and its three
/// pipes" so the dispatcher doesn't hardcode `std::process::Command`. The
/// default implementation below is what the CLI binary wires up; tests can
/// swap in one that returns a pre-made pipe pair without spawning anything.
pub trait ChildSpawner {
    fn spawn(&self, cmdline: &str) -> MediatorResult<SpawnedChild>;
}

/// Spawns `/bin/sh -c <cmdline>`, matching the original's use of a shell to
/// interpret the qrexec command line, with stdin/stdout/stderr piped back
/// as non-blocking fds for the scheduler.
pub struct ShellSpawner;

impl ChildSpawner for ShellSpawner {
    fn spawn(&self, cmdline: &str) -> MediatorResult<SpawnedChild> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmdline)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(MediatorError::Spawn)?;

        let stdin = child.stdin.take().ok_or_else(missing_pipe)?;
        let stdout = child.stdout.take().ok_or_else(missing_pipe)?;
        let stderr = child.stderr.take().ok_or_else(missing_pipe)?;

        let stdin: OwnedFd = stdin.into();
        let stdout: OwnedFd = stdout.into();
        let stderr: OwnedFd = stderr.into();

        crate::fd::set_nonblocking(stdin.as_raw_fd())?;
        crate::fd::set_nonblocking(stdout.as_raw_fd())?;
        crate::fd::set_nonblocking(stderr.as_raw_fd())?;

        let pid = Pid::from_raw(child.id() as i32);
        // The scheduler reaps via its own waitpid(WNOHANG); forget the
        // std::process::Child so it doesn't also try to wait on drop.
        std::mem::forget(child);

        Ok(SpawnedChild {
            pid,
            stdin: ManagedFd::new(stdin, FdKind::Pipe),
            stdout: ManagedFd::new(stdout, FdKind::Pipe),
            stderr: ManagedFd::new(stderr, FdKind::Pipe),
            // A shell invoked directly from a local command line has no
            // RPC framing ahead of it that could have buffered stdin bytes.
            initial_stdin: Vec::new(),
        })
    }
}

/// `execute-and-detach` mode per §4.G: stdio all go to `/dev/null`, and the
/// scheduler never reaps this child at all — the session tears down as
/// soon as the handshake and exit-code frame are done.
pub fn spawn_detached(cmdline: &str) -> MediatorResult<Pid> {
    let null_in = Stdio::null();
    let null_out = Stdio::null();
    let null_err = Stdio::null();
    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmdline)
        .stdin(null_in)
        .stdout(null_out)
        .stderr(null_err)
        .spawn()
        .map_err(MediatorError::Spawn)?;
    let pid = Pid::from_raw(child.id() as i32);
    std::mem::forget(child);
    Ok(pid)
}

fn missing_pipe() -> MediatorError {
    MediatorError::Spawn(std::io::Error::other("child pipe missing after spawn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_spawner_produces_open_nonblocking_pipes() {
        let spawned = ShellSpawner.spawn("printf hi").unwrap();
        assert!(spawned.stdin.is_open());
        assert!(spawned.stdout.is_open());
        assert!(spawned.stderr.is_open());
        nix::sys::wait::waitpid(spawned.pid, None).unwrap();
    }

    #[test]
    fn detached_spawn_returns_immediately_with_a_pid() {
        let pid = spawn_detached("sleep 0.1").unwrap();
        assert!(pid.as_raw() > 0);
        nix::sys::wait::waitpid(pid, None).unwrap();
    }
}
