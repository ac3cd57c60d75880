//! Component C: non-blocking reap of the spawned child.

use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use crate::error::MediatorResult;

/// Outcome of attempting to reap `pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The child hasn't exited yet; a signal raced the reap attempt.
    NotYetExited,
    /// The child exited; carries the numeric code to report upstream
    /// (`128 + signum` if it died by signal).
    Exited(i32),
}

/// Perform one non-blocking `waitpid` on `pid`. Never blocks.
pub fn reap(pid: Pid) -> MediatorResult<ReapOutcome> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG))? {
        WaitStatus::StillAlive => Ok(ReapOutcome::NotYetExited),
        WaitStatus::Exited(_, code) => Ok(ReapOutcome::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Ok(ReapOutcome::Exited(128 + signal as i32)),
        // PtraceEvent/Stopped/Continued etc. can't occur for a plain child
        // we only ever WNOHANG-wait; treat as "still alive" defensively.
        _ => Ok(ReapOutcome::NotYetExited),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn reaps_exited_child_with_code() {
        let child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        // Give the child a moment to actually exit before polling.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let outcome = reap(pid).unwrap();
        assert_eq!(outcome, ReapOutcome::Exited(0));
    }

    #[test]
    fn reaps_signalled_child_as_128_plus_signum() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("kill -TERM $$")
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let outcome = reap(pid).unwrap();
        assert_eq!(outcome, ReapOutcome::Exited(128 + 15));
    }

    #[test]
    fn not_yet_exited_for_a_still_running_child() {
        let child = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let outcome = reap(pid).unwrap();
        assert_eq!(outcome, ReapOutcome::NotYetExited);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
        let _ = waitpid(pid, None);
    }
}
