//! Component F's private state (§3). Everything here is loop-local except
//! the two signal flags, which live in [`crate::signals`] because a signal
//! handler can't be handed a reference to this struct.

use nix::unistd::Pid;

use crate::fd::ManagedFd;
use crate::sanitize::ReplaceChars;

/// One connected vchan plus its local child (if any) and fds, from
/// handshake through final close.
pub struct Session {
    pub child_pid: Option<Pid>,
    pub child_exit_code: Option<i32>,
    pub remote_exit_code: Option<i32>,

    pub stdin_fd: Option<ManagedFd>,
    pub stdout_fd: Option<ManagedFd>,
    pub stderr_fd: Option<ManagedFd>,

    /// Ordered, grow-only until drained from the head by the scheduler.
    pub stdin_buffer: Vec<u8>,

    /// True once the dup-for-single-socket request has been applied;
    /// suppresses the stdout EOF frame per component E.
    pub send_back_on_same_socket: bool,

    /// Negotiated protocol version from the handshake.
    pub protocol_version: u32,

    pub replace_chars_stdout: ReplaceChars,
    pub replace_chars_stderr: ReplaceChars,
    /// Session-wide default used when a per-stream knob is `Inherit`.
    pub sanitize_by_default: bool,

    /// Persists the remote-to-local pump's partial-frame state across
    /// scheduler iterations.
    pub decoder: qrexec_proto::Decoder,
}

impl Session {
    pub fn new(protocol_version: u32) -> Self {
        Self {
            child_pid: None,
            child_exit_code: None,
            remote_exit_code: None,
            stdin_fd: None,
            stdout_fd: None,
            stderr_fd: None,
            stdin_buffer: Vec::new(),
            send_back_on_same_socket: false,
            protocol_version,
            replace_chars_stdout: ReplaceChars::Inherit,
            replace_chars_stderr: ReplaceChars::Inherit,
            sanitize_by_default: false,
            decoder: qrexec_proto::Decoder::new(),
        }
    }

    /// Termination test from §4.F step 2, first clause: local and remote
    /// exit are both known and every fd has reached closed state.
    pub fn local_state_wound_down(&self) -> bool {
        let child_done = self.child_pid.is_none() || self.child_exit_code.is_some();
        let remote_done = self.remote_exit_code.is_some();
        let fds_closed = !self.stdin_fd.as_ref().is_some_and(ManagedFd::is_open)
            && !self.stdout_fd.as_ref().is_some_and(ManagedFd::is_open)
            && !self.stderr_fd.as_ref().is_some_and(ManagedFd::is_open);
        child_done && remote_done && fds_closed
    }
}
