//! Fd lifecycle: what kind of descriptor we were handed, and the single
//! half-close operation the scheduler needs instead of scattered
//! socket/pipe special-casing.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::socket::{Shutdown, shutdown};

use crate::error::MediatorError;

/// What an fd actually is, captured once at acquisition time. Determines
/// whether a half-close is possible at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    Socket,
    Pipe,
    Tty,
}

impl FdKind {
    /// Classify a raw fd handed to the mediator from outside (the
    /// service-connect entry point's pre-supplied descriptors) via
    /// `fstat`, since the caller doesn't tell us what it inherited.
    /// Anything that isn't recognizably a socket, fifo, or tty is treated
    /// as a pipe: it has no independent half-close, so it's simply closed,
    /// the same fallback a plain file or regular pipe gets.
    pub fn detect(fd: RawFd) -> Result<Self, MediatorError> {
        use nix::sys::stat::{SFlag, fstat};
        let st = fstat(fd).map_err(|e| MediatorError::Fd(e.into()))?;
        let mode = SFlag::from_bits_truncate(st.st_mode);
        if mode.contains(SFlag::S_IFSOCK) {
            Ok(Self::Socket)
        } else if mode.contains(SFlag::S_IFCHR) {
            Ok(Self::Tty)
        } else {
            Ok(Self::Pipe)
        }
    }
}

/// Which half of a bidirectional fd to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// An fd the mediator owns, tagged with its kind, that can be half-closed
/// toward the child without double-closing.
pub struct ManagedFd {
    fd: Option<OwnedFd>,
    kind: FdKind,
}

impl ManagedFd {
    pub fn new(fd: OwnedFd, kind: FdKind) -> Self {
        Self { fd: Some(fd), kind }
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    pub fn raw(&self) -> Option<RawFd> {
        self.fd.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn take(&mut self) -> Option<OwnedFd> {
        self.fd.take()
    }

    /// Half-close this fd toward the peer in `direction`. A fd already
    /// closed is a no-op. Sockets get a real half-close (`shutdown`); pipes
    /// and ttys, and any fd where `shutdown` reports `ENOTSOCK`, are fully
    /// closed since they have no independent read/write lifetimes.
    ///
    /// `inherited_std_fd` names the raw fd number (0 or 1) that must never
    /// be half-closed even if it happens to be a socket — per the shutdown
    /// rule, an inherited stdin/stdout is always just closed outright.
    pub fn close_toward_peer(
        &mut self,
        direction: Direction,
        inherited_std_fd: RawFd,
    ) -> Result<(), MediatorError> {
        let Some(fd) = self.fd.as_ref() else {
            return Ok(());
        };
        let raw = fd.as_raw_fd();

        restore_blocking(raw)?;

        if raw == inherited_std_fd || self.kind != FdKind::Socket {
            self.fd = None;
            return Ok(());
        }

        let how = match direction {
            Direction::Write => Shutdown::Write,
            Direction::Read => Shutdown::Read,
        };
        match shutdown(raw, how) {
            Ok(()) => {}
            Err(nix::Error::ENOTSOCK) => {}
            Err(e) => return Err(MediatorError::Fd(e.into())),
        }
        self.fd = None;
        Ok(())
    }
}

fn restore_blocking(fd: RawFd) -> Result<(), MediatorError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| MediatorError::Fd(e.into()))?;
    let mut flags = OFlag::from_bits_truncate(flags);
    if flags.contains(OFlag::O_NONBLOCK) {
        flags.remove(OFlag::O_NONBLOCK);
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| MediatorError::Fd(e.into()))?;
    }
    Ok(())
}

/// Put `fd` in non-blocking mode. Every fd the scheduler watches — spawned
/// child pipes, and fds handed in from outside for service-connect — needs
/// this, since §5 requires all child-fd I/O to be non-blocking.
pub fn set_nonblocking(fd: RawFd) -> Result<(), MediatorError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| MediatorError::Fd(e.into()))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| MediatorError::Fd(e.into()))?;
    Ok(())
}
