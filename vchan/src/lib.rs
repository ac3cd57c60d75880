//! Safe synchronous wrapper over `libvchan`.
//!
//! [`VchanConnection`] is the trait the mediator programs against: a
//! bidirectional byte channel with explicit ring-space accounting and a
//! pollable event descriptor, matching the shape of `libvchan_t` without
//! exposing its raw pointer. [`SysVchan`] is the real implementation, backed
//! by `vchan-sys`. [`LoopbackVchan`] is an in-process test double built on a
//! pair of pipes, used by the mediator's own test suite so tests don't
//! depend on a Xen/Qubes host to run.

use std::os::fd::RawFd;

mod loopback;
mod sys;

pub use loopback::LoopbackVchan;
pub use sys::SysVchan;

/// Default per-direction ring size (bytes). Must be a power of two.
pub const DEFAULT_RING_SIZE: usize = 65536;

#[derive(Debug, thiserror::Error)]
pub enum VchanError {
    #[error("vchan connection failed")]
    ConnectFailed,
    #[error("vchan send failed")]
    SendFailed,
    #[error("vchan recv failed")]
    RecvFailed,
    #[error("vchan wait failed")]
    WaitFailed,
    #[error("ring size must be a power of two, got {0}")]
    RingSizeNotPowerOfTwo(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
}

/// A bidirectional byte channel with ring-bounded flow control.
///
/// Implementations never block inside `send`/`recv`/`data_ready`/
/// `buffer_space`; the caller is responsible for gating reads/writes on
/// `buffer_space`/`data_ready` and waiting on `event_fd()` for readiness.
pub trait VchanConnection {
    /// Write `buf` to the channel. Returns the number of bytes actually
    /// transferred; a short write (less than `buf.len()`) is a caller-level
    /// fatal condition per the protocol this channel carries.
    fn send(&mut self, buf: &[u8]) -> Result<usize, VchanError>;

    /// Read up to `buf.len()` bytes from the channel.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, VchanError>;

    /// Bytes currently buffered and ready to `recv` without blocking.
    fn data_ready(&self) -> usize;

    /// Bytes of ring space currently free for `send` without blocking.
    fn buffer_space(&self) -> usize;

    /// Whether the peer is still connected.
    fn is_open(&self) -> bool;

    /// A descriptor pollable for readability; becomes readable when new data
    /// arrives or the peer's connection state changes.
    fn event_fd(&self) -> RawFd;

    /// Clear the pending event on `event_fd()` after it fires.
    fn wait(&mut self) -> Result<(), VchanError>;

    /// Tear down the connection. Idempotent.
    fn close(&mut self);
}
