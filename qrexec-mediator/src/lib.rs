//! Data-plane core of the qrexec mediator: bridges a connected vchan session
//! to a locally spawned child's stdio (or, in service-connect mode, to a
//! pair of pre-supplied fds), under the framed protocol in
//! [`qrexec_proto`].
//!
//! [`dispatcher`] exposes the three mode entry points; everything else is an
//! internal component wired together by [`scheduler::run`].

pub mod dispatcher;
pub mod error;
pub mod exit_code;
pub mod fd;
pub mod handshake;
pub mod pump_in;
pub mod pump_out;
pub mod reaper;
pub mod sanitize;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod spawn;

pub use error::{MediatorError, MediatorResult};
