//! Component E: the local-to-remote pump, `handle_input` in the design doc.

use std::os::fd::RawFd;

use nix::unistd::read;
use qrexec_proto::{HEADER_SIZE, MessageType, encode};
use vchan::VchanConnection;

use crate::error::MediatorResult;
use crate::sanitize::{ReplaceChars, sanitize};

const CHUNK_CAP: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutResult {
    /// Either nothing was ready (`EAGAIN`) or a chunk was sent; the fd
    /// stays open either way.
    Continue,
    RemoteEof,
}

/// Read up to `min(ring_space - header, CHUNK_CAP)` bytes from `fd`
/// non-blocking, and frame+send whatever came back. A zero-byte read sends
/// a zero-length frame of `msg_type` to signal EOF unless
/// `suppress_eof_frame` is set (the single-socket dup case, where the peer
/// infers EOF from the shared socket's own half-close instead).
#[allow(clippy::too_many_arguments)]
pub fn handle_input(
    fd: RawFd,
    msg_type: MessageType,
    conn: &mut impl VchanConnection,
    suppress_eof_frame: bool,
    policy: ReplaceChars,
    sanitize_by_default: bool,
) -> MediatorResult<PumpOutResult> {
    let ring_space = conn.buffer_space();
    if ring_space <= HEADER_SIZE {
        return Ok(PumpOutResult::Continue);
    }
    let cap = (ring_space - HEADER_SIZE).min(CHUNK_CAP);
    let mut buf = vec![0u8; cap];

    let n = match read(fd, &mut buf) {
        Ok(n) => n,
        Err(nix::Error::EAGAIN) => return Ok(PumpOutResult::Continue),
        Err(e) => return Err(crate::error::MediatorError::Fd(e.into())),
    };

    if n == 0 {
        if !suppress_eof_frame {
            send_frame(conn, msg_type, &[])?;
        }
        return Ok(PumpOutResult::RemoteEof);
    }

    let payload = sanitize(buf.get(..n).unwrap_or_default(), policy, sanitize_by_default);
    send_frame(conn, msg_type, &payload)?;
    Ok(PumpOutResult::Continue)
}

fn send_frame(
    conn: &mut impl VchanConnection,
    msg_type: MessageType,
    payload: &[u8],
) -> MediatorResult<()> {
    let frame = encode(msg_type, payload)?;
    let n = conn.send(&frame)?;
    if n != frame.len() {
        return Err(vchan::VchanError::SendFailed.into());
    }
    Ok(())
}
