//! Component D: the remote-to-local pump.

use qrexec_proto::{MessageType, ProtocolError, decode_exit_code};
use vchan::VchanConnection;

use crate::error::MediatorResult;
use crate::sanitize::sanitize;
use crate::session::Session;

/// What the scheduler should do after draining whatever whole messages were
/// available this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpInResult {
    Continue,
    RemoteEof,
    RemoteExited,
}

/// Drain zero or more whole messages from `conn` into `session`. Bounded by
/// how much data is currently ready; never blocks. A header is only ever
/// acted on once its full payload is buffered too, care of
/// [`qrexec_proto::Decoder`] — so a short read here just leaves a partial
/// frame queued for the next call.
pub fn pump(conn: &mut impl VchanConnection, session: &mut Session) -> MediatorResult<PumpInResult> {
    let ready = conn.data_ready();
    if ready == 0 {
        return Ok(PumpInResult::Continue);
    }

    let mut scratch = vec![0u8; ready];
    let n = conn.recv(&mut scratch)?;
    let messages = session
        .decoder
        .decode(scratch.get(..n).unwrap_or_default())?;

    let mut result = PumpInResult::Continue;
    for msg in messages {
        match msg.message_type()? {
            MessageType::Stdin => {
                if msg.payload.is_empty() {
                    result = PumpInResult::RemoteEof;
                    continue;
                }
                let on_shared_fd1 = session
                    .stdin_fd
                    .as_ref()
                    .and_then(crate::fd::ManagedFd::raw)
                    == Some(1);
                if on_shared_fd1 {
                    let sanitized = sanitize(
                        &msg.payload,
                        session.replace_chars_stdout,
                        session.sanitize_by_default,
                    );
                    session.stdin_buffer.extend_from_slice(&sanitized);
                } else {
                    session.stdin_buffer.extend_from_slice(&msg.payload);
                }
            }
            MessageType::ExitCode => {
                session.remote_exit_code = Some(decode_exit_code(&msg.payload)?);
                result = PumpInResult::RemoteExited;
            }
            MessageType::Hello | MessageType::Stdout | MessageType::Stderr => {
                return Err(ProtocolError::UnknownType(msg.msg_type).into());
            }
        }
    }
    Ok(result)
}
