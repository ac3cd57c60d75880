//! Component B: the terminal `EXIT_CODE` frame, sent at most once per
//! session and always last.

use qrexec_proto::{MessageType, encode, encode_exit_code};
use vchan::VchanConnection;

use crate::error::MediatorResult;

/// Send `(header{type=EXIT_CODE, len=4}, status)` as two vchan sends. A
/// short write on either is fatal, since the peer has no way to recover
/// framing once desynced.
pub fn send(conn: &mut impl VchanConnection, status: i32) -> MediatorResult<()> {
    let frame = encode(MessageType::ExitCode, &encode_exit_code(status))?;
    let header = frame.get(..qrexec_proto::HEADER_SIZE).unwrap_or_default();
    let payload = frame.get(qrexec_proto::HEADER_SIZE..).unwrap_or_default();

    send_exact(conn, header)?;
    send_exact(conn, payload)?;
    Ok(())
}

fn send_exact(conn: &mut impl VchanConnection, buf: &[u8]) -> MediatorResult<()> {
    let n = conn.send(buf)?;
    if n != buf.len() {
        return Err(vchan::VchanError::SendFailed.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrexec_proto::{Decoder, MSG_EXIT_CODE, decode_exit_code};
    use vchan::LoopbackVchan;

    #[test]
    fn sends_exit_code_frame() {
        let (mut a, mut b) = LoopbackVchan::pair(4096).unwrap();
        send(&mut a, 143).unwrap();

        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf).unwrap();
        let mut dec = Decoder::new();
        let msgs = dec.decode(buf.get(..n).unwrap_or_default()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].msg_type, MSG_EXIT_CODE);
        assert_eq!(decode_exit_code(&msgs[0].payload).unwrap(), 143);
    }
}
