//! Component A: version exchange that must precede any data frame.

use qrexec_proto::{MessageType, ProtocolError, decode_hello, encode, encode_hello};
use vchan::VchanConnection;

use crate::error::MediatorResult;

/// Send our HELLO, receive the peer's, and negotiate a session version.
/// Blocks (via `conn.wait()`) until the peer's HELLO is fully available;
/// the handshake happens before the scheduler's non-blocking loop starts,
/// so a blocking wait here is fine.
pub fn perform(conn: &mut impl VchanConnection, local_version: u32) -> MediatorResult<u32> {
    let out = encode(MessageType::Hello, &encode_hello(local_version))?;
    send_all(conn, &out)?;

    let header = recv_exact(conn, qrexec_proto::HEADER_SIZE)?;
    let msg_type = u32::from_le_bytes(
        header
            .get(0..4)
            .and_then(|b| b.try_into().ok())
            .unwrap_or_default(),
    );
    let length = u32::from_le_bytes(
        header
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .unwrap_or_default(),
    ) as usize;

    if msg_type != qrexec_proto::MSG_HELLO {
        return Err(ProtocolError::ExpectedHello(msg_type).into());
    }
    let payload = recv_exact(conn, length)?;
    let peer_version = decode_hello(&payload)?;

    let negotiated = qrexec_proto::negotiate_version(local_version, peer_version)?;
    Ok(negotiated)
}

fn send_all(conn: &mut impl VchanConnection, mut buf: &[u8]) -> MediatorResult<()> {
    while !buf.is_empty() {
        let n = conn.send(buf)?;
        if n == 0 {
            return Err(vchan::VchanError::SendFailed.into());
        }
        buf = buf.get(n..).unwrap_or_default();
    }
    Ok(())
}

fn recv_exact(conn: &mut impl VchanConnection, len: usize) -> MediatorResult<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        while conn.data_ready() == 0 {
            conn.wait()?;
        }
        let n = conn.recv(out.get_mut(filled..).unwrap_or_default())?;
        if n == 0 {
            return Err(vchan::VchanError::RecvFailed.into());
        }
        filled += n;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vchan::LoopbackVchan;

    #[test]
    fn negotiates_lower_of_two_versions() {
        let (mut a, mut b) = LoopbackVchan::pair(4096).unwrap();
        let handle = std::thread::spawn(move || perform(&mut a, 5));
        let negotiated_b = perform(&mut b, 2).unwrap();
        let negotiated_a = handle.join().unwrap().unwrap();
        assert_eq!(negotiated_a, 2);
        assert_eq!(negotiated_b, 2);
    }

    #[test]
    fn rejects_version_below_minimum() {
        let (mut a, mut b) = LoopbackVchan::pair(4096).unwrap();
        let handle = std::thread::spawn(move || perform(&mut a, 1));
        let err = perform(&mut b, 2).unwrap_err();
        assert!(matches!(
            err,
            crate::error::MediatorError::ProtocolIncompatible(_)
        ));
        let _ = handle.join();
    }
}
