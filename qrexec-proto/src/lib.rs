//! Wire framing carried over the vchan between the mediator and its peer.
//!
//! ## Wire Format
//!
//! ```text
//! [4-byte type][4-byte length][payload]
//! ```
//!
//! - **type**: little-endian u32, one of the [`MessageType`] values
//! - **length**: little-endian u32, size of payload in bytes
//! - **payload**: type-specific binary data; zero length is a valid, meaningful
//!   value for `STDIN`/`STDOUT`/`STDERR` (end-of-stream for that stream)
//!
//! ## Message Types
//!
//! | Type | Direction | Name      | Payload |
//! |------|-----------|-----------|---------|
//! | 0    | both      | HELLO     | `[4B version]` |
//! | 1    | remote→local | STDIN  | raw bytes; empty = EOF |
//! | 2    | local→remote | STDOUT | raw bytes; empty = EOF |
//! | 3    | local→remote | STDERR | raw bytes; empty = EOF |
//! | 4    | either    | EXIT_CODE | `[4B i32 status]` |

/// Header size: 4-byte type tag + 4-byte length.
pub const HEADER_SIZE: usize = 8;

/// Ceiling on a single frame's payload, independent of ring size, so a
/// corrupt or hostile peer can't make the decoder grow an unbounded buffer.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Lowest protocol version this implementation will negotiate down to.
pub const MIN_DATA_VERSION: u32 = 2;

/// This implementation's own protocol version, sent in its HELLO.
pub const LOCAL_VERSION: u32 = 2;

/// Ceiling on a command-line string accepted at the dispatcher boundary,
/// independent of message framing — bounds what the caller's RPC layer can
/// hand the mediator before it ever touches the vchan.
pub const MAX_QREXEC_CMD_LEN: usize = 65535;

pub const MSG_HELLO: u32 = 0;
pub const MSG_STDIN: u32 = 1;
pub const MSG_STDOUT: u32 = 2;
pub const MSG_STDERR: u32 = 3;
pub const MSG_EXIT_CODE: u32 = 4;

/// A recognized message type, narrowed from the raw `u32` tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    Stdin,
    Stdout,
    Stderr,
    ExitCode,
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Hello => MSG_HELLO,
            Self::Stdin => MSG_STDIN,
            Self::Stdout => MSG_STDOUT,
            Self::Stderr => MSG_STDERR,
            Self::ExitCode => MSG_EXIT_CODE,
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        match tag {
            MSG_HELLO => Ok(Self::Hello),
            MSG_STDIN => Ok(Self::Stdin),
            MSG_STDOUT => Ok(Self::Stdout),
            MSG_STDERR => Ok(Self::Stderr),
            MSG_EXIT_CODE => Ok(Self::ExitCode),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Protocol-level error: malformed framing or a payload that doesn't match
/// its declared type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),
    #[error("unknown message type: {0}")]
    UnknownType(u32),
    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),
    #[error("expected HELLO as first message, got type {0}")]
    ExpectedHello(u32),
    #[error("negotiated version {negotiated} below minimum {minimum}")]
    VersionTooLow { negotiated: u32, minimum: u32 },
}

/// A raw decoded message: type tag plus payload, before type-specific
/// interpretation.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub msg_type: u32,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        MessageType::try_from(self.msg_type)
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a header + payload frame: `[4B type][4B length][payload]`.
pub fn encode(msg_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&msg_type.as_u32().to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode the HELLO peer-info payload: a single u32 protocol version.
pub fn encode_hello(version: u32) -> Vec<u8> {
    version.to_le_bytes().to_vec()
}

/// Decode the HELLO peer-info payload.
pub fn decode_hello(payload: &[u8]) -> Result<u32, ProtocolError> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| ProtocolError::InvalidPayload("HELLO payload must be exactly 4 bytes"))?;
    Ok(u32::from_le_bytes(bytes))
}

/// Encode the EXIT_CODE payload: a single i32 status.
pub fn encode_exit_code(status: i32) -> Vec<u8> {
    status.to_le_bytes().to_vec()
}

/// Decode the EXIT_CODE payload.
pub fn decode_exit_code(payload: &[u8]) -> Result<i32, ProtocolError> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| {
        ProtocolError::InvalidPayload("EXIT_CODE payload must be exactly 4 bytes")
    })?;
    Ok(i32::from_le_bytes(bytes))
}

/// Negotiate the session's data version from two HELLO payloads: the lower
/// of the two, rejected outright if it falls below [`MIN_DATA_VERSION`].
pub fn negotiate_version(local: u32, peer: u32) -> Result<u32, ProtocolError> {
    let negotiated = local.min(peer);
    if negotiated < MIN_DATA_VERSION {
        return Err(ProtocolError::VersionTooLow {
            negotiated,
            minimum: MIN_DATA_VERSION,
        });
    }
    Ok(negotiated)
}

// ---------------------------------------------------------------------------
// Decoder (buffered, handles partial reads)
// ---------------------------------------------------------------------------

/// Buffered message decoder.
///
/// Conceptually a two-state machine — awaiting a header, or awaiting the
/// remainder of a payload whose length is already known — realized here as
/// a single growable buffer that `decode` scans front-to-back, extracting
/// whole frames and leaving any trailing partial frame in place for the
/// next call.
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64 * 1024),
        }
    }

    /// Feed newly received bytes and extract every whole frame they
    /// complete. A header is never consumed until its full payload is also
    /// present in the buffer, so a caller that stops feeding mid-frame can
    /// resume later with no loss.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<RawMessage>, ProtocolError> {
        self.buf.extend_from_slice(data);
        let mut messages = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= self.buf.len() {
            let msg_type = read_u32_at(&self.buf, offset).unwrap_or_default();
            let length = read_u32_at(&self.buf, offset + 4).unwrap_or_default() as usize;

            if length > MAX_MESSAGE_SIZE {
                self.buf.clear();
                return Err(ProtocolError::MessageTooLarge(length));
            }

            let total = HEADER_SIZE + length;
            if offset + total > self.buf.len() {
                break;
            }

            let payload = self
                .buf
                .get(offset + HEADER_SIZE..offset + total)
                .unwrap_or_default()
                .to_vec();
            messages.push(RawMessage { msg_type, payload });
            offset += total;
        }

        if offset > 0 {
            self.buf.drain(..offset);
        }

        Ok(messages)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_empty_payload() {
        let data = encode(MessageType::Stdin, &[]).unwrap();
        let mut dec = Decoder::new();
        let msgs = dec.decode(&data).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].msg_type, MSG_STDIN);
        assert!(msgs[0].payload.is_empty());
    }

    #[test]
    fn encode_decode_roundtrip_with_payload() {
        let data = encode(MessageType::Stdout, b"hello world").unwrap();
        let mut dec = Decoder::new();
        let msgs = dec.decode(&data).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].msg_type, MSG_STDOUT);
        assert_eq!(msgs[0].payload, b"hello world");
    }

    #[test]
    fn decoder_handles_partial_reads() {
        let data = encode(MessageType::Stderr, b"partial").unwrap();
        let mut dec = Decoder::new();

        let msgs = dec.decode(&data[..HEADER_SIZE]).unwrap();
        assert!(msgs.is_empty());

        let msgs = dec.decode(&data[HEADER_SIZE..]).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload, b"partial");
    }

    #[test]
    fn decoder_handles_multiple_messages() {
        let mut data = encode(MessageType::Hello, &encode_hello(2)).unwrap();
        data.extend_from_slice(&encode(MessageType::Stdout, b"hi").unwrap());
        data.extend_from_slice(&encode(MessageType::ExitCode, &encode_exit_code(0)).unwrap());

        let mut dec = Decoder::new();
        let msgs = dec.decode(&data).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].msg_type, MSG_HELLO);
        assert_eq!(msgs[1].msg_type, MSG_STDOUT);
        assert_eq!(msgs[2].msg_type, MSG_EXIT_CODE);
    }

    #[test]
    fn decoder_rejects_oversized_frame() {
        let mut bad = (0u32).to_le_bytes().to_vec();
        bad.extend_from_slice(&((MAX_MESSAGE_SIZE + 1) as u32).to_le_bytes());
        let mut dec = Decoder::new();
        let err = dec.decode(&bad).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge(_)));
    }

    #[test]
    fn decoder_byte_by_byte() {
        let data = encode(MessageType::Stdin, b"x").unwrap();
        let mut dec = Decoder::new();

        for (i, &byte) in data.iter().enumerate() {
            let msgs = dec.decode(&[byte]).unwrap();
            if i < data.len() - 1 {
                assert!(msgs.is_empty());
            } else {
                assert_eq!(msgs.len(), 1);
                assert_eq!(msgs[0].payload, b"x");
            }
        }
    }

    #[test]
    fn hello_payload_roundtrip() {
        let payload = encode_hello(2);
        assert_eq!(decode_hello(&payload).unwrap(), 2);
    }

    #[test]
    fn exit_code_payload_roundtrip() {
        let payload = encode_exit_code(143);
        assert_eq!(decode_exit_code(&payload).unwrap(), 143);

        let payload = encode_exit_code(-1);
        assert_eq!(decode_exit_code(&payload).unwrap(), -1);
    }

    #[test]
    fn hello_payload_wrong_size_is_rejected() {
        assert!(decode_hello(&[0, 1, 2]).is_err());
    }

    #[test]
    fn version_negotiation_picks_minimum() {
        assert_eq!(negotiate_version(2, 3).unwrap(), 2);
        assert_eq!(negotiate_version(5, 2).unwrap(), 2);
    }

    #[test]
    fn version_negotiation_rejects_below_minimum() {
        let err = negotiate_version(2, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionTooLow { .. }));
    }

    #[test]
    fn message_type_round_trips_through_raw_tag() {
        for (tag, expected) in [
            (MSG_HELLO, MessageType::Hello),
            (MSG_STDIN, MessageType::Stdin),
            (MSG_STDOUT, MessageType::Stdout),
            (MSG_STDERR, MessageType::Stderr),
            (MSG_EXIT_CODE, MessageType::ExitCode),
        ] {
            assert_eq!(MessageType::try_from(tag).unwrap(), expected);
        }
        assert!(MessageType::try_from(99).is_err());
    }
}
