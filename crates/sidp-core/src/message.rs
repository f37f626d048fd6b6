//! Logical messages on top of packets.
//!
//! Every message starts with a 12-byte header inside the first packet's
//! payload. The body follows, split across as many packets as needed; all
//! packets of one message carry the same session id and arrive in order.
//!
//! ```text
//! ┌──────┬────────┬─────────────┬──────────────┬───────────────┬───────────────────┐
//! │ kind │ cipher │ compression │ session type │ body_len u32  │ inflated_len u32  │
//! └──────┴────────┴─────────────┴──────────────┴───────────────┴───────────────────┘
//! ```
//!
//! `body_len` counts the (sealed) body bytes that follow. `inflated_len` is
//! the plaintext length after opening and decompression, so a receiver can
//! reject a message against its ceiling before allocating for it.

use std::fmt;
use std::io::{self, Read, Write};

use sidp_crypto::CipherKind;
use tracing::trace;

use crate::compression::CompressionKind;
use crate::error::{Error, FrameError};
use crate::frame::Packet;
use crate::{MAX_MESSAGE_LEN, MESSAGE_HEADER_SIZE, PACKET_HEADER_SIZE};

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Application data
    Data = 0,
    /// Authentication handshake
    Auth = 1,
    /// Negotiation handshake
    Negotiate = 2,
    /// Init sequence
    Init = 3,
    /// Handshake failure notice (sent in clear)
    Alert = 4,
}

impl MessageKind {
    /// Whether bodies of this kind are sealed.
    #[must_use]
    pub fn is_sealed(self) -> bool {
        matches!(self, Self::Data | Self::Auth | Self::Negotiate)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Auth),
            2 => Ok(Self::Negotiate),
            3 => Ok(Self::Init),
            4 => Ok(Self::Alert),
            _ => Err(FrameError::InvalidMessageKind(value)),
        }
    }
}

/// Session encapsulation applied around message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// Device ids and session id travel in the packet header
    #[default]
    Default,
}

impl SessionType {
    /// Identifier carried in message headers.
    #[must_use]
    pub fn wire_id(self) -> u8 {
        match self {
            Self::Default => 1,
        }
    }

    /// Parse a wire identifier.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::UnknownSessionType` for unassigned identifiers.
    pub fn from_wire_id(id: u8) -> Result<Self, FrameError> {
        match id {
            1 => Ok(Self::Default),
            other => Err(FrameError::UnknownSessionType(other)),
        }
    }
}

/// Reason carried by an alert message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertReason {
    /// Credentials rejected
    CredentialMismatch,
    /// Malformed or out-of-sequence handshake message
    ProtocolViolation,
    /// No cipher in common
    NoCommonCipher,
    /// No compression in common
    NoCommonCompression,
    /// Negotiation already completed
    AlreadyNegotiated,
}

impl AlertReason {
    /// Wire code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::CredentialMismatch => 1,
            Self::ProtocolViolation => 2,
            Self::NoCommonCipher => 3,
            Self::NoCommonCompression => 4,
            Self::AlreadyNegotiated => 5,
        }
    }

    /// Parse a wire code. Unknown codes read as `ProtocolViolation`.
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::CredentialMismatch,
            3 => Self::NoCommonCipher,
            4 => Self::NoCommonCompression,
            5 => Self::AlreadyNegotiated,
            _ => Self::ProtocolViolation,
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CredentialMismatch => "credential mismatch",
            Self::ProtocolViolation => "protocol violation",
            Self::NoCommonCipher => "no common cipher",
            Self::NoCommonCompression => "no common compression",
            Self::AlreadyNegotiated => "already negotiated",
        };
        f.write_str(text)
    }
}

/// Addressing shared by every packet of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Sending device
    pub source_device_id: u32,
    /// Receiving device
    pub dest_device_id: u32,
    /// Session id
    pub session_id: u32,
}

/// Header at the start of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message type
    pub kind: MessageKind,
    /// Cipher sealing the body, `None` for clear bodies
    pub cipher: Option<CipherKind>,
    /// Compression applied before sealing
    pub compression: Option<CompressionKind>,
    /// Encapsulation
    pub session_type: SessionType,
    /// Body bytes following the header
    pub body_len: u32,
    /// Plaintext length once opened and decompressed
    pub inflated_len: u32,
}

impl MessageHeader {
    /// Serialize to the 12-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut buf = [0u8; MESSAGE_HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1] = self.cipher.map_or(0, CipherKind::wire_id);
        buf[2] = self.compression.map_or(0, CompressionKind::wire_id);
        buf[3] = self.session_type.wire_id();
        buf[4..8].copy_from_slice(&self.body_len.to_be_bytes());
        buf[8..12].copy_from_slice(&self.inflated_len.to_be_bytes());
        buf
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` for short input and an `Unknown*` /
    /// `InvalidMessageKind` error for unassigned identifiers.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < MESSAGE_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: MESSAGE_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let kind = MessageKind::try_from(data[0])?;
        let cipher = match data[1] {
            0 => None,
            id => Some(CipherKind::from_wire_id(id).map_err(|_| FrameError::UnknownCipher(id))?),
        };
        let compression = match data[2] {
            0 => None,
            id => Some(CompressionKind::from_wire_id(id)?),
        };
        let session_type = SessionType::from_wire_id(data[3])?;
        let body_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let inflated_len = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        Ok(Self {
            kind,
            cipher,
            compression,
            session_type,
            body_len,
            inflated_len,
        })
    }

    /// Associated data bound into the seal: every header field fixed before
    /// sealing, plus the session id.
    #[must_use]
    pub fn aad(&self, session_id: u32) -> [u8; 12] {
        let mut aad = [0u8; 12];
        aad[0] = self.kind as u8;
        aad[1] = self.cipher.map_or(0, CipherKind::wire_id);
        aad[2] = self.compression.map_or(0, CompressionKind::wire_id);
        aad[3] = self.session_type.wire_id();
        aad[4..8].copy_from_slice(&self.inflated_len.to_be_bytes());
        aad[8..12].copy_from_slice(&session_id.to_be_bytes());
        aad
    }
}

/// A reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Addressing of the first packet
    pub route: Route,
    /// Header
    pub header: MessageHeader,
    /// Body (sealed or clear, as the header says)
    pub body: Vec<u8>,
}

/// Wire traffic generated or consumed by one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireCount {
    /// Packets
    pub packets: u64,
    /// Bytes including packet headers
    pub bytes: u64,
}

/// Write one message, segmenting it into packets of at most
/// `MAX_MESSAGE_LEN` payload bytes.
///
/// # Errors
///
/// Returns `FrameError::Oversize` if `body` does not match
/// `header.body_len`, or the endpoint's I/O error.
pub fn write_message<W: Write + ?Sized>(
    w: &mut W,
    route: &Route,
    header: &MessageHeader,
    body: &[u8],
) -> Result<WireCount, Error> {
    if body.len() != header.body_len as usize {
        return Err(FrameError::Oversize {
            len: body.len(),
            max: header.body_len as usize,
        }
        .into());
    }

    let mut stream = Vec::with_capacity(MESSAGE_HEADER_SIZE + body.len());
    stream.extend_from_slice(&header.encode());
    stream.extend_from_slice(body);

    let mut count = WireCount::default();
    for chunk in stream.chunks(MAX_MESSAGE_LEN) {
        let packet = Packet::new(
            route.source_device_id,
            route.dest_device_id,
            route.session_id,
            chunk.to_vec(),
        );
        packet.write_to(w)?;
        count.packets += 1;
        count.bytes += packet.encoded_len() as u64;
    }
    w.flush()?;

    trace!(
        kind = ?header.kind,
        session = route.session_id,
        body_len = header.body_len,
        packets = count.packets,
        "message written"
    );
    Ok(count)
}

/// Read one message, reassembling continuation packets by session id.
///
/// `max_body` bounds the declared body length and is checked before the body
/// buffer is allocated.
///
/// # Errors
///
/// - `io::ErrorKind::UnexpectedEof` if the endpoint closes before a message
///   starts
/// - `FrameError::Truncated` if it closes partway through one
/// - `FrameError::Oversize` if the declared body exceeds `max_body`
/// - `FrameError::SessionMismatch` if a continuation packet belongs to
///   another session
pub fn read_message<R: Read + ?Sized>(
    r: &mut R,
    max_body: usize,
) -> Result<(Message, WireCount), Error> {
    let first = Packet::read_from(r)?;
    let mut count = WireCount {
        packets: 1,
        bytes: first.encoded_len() as u64,
    };

    let header = MessageHeader::decode(&first.payload)?;
    let body_len = header.body_len as usize;
    if body_len > max_body {
        return Err(FrameError::Oversize {
            len: body_len,
            max: max_body,
        }
        .into());
    }

    let route = Route {
        source_device_id: first.source_device_id,
        dest_device_id: first.dest_device_id,
        session_id: first.session_id,
    };

    let mut body = Vec::with_capacity(body_len);
    append_segment(&mut body, &first.payload[MESSAGE_HEADER_SIZE..], body_len)?;

    while body.len() < body_len {
        let packet = match Packet::read_from(r) {
            Ok(p) => p,
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(FrameError::Truncated {
                    expected: MESSAGE_HEADER_SIZE + body_len,
                    actual: MESSAGE_HEADER_SIZE + body.len(),
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        if packet.session_id != route.session_id {
            return Err(FrameError::SessionMismatch {
                expected: route.session_id,
                actual: packet.session_id,
            }
            .into());
        }

        count.packets += 1;
        count.bytes += packet.encoded_len() as u64;
        append_segment(&mut body, &packet.payload, body_len)?;
    }

    trace!(
        kind = ?header.kind,
        session = route.session_id,
        body_len,
        packets = count.packets,
        "message read"
    );
    Ok((Message { route, header, body }, count))
}

fn append_segment(body: &mut Vec<u8>, segment: &[u8], body_len: usize) -> Result<(), FrameError> {
    if body.len() + segment.len() > body_len {
        return Err(FrameError::Oversize {
            len: body.len() + segment.len(),
            max: body_len,
        });
    }
    body.extend_from_slice(segment);
    Ok(())
}

/// Wire bytes needed to carry a body of `body_len` bytes.
#[must_use]
pub fn wire_len(body_len: usize) -> usize {
    let total = MESSAGE_HEADER_SIZE + body_len;
    let packets = total.div_ceil(MAX_MESSAGE_LEN).max(1);
    total + packets * PACKET_HEADER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE: Route = Route {
        source_device_id: 10,
        dest_device_id: 20,
        session_id: 1234,
    };

    fn header(kind: MessageKind, body_len: usize) -> MessageHeader {
        MessageHeader {
            kind,
            cipher: Some(CipherKind::Aes256),
            compression: Some(CompressionKind::Zlib),
            session_type: SessionType::Default,
            body_len: body_len as u32,
            inflated_len: 99,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let h = header(MessageKind::Negotiate, 77);
        assert_eq!(MessageHeader::decode(&h.encode()).unwrap(), h);

        let clear = MessageHeader {
            cipher: None,
            compression: None,
            ..header(MessageKind::Init, 0)
        };
        let bytes = clear.encode();
        assert_eq!(&bytes[..4], &[3, 0, 0, 1]);
        assert_eq!(MessageHeader::decode(&bytes).unwrap(), clear);
    }

    #[test]
    fn test_header_rejects_unknown_ids() {
        let mut bytes = header(MessageKind::Data, 0).encode();
        bytes[0] = 9;
        assert_eq!(
            MessageHeader::decode(&bytes),
            Err(FrameError::InvalidMessageKind(9))
        );

        let mut bytes = header(MessageKind::Data, 0).encode();
        bytes[1] = 7;
        assert_eq!(MessageHeader::decode(&bytes), Err(FrameError::UnknownCipher(7)));

        let mut bytes = header(MessageKind::Data, 0).encode();
        bytes[3] = 0;
        assert_eq!(
            MessageHeader::decode(&bytes),
            Err(FrameError::UnknownSessionType(0))
        );
    }

    #[test]
    fn test_aad_binds_session() {
        let h = header(MessageKind::Data, 5);
        assert_ne!(h.aad(1), h.aad(2));
        let other = MessageHeader {
            inflated_len: 100,
            ..h
        };
        assert_ne!(h.aad(1), other.aad(1));
    }

    #[test]
    fn test_single_packet_message() {
        let mut wire = Vec::new();
        let count = write_message(&mut wire, &ROUTE, &header(MessageKind::Data, 3), b"abc").unwrap();
        assert_eq!(count.packets, 1);
        assert_eq!(count.bytes as usize, wire.len());
        assert_eq!(wire.len(), wire_len(3));

        let (msg, read) = read_message(&mut io::Cursor::new(wire), 1024).unwrap();
        assert_eq!(msg.route, ROUTE);
        assert_eq!(msg.body, b"abc");
        assert_eq!(read, count);
    }

    #[test]
    fn test_multi_packet_reassembly() {
        let body: Vec<u8> = (0..MAX_MESSAGE_LEN * 2 + 17).map(|i| i as u8).collect();
        let mut wire = Vec::new();
        let count = write_message(&mut wire, &ROUTE, &header(MessageKind::Data, body.len()), &body)
            .unwrap();
        assert_eq!(count.packets, 3);
        assert_eq!(wire.len(), wire_len(body.len()));

        let (msg, _) = read_message(&mut io::Cursor::new(wire), body.len()).unwrap();
        assert_eq!(msg.body, body);
    }

    #[test]
    fn test_declared_body_over_limit() {
        let mut wire = Vec::new();
        write_message(&mut wire, &ROUTE, &header(MessageKind::Data, 100), &[0u8; 100]).unwrap();
        assert!(matches!(
            read_message(&mut io::Cursor::new(wire), 99),
            Err(Error::Frame(FrameError::Oversize { len: 100, max: 99 }))
        ));
    }

    #[test]
    fn test_session_mismatch_detected() {
        let body = vec![1u8; MAX_MESSAGE_LEN + 10];
        let mut wire = Vec::new();
        write_message(&mut wire, &ROUTE, &header(MessageKind::Data, body.len()), &body).unwrap();

        // Rewrite the session id of the continuation packet.
        let second = PACKET_HEADER_SIZE + MAX_MESSAGE_LEN;
        wire[second + 8..second + 12].copy_from_slice(&999u32.to_be_bytes());

        assert!(matches!(
            read_message(&mut io::Cursor::new(wire), body.len()),
            Err(Error::Frame(FrameError::SessionMismatch {
                expected: 1234,
                actual: 999
            }))
        ));
    }

    #[test]
    fn test_endpoint_closed_mid_message() {
        let body = vec![1u8; MAX_MESSAGE_LEN + 10];
        let mut wire = Vec::new();
        write_message(&mut wire, &ROUTE, &header(MessageKind::Data, body.len()), &body).unwrap();
        wire.truncate(PACKET_HEADER_SIZE + MAX_MESSAGE_LEN);

        assert!(matches!(
            read_message(&mut io::Cursor::new(wire), body.len()),
            Err(Error::Frame(FrameError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_short_first_payload() {
        let mut wire = Vec::new();
        Packet::new(1, 2, 3, vec![0u8; 5]).write_to(&mut wire).unwrap();
        assert!(matches!(
            read_message(&mut io::Cursor::new(wire), 100),
            Err(Error::Frame(FrameError::Truncated {
                expected: MESSAGE_HEADER_SIZE,
                actual: 5
            }))
        ));
    }

    #[test]
    fn test_alert_codes() {
        for reason in [
            AlertReason::CredentialMismatch,
            AlertReason::ProtocolViolation,
            AlertReason::NoCommonCipher,
            AlertReason::NoCommonCompression,
            AlertReason::AlreadyNegotiated,
        ] {
            assert_eq!(AlertReason::from_code(reason.code()), reason);
        }
        assert_eq!(AlertReason::from_code(200), AlertReason::ProtocolViolation);
    }
}
