//! Packet encoding and decoding for the SIDP wire protocol.
//!
//! A packet is a fixed 14-byte header followed by the payload. All
//! multi-byte fields are big-endian (network byte order).
//!
//! ```text
//! ┌───────────────┬───────────────┬───────────────┬─────────┬─────────────┐
//! │ source (u32)  │ dest (u32)    │ session (u32) │ len u16 │ payload ... │
//! └───────────────┴───────────────┴───────────────┴─────────┴─────────────┘
//! ```

use std::io::{self, Read, Write};

use crate::error::{Error, FrameError};
use crate::{MAX_MESSAGE_LEN, PACKET_HEADER_SIZE};

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sending device
    pub source_device_id: u32,
    /// Receiving device
    pub dest_device_id: u32,
    /// Session scoping this exchange
    pub session_id: u32,
    /// Payload bytes; the wire length field is derived from this buffer
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet.
    #[must_use]
    pub fn new(source_device_id: u32, dest_device_id: u32, session_id: u32, payload: Vec<u8>) -> Self {
        Self {
            source_device_id,
            dest_device_id,
            session_id,
            payload,
        }
    }

    /// Payload length as carried on the wire.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    fn check_len(len: usize) -> Result<u16, FrameError> {
        if len > MAX_MESSAGE_LEN {
            return Err(FrameError::Oversize {
                len,
                max: MAX_MESSAGE_LEN,
            });
        }
        // MAX_MESSAGE_LEN < u16::MAX
        Ok(len as u16)
    }

    fn encode_header(&self) -> Result<[u8; PACKET_HEADER_SIZE], FrameError> {
        let len = Self::check_len(self.payload.len())?;

        let mut header = [0u8; PACKET_HEADER_SIZE];
        header[0..4].copy_from_slice(&self.source_device_id.to_be_bytes());
        header[4..8].copy_from_slice(&self.dest_device_id.to_be_bytes());
        header[8..12].copy_from_slice(&self.session_id.to_be_bytes());
        header[12..14].copy_from_slice(&len.to_be_bytes());
        Ok(header)
    }

    /// Serialize to bytes.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Oversize` if the payload exceeds `MAX_MESSAGE_LEN`.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let header = self.encode_header()?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parse from bytes. Trailing bytes beyond the declared payload are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::Truncated` if `data` is shorter than the header or
    /// the declared payload, and `FrameError::Oversize` if the declared
    /// payload length exceeds `MAX_MESSAGE_LEN`.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: PACKET_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let (source_device_id, dest_device_id, session_id, payload_len) =
            Self::parse_header(&data[..PACKET_HEADER_SIZE])?;

        let end = PACKET_HEADER_SIZE + payload_len;
        if data.len() < end {
            return Err(FrameError::Truncated {
                expected: end,
                actual: data.len(),
            });
        }

        Ok(Self {
            source_device_id,
            dest_device_id,
            session_id,
            payload: data[PACKET_HEADER_SIZE..end].to_vec(),
        })
    }

    fn parse_header(header: &[u8]) -> Result<(u32, u32, u32, usize), FrameError> {
        let source = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let dest = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let session = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let len = u16::from_be_bytes([header[12], header[13]]) as usize;

        if len > MAX_MESSAGE_LEN {
            return Err(FrameError::Oversize {
                len,
                max: MAX_MESSAGE_LEN,
            });
        }

        Ok((source, dest, session, len))
    }

    /// Write the encoded packet to `w`.
    ///
    /// # Errors
    ///
    /// Returns a frame error for oversize payloads, or the endpoint's I/O
    /// error.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), Error> {
        let header = self.encode_header()?;
        w.write_all(&header)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    /// Read one packet from `r`.
    ///
    /// The declared length is validated before the payload buffer is
    /// allocated. A stream that ends before the first header byte yields
    /// `io::ErrorKind::UnexpectedEof`; one that ends partway through yields
    /// `FrameError::Truncated`.
    ///
    /// # Errors
    ///
    /// Frame errors as for [`decode`](Self::decode), or the endpoint's I/O
    /// error.
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, Error> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        let got = read_full(r, &mut header)?;
        if got == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "endpoint closed").into());
        }
        if got < PACKET_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: PACKET_HEADER_SIZE,
                actual: got,
            }
            .into());
        }

        let (source_device_id, dest_device_id, session_id, payload_len) =
            Self::parse_header(&header)?;

        let mut payload = vec![0u8; payload_len];
        let got = read_full(r, &mut payload)?;
        if got < payload_len {
            return Err(FrameError::Truncated {
                expected: PACKET_HEADER_SIZE + payload_len,
                actual: PACKET_HEADER_SIZE + got,
            }
            .into());
        }

        Ok(Self {
            source_device_id,
            dest_device_id,
            session_id,
            payload,
        })
    }
}

/// Read until `buf` is full or the stream ends. Returns bytes read.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::new(10, 20, 1234, b"hello".to_vec())
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample().encode().unwrap();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE + 5);
        assert_eq!(&bytes[0..4], &10u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &20u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1234u32.to_be_bytes());
        assert_eq!(&bytes[12..14], &5u16.to_be_bytes());
        assert_eq!(&bytes[14..], b"hello");
    }

    #[test]
    fn test_decode_roundtrip() {
        let packet = sample();
        assert_eq!(Packet::decode(&packet.encode().unwrap()).unwrap(), packet);
    }

    #[test]
    fn test_decode_short_header() {
        assert_eq!(
            Packet::decode(&[0u8; 10]),
            Err(FrameError::Truncated {
                expected: PACKET_HEADER_SIZE,
                actual: 10
            })
        );
    }

    #[test]
    fn test_decode_short_payload() {
        let bytes = sample().encode().unwrap();
        assert_eq!(
            Packet::decode(&bytes[..bytes.len() - 1]),
            Err(FrameError::Truncated {
                expected: PACKET_HEADER_SIZE + 5,
                actual: PACKET_HEADER_SIZE + 4
            })
        );
    }

    #[test]
    fn test_decode_oversize_declared_len() {
        let mut bytes = [0u8; PACKET_HEADER_SIZE];
        bytes[12..14].copy_from_slice(&u16::MAX.to_be_bytes());
        assert_eq!(
            Packet::decode(&bytes),
            Err(FrameError::Oversize {
                len: u16::MAX as usize,
                max: MAX_MESSAGE_LEN
            })
        );
    }

    #[test]
    fn test_encode_size_boundary() {
        let ok = Packet::new(1, 2, 3, vec![0xAB; MAX_MESSAGE_LEN]);
        assert_eq!(ok.encode().unwrap().len(), PACKET_HEADER_SIZE + MAX_MESSAGE_LEN);

        let too_big = Packet::new(1, 2, 3, vec![0xAB; MAX_MESSAGE_LEN + 1]);
        assert!(matches!(too_big.encode(), Err(FrameError::Oversize { .. })));
    }

    #[test]
    fn test_empty_payload() {
        let packet = Packet::new(1, 2, 3, Vec::new());
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_stream_roundtrip() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        Packet::new(1, 1, 1, vec![7; 3]).write_to(&mut buf).unwrap();

        let mut cursor = io::Cursor::new(buf);
        assert_eq!(Packet::read_from(&mut cursor).unwrap(), sample());
        assert_eq!(Packet::read_from(&mut cursor).unwrap().payload, vec![7; 3]);

        match Packet::read_from(&mut cursor) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_truncated_payload() {
        let bytes = sample().encode().unwrap();
        let mut cursor = io::Cursor::new(&bytes[..bytes.len() - 2]);
        assert!(matches!(
            Packet::read_from(&mut cursor),
            Err(Error::Frame(FrameError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_stream_oversize_rejected_before_payload() {
        let mut header = vec![0u8; PACKET_HEADER_SIZE];
        header[12..14].copy_from_slice(&u16::MAX.to_be_bytes());
        let mut cursor = io::Cursor::new(header);
        assert!(matches!(
            Packet::read_from(&mut cursor),
            Err(Error::Frame(FrameError::Oversize { .. }))
        ));
    }
}
