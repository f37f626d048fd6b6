//! Error types for the SIDP engine.

use thiserror::Error;

use crate::message::AlertReason;

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Wire decoding error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Cipher plugin error
    #[error("cipher error: {0}")]
    Cipher(#[from] sidp_crypto::CipherError),

    /// Compression plugin error
    #[error("compression error: {0}")]
    Compression(#[from] CompressionError),

    /// Init sequence failure
    #[error("init error: {0}")]
    Init(#[from] InitError),

    /// Authentication handshake failure
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Negotiation handshake failure
    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Data channel or sequencing error
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Endpoint I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error left the connection unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Init(_) | Self::Auth(_) => true,
            Self::Negotiation(e) => *e != NegotiationError::AlreadyNegotiated,
            _ => false,
        }
    }
}

/// Wire decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes available than the header or declared length requires
    #[error("truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Declared length exceeds the allowed ceiling
    #[error("oversize: {len} bytes exceeds maximum of {max}")]
    Oversize {
        /// Declared length
        len: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Unknown message kind byte
    #[error("invalid message kind: 0x{0:02X}")]
    InvalidMessageKind(u8),

    /// Unknown cipher identifier in a message header
    #[error("unknown cipher id: {0}")]
    UnknownCipher(u8),

    /// Unknown compression identifier in a message header
    #[error("unknown compression id: {0}")]
    UnknownCompression(u8),

    /// Unknown encapsulation (session type) identifier
    #[error("unknown session type: {0}")]
    UnknownSessionType(u8),

    /// Continuation packet carries a different session id
    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch {
        /// Session id of the first packet
        expected: u32,
        /// Session id of the offending packet
        actual: u32,
    },

    /// Handshake body failed to decode
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

/// Compression plugin errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompressionError {
    /// Compressed stream is malformed
    #[error("corrupt compressed data")]
    Corrupt,

    /// Decompressed output would exceed the allowed size
    #[error("decompressed size exceeds limit of {limit} bytes")]
    TooLarge {
        /// Allowed maximum
        limit: usize,
    },
}

/// Init sequence errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InitError {
    /// Echoed identifier does not match the local one
    #[error("{field} mismatch: expected {expected}, got {actual}")]
    IdMismatch {
        /// Which identifier
        field: &'static str,
        /// Local value
        expected: u32,
        /// Echoed value
        actual: u32,
    },

    /// Malformed, out-of-sequence or repeated init message
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Endpoint read timed out
    #[error("init timed out")]
    Timeout,
}

/// Authentication handshake errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown user, wrong password or undecryptable request
    #[error("credential mismatch")]
    CredentialMismatch,

    /// Malformed, out-of-sequence or repeated handshake message
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Endpoint read timed out
    #[error("authentication timed out")]
    Timeout,
}

/// Negotiation handshake errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// No cipher supported by both ends
    #[error("no common cipher")]
    NoCommonCipher,

    /// No compression supported by both ends
    #[error("no common compression")]
    NoCommonCompression,

    /// Malformed, out-of-sequence or invalid selection
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Negotiation already completed on this connection
    #[error("already negotiated")]
    AlreadyNegotiated,

    /// Endpoint read timed out
    #[error("negotiation timed out")]
    Timeout,
}

/// Data channel errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// `Authenticated` status is not set
    #[error("connection is not authenticated")]
    NotAuthenticated,

    /// Plaintext exceeds the configured message ceiling
    #[error("message too large: {len} bytes exceeds maximum of {max}")]
    MessageTooLarge {
        /// Plaintext length
        len: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Endpoint closed in the middle of a message
    #[error("endpoint closed mid-message")]
    Truncated,

    /// Message kind or algorithm differs from what the connection expects
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Continuation packet carries a different session id
    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch {
        /// Session id of the first packet
        expected: u32,
        /// Session id of the offending packet
        actual: u32,
    },

    /// Device ids do not address this connection
    #[error("misaddressed: message from device {source} to device {dest}")]
    Misaddressed {
        /// Sending device named by the packet
        r#source: u32,
        /// Receiving device named by the packet
        dest: u32,
    },

    /// Peer sent an alert
    #[error("peer alert: {0}")]
    PeerAlert(AlertReason),

    /// Connection has been closed
    #[error("connection closed")]
    Closed,

    /// A previous handshake failed; the connection must be closed
    #[error("connection failed an earlier handshake")]
    Poisoned,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
