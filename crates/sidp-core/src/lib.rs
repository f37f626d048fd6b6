//! # SIDP Core
//!
//! Engine for the SIDP (Secure Inter-Device Protocol) transport: encrypted,
//! optionally compressed message exchange between two devices over a
//! caller-supplied byte stream.
//!
//! This crate provides:
//! - Packet and message encoding, segmentation and reassembly
//! - Per-connection state with typed feature and status flags
//! - Init, authentication and capability-negotiation handshakes
//! - The data channel (compress, seal, frame and their inverses)
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Connection                               │
//! │   (ids, pre-shared key, flag sets, handshake state, endpoint)    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Handshakes  /  Data channel                      │
//! │   (init, auth, negotiation; send and recv of application data)  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Messages                                │
//! │   (12-byte header + body, compressed then sealed)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          Packets                                 │
//! │   (14-byte routing header + up to MAX_MESSAGE_LEN payload)      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use sidp_core::{Connection, Feature, SecureChannel};
//! use sidp_crypto::SessionKey;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("192.0.2.10:7400")?;
//! let mut conn = Connection::init(stream, 10, 20, 1, SessionKey::new([7; 32]));
//! conn.declare_supported(Feature::CipherAes256);
//! conn.declare_supported(Feature::CompressZlib);
//!
//! conn.authenticate_user("sensor-1", "secret")?;
//! conn.negotiate_user()?;
//! conn.send(b"hello")?;
//! let reply = conn.recv()?;
//! conn.close()?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod chain;
pub mod channel;
pub mod compression;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod flags;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod options;

pub use compression::{CompressionKind, Compressor};
pub use config::ChannelConfig;
pub use connection::{Connection, ConnectionStats, ConnectionType, UNASSIGNED_SESSION};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use endpoint::{Endpoint, MemoryEndpoint};
pub use engine::SecureChannel;
pub use error::{
    AuthError, ChannelError, CompressionError, Error, FrameError, InitError, NegotiationError,
};
pub use flags::{Feature, Flag, FlagSet, Status};
pub use frame::Packet;
pub use handshake::{AuthState, InitState, NegotiationState};
pub use message::{AlertReason, MessageKind, SessionType};
pub use options::SessionOptions;

/// Largest packet on the wire, header included
pub const MAX_PACKET_LEN: usize = 65535;

/// Bytes of each packet reserved for headers
pub const HEADER_BUDGET: usize = 1024;

/// Largest packet payload
pub const MAX_MESSAGE_LEN: usize = MAX_PACKET_LEN - HEADER_BUDGET;

/// Packet header size: three u32 ids and a u16 payload length
pub const PACKET_HEADER_SIZE: usize = 14;

/// Message header size, carried at the front of a message's first packet
pub const MESSAGE_HEADER_SIZE: usize = 12;
