//! Static session options.

use sidp_crypto::{CipherKind, SessionKey};

use crate::compression::CompressionKind;
use crate::flags::{Feature, FlagSet};
use crate::message::{MessageKind, SessionType};

/// Cipher, compression and key agreed out of band.
///
/// Passed to [`Connection::from_options`](crate::Connection::from_options)
/// it pins the negotiated features without running the negotiation
/// handshake. The packet pipeline also takes one per message, with
/// `msg_type` selecting how the body is processed.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Encapsulation
    pub session_type: SessionType,
    /// Compression, if any
    pub compress_type: Option<CompressionKind>,
    /// Cipher; `None` means the baseline cipher for sealed kinds
    pub cipher_type: Option<CipherKind>,
    /// Message type
    pub msg_type: MessageKind,
    /// Session key
    pub key: SessionKey,
}

impl SessionOptions {
    /// Construct a static configuration.
    #[must_use]
    pub fn new(
        session_type: SessionType,
        compress_type: Option<CompressionKind>,
        cipher_type: Option<CipherKind>,
        msg_type: MessageKind,
        key: SessionKey,
    ) -> Self {
        Self {
            session_type,
            compress_type,
            cipher_type,
            msg_type,
            key,
        }
    }

    /// Cipher actually used for sealed kinds.
    #[must_use]
    pub fn effective_cipher(&self) -> CipherKind {
        self.cipher_type.unwrap_or(CipherKind::BASELINE)
    }

    /// Feature set these options pin.
    #[must_use]
    pub fn features(&self) -> FlagSet<Feature> {
        let mut set = FlagSet::empty().with(Feature::EncapDefault);
        set.insert(self.effective_cipher().into());
        if let Some(compression) = self.compress_type {
            set.insert(compression.into());
        }
        set
    }
}
