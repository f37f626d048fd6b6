//! Per-connection channel configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MAX_MESSAGE_LEN;
use crate::error::Error;

/// Limits and timeouts applied to one connection.
///
/// The connection owns its endpoint's read timeout. `read_timeout_ms` is
/// applied when the configuration is attached, each handshake switches to
/// `handshake_timeout_ms` and then restores `read_timeout_ms`. A timeout set
/// on the endpoint directly does not survive either step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest plaintext accepted by `send` and `recv`, in bytes
    pub max_message_len: usize,

    /// Read timeout while a handshake is in progress, in milliseconds
    /// (0 disables)
    pub handshake_timeout_ms: u64,

    /// Read timeout for data receives, in milliseconds (0 disables)
    pub read_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_message_len: MAX_MESSAGE_LEN,
            handshake_timeout_ms: 10_000,
            read_timeout_ms: 0,
        }
    }
}

impl ChannelConfig {
    /// Handshake read timeout, if any.
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }

    /// Data read timeout, if any.
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// Check limits are within protocol bounds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `max_message_len` is 0 or above
    /// `MAX_MESSAGE_LEN`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_message_len == 0 || self.max_message_len > MAX_MESSAGE_LEN {
            return Err(Error::Config(format!(
                "max_message_len must be between 1 and {MAX_MESSAGE_LEN}, got {}",
                self.max_message_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.read_timeout(), None);
    }

    #[test]
    fn test_message_len_bounds() {
        let mut config = ChannelConfig {
            max_message_len: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.max_message_len = MAX_MESSAGE_LEN + 1;
        assert!(config.validate().is_err());

        config.max_message_len = 1;
        assert!(config.validate().is_ok());
    }
}
