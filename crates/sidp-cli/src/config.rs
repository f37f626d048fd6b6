//! Configuration system for the SIDP CLI.

use serde::{Deserialize, Serialize};
use sidp_core::handshake::auth::MAX_USERNAME_LEN;
use sidp_core::{
    ChannelConfig, CompressionKind, ConnectionType, Feature, FlagSet, MemoryCredentialStore,
};
use sidp_crypto::CipherKind;
use sidp_crypto::password::PasswordParams;
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// SIDP configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// This device
    #[serde(default)]
    pub device: DeviceConfig,
    /// Key material and accepted algorithms
    #[serde(default)]
    pub security: SecurityConfig,
    /// Channel limits and timeouts
    #[serde(default)]
    pub channel: ChannelConfig,
    /// Accounts accepted when hosting
    #[serde(default)]
    pub credentials: Vec<Credential>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device id
    #[serde(default = "default_device_id")]
    pub id: u32,
    /// Listen address when hosting
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Connection type used by the init sequence
    #[serde(default)]
    pub connection_type: ConnectionType,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// File holding the hex-encoded 32-byte pre-shared key. Without one the
    /// key is derived from a passphrase prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Ciphers offered during negotiation
    #[serde(default = "default_ciphers")]
    pub ciphers: Vec<CipherKind>,
    /// Compressions offered during negotiation
    #[serde(default = "default_compressions")]
    pub compressions: Vec<CompressionKind>,
    /// Argon2id cost for `hash-password`
    #[serde(default)]
    pub password_params: PasswordParams,
}

/// One account in the host's credential store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// User name
    pub username: String,
    /// Argon2id PHC string
    pub password_hash: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_device_id() -> u32 {
    1
}

fn default_listen_addr() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_ciphers() -> Vec<CipherKind> {
    vec![CipherKind::Aes256, CipherKind::XSalsa20]
}

fn default_compressions() -> Vec<CompressionKind> {
    vec![CompressionKind::Zlib, CompressionKind::Lzo]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
            listen_addr: default_listen_addr(),
            connection_type: ConnectionType::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            ciphers: default_ciphers(),
            compressions: default_compressions(),
            password_params: PasswordParams::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sidp/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.device.listen_addr.parse()?)
    }

    /// Features advertised before negotiation.
    #[must_use]
    pub fn features(&self) -> FlagSet<Feature> {
        self.security
            .ciphers
            .iter()
            .map(|c| Feature::from(*c))
            .chain(self.security.compressions.iter().map(|c| Feature::from(*c)))
            .chain([Feature::EncapDefault])
            .collect()
    }

    /// Build the host's credential store from `[[credentials]]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored hash is not an Argon2 PHC string.
    pub fn credential_store(&self) -> anyhow::Result<MemoryCredentialStore> {
        let mut store = MemoryCredentialStore::new(self.security.password_params);
        for credential in &self.credentials {
            store.insert_hash(&credential.username, &credential.password_hash)?;
        }
        Ok(store)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;

        if self.security.ciphers.is_empty() {
            anyhow::bail!("At least one cipher must be enabled");
        }
        if self.security.compressions.is_empty() {
            anyhow::bail!("At least one compression must be enabled");
        }
        self.security.password_params.validate()?;
        self.channel.validate()?;

        let mut seen = HashSet::new();
        for credential in &self.credentials {
            let name = credential.username.as_str();
            if name.is_empty() || name.len() > MAX_USERNAME_LEN {
                anyhow::bail!("Username '{name}' must be 1 to {MAX_USERNAME_LEN} bytes");
            }
            if !seen.insert(name) {
                anyhow::bail!("Duplicate credential for '{name}'");
            }
            if !credential.password_hash.starts_with("$argon2") {
                anyhow::bail!("Credential for '{name}' is not an Argon2 PHC string");
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidp_crypto::password::hash_password;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.listen_addr, "0.0.0.0:7400");
        assert_eq!(config.device.connection_type, ConnectionType::Normal);
        assert_eq!(config.logging.level, "info");
        assert!(config.credentials.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_features() {
        let mut config = Config::default();
        config.security.ciphers = vec![CipherKind::XSalsa20];
        config.security.compressions = vec![CompressionKind::Lzo];
        let features = config.features();
        assert!(features.contains(Feature::CipherXSalsa20));
        assert!(features.contains(Feature::CompressLzo));
        assert!(features.contains(Feature::EncapDefault));
        assert!(!features.contains(Feature::CipherAes256));
        assert_eq!(features.len(), 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.security.ciphers.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.channel.max_message_len = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.device.listen_addr = "nowhere".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credential_validation() {
        let phc = hash_password(b"pw", &PasswordParams::low_security()).unwrap();
        let mut config = Config::default();
        config.credentials.push(Credential {
            username: "alice".into(),
            password_hash: phc.clone(),
        });
        assert!(config.validate().is_ok());
        assert_eq!(config.credential_store().unwrap().len(), 1);

        config.credentials.push(Credential {
            username: "alice".into(),
            password_hash: phc,
        });
        assert!(config.validate().is_err());

        config.credentials.pop();
        config.credentials.push(Credential {
            username: "bob".into(),
            password_hash: "hunter2".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = Config::default();
        config.device.id = 42;
        config.device.connection_type = ConnectionType::Routing;
        config.security.compressions = vec![CompressionKind::Lzo];
        config.channel.handshake_timeout_ms = 2500;

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(deserialized.device.id, 42);
        assert_eq!(deserialized.device.connection_type, ConnectionType::Routing);
        assert_eq!(deserialized.security.compressions, vec![CompressionKind::Lzo]);
        assert_eq!(deserialized.channel, config.channel);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [device]
            id = 7

            [security]
            ciphers = ["xsalsa20"]

            [[credentials]]
            username = "sensor"
            password_hash = "$argon2id$v=19$m=4096,t=2,p=1$c2FsdA$aGFzaA"
            "#,
        )
        .unwrap();
        assert_eq!(config.device.id, 7);
        assert_eq!(config.device.listen_addr, "0.0.0.0:7400");
        assert_eq!(config.security.ciphers, vec![CipherKind::XSalsa20]);
        assert_eq!(config.security.compressions.len(), 2);
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.channel, ChannelConfig::default());
    }
}
