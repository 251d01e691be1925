//! Server configuration parsing.
//!
//! Configuration is TOML with defaulted sections. The values here are
//! exactly the ones the core consults; transport-level settings live with
//! the daemon binary. Section and key names mirror the flat dotted form
//! used in documentation (`db.backend`, `crypto.bcrypt.cost`, ...).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// Data and configuration roots.
    #[serde(default)]
    pub core: CoreSection,

    /// Storage backend selection.
    #[serde(default)]
    pub db: DbSection,

    /// Secret-hashing backend selection.
    #[serde(default)]
    pub crypto: CryptoSection,

    /// Token backend, key provider, and lifetime.
    #[serde(default)]
    pub token: TokenSection,

    /// Process-wide serving switches.
    #[serde(default)]
    pub server: ServerSection,

    /// External hook plugin discovery.
    #[serde(default)]
    pub plugin: PluginSection,
}

impl ServerConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates value ranges. Fail-closed: a config that would silently
    /// weaken hashing or produce unusable tokens is rejected at load time.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=31).contains(&self.crypto.bcrypt.cost) {
            return Err(ConfigError::Validation(format!(
                "crypto.bcrypt.cost must be within 4..=31, got {}",
                self.crypto.bcrypt.cost
            )));
        }
        if self.token.lifetime_secs == 0 {
            return Err(ConfigError::Validation(
                "token.lifetime_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding token key material: `<core.conf>/keys`.
    #[must_use]
    pub fn key_dir(&self) -> PathBuf {
        self.core.conf.join("keys")
    }
}

/// Data and configuration roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSection {
    /// Data root for storage backends.
    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Configuration root; token keys live under `<conf>/keys`.
    #[serde(default = "default_conf")]
    pub conf: PathBuf,
}

impl Default for CoreSection {
    fn default() -> Self {
        Self {
            home: default_home(),
            conf: default_conf(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSection {
    /// Registered KV backend name.
    #[serde(default = "default_db_backend")]
    pub backend: String,
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
        }
    }
}

/// Secret-hashing backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoSection {
    /// Registered crypto backend name.
    #[serde(default = "default_crypto_backend")]
    pub backend: String,

    /// bcrypt backend tuning.
    #[serde(default)]
    pub bcrypt: BcryptSection,
}

impl Default for CryptoSection {
    fn default() -> Self {
        Self {
            backend: default_crypto_backend(),
            bcrypt: BcryptSection::default(),
        }
    }
}

/// bcrypt cost parameter, read once at backend construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BcryptSection {
    #[serde(default = "default_bcrypt_cost")]
    pub cost: u32,
}

impl Default for BcryptSection {
    fn default() -> Self {
        Self {
            cost: default_bcrypt_cost(),
        }
    }
}

/// Token backend, key provider, and lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSection {
    /// Registered token backend name.
    #[serde(default = "default_token_backend")]
    pub backend: String,

    /// Registered key provider name.
    #[serde(default = "default_keyprovider")]
    pub keyprovider: String,

    /// Issued-token lifetime in seconds.
    #[serde(default = "default_token_lifetime_secs")]
    pub lifetime_secs: u64,

    /// RSA key expectations.
    #[serde(default)]
    pub jwt: JwtSection,
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            backend: default_token_backend(),
            keyprovider: default_keyprovider(),
            lifetime_secs: default_token_lifetime_secs(),
            jwt: JwtSection::default(),
        }
    }
}

/// RSA modulus size expectation. Key material is provisioned offline; a
/// configuration that would require generating a missing keypair in
/// process fails with `KeyGenerationDisabled` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSection {
    #[serde(default = "default_jwt_bits")]
    pub bits: u32,

    /// When true, a missing keypair is a startup error instead of a
    /// verification-only degradation.
    #[serde(default)]
    pub require_keys: bool,
}

impl Default for JwtSection {
    fn default() -> Self {
        Self {
            bits: default_jwt_bits(),
            require_keys: false,
        }
    }
}

/// Process-wide serving switches.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerSection {
    /// Reject every mutating call with `ReadOnly` without consulting the
    /// tree.
    #[serde(default)]
    pub readonly: bool,
}

/// External hook plugin discovery. Loading is performed by out-of-process
/// tooling; the core only records the intent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PluginSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub path: PathBuf,
}

fn default_home() -> PathBuf {
    PathBuf::from("/var/lib/warden")
}

fn default_conf() -> PathBuf {
    PathBuf::from("/etc/warden")
}

fn default_db_backend() -> String {
    "filesystem".to_string()
}

fn default_crypto_backend() -> String {
    "bcrypt".to_string()
}

const fn default_bcrypt_cost() -> u32 {
    12
}

fn default_token_backend() -> String {
    "jwt-rsa".to_string()
}

fn default_keyprovider() -> String {
    "filesystem".to_string()
}

const fn default_token_lifetime_secs() -> u64 {
    600
}

const fn default_jwt_bits() -> u32 {
    2048
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
