//! Token service interface.
//!
//! A token service signs and verifies claim bundles. Failure semantics
//! are precise and load-bearing:
//!
//! - "cannot sign" is [`Error::KeyUnavailable`] from `generate`
//! - "cannot verify" is [`Error::KeyUnavailable`] from `validate`
//! - "token invalid" is [`Error::TokenInvalid`] for any parse, signature,
//!   or temporal failure
//!
//! Backends register in a process-wide table and are selected by
//! `token.backend`.

mod jwt;

use std::sync::Arc;
use std::time::Duration;

pub use jwt::RsaTokenService;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};
use crate::keys::KeyProvider;
use crate::registry::Registry;

/// Claim bundle carried by a token.
///
/// `entity_id` and `capabilities` are the identity assertion; the rest
/// are the standard temporal fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Asserted entity identifier.
    #[serde(rename = "entityID")]
    pub entity_id: String,

    /// Capability tags held at issuance.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Issued-at, seconds since the epoch.
    #[serde(default)]
    pub iat: i64,

    /// Not-before, seconds since the epoch.
    #[serde(default)]
    pub nbf: i64,

    /// Expiry, seconds since the epoch.
    #[serde(default)]
    pub exp: i64,

    /// Issuer.
    #[serde(default)]
    pub iss: String,

    /// Subject; mirrors `entity_id`.
    #[serde(default)]
    pub sub: String,

    /// Audience.
    #[serde(default)]
    pub aud: String,

    /// Unique token identifier.
    #[serde(default)]
    pub jti: String,
}

impl Claims {
    /// A claim bundle asserting `entity_id` with `capabilities`;
    /// temporal fields are filled by the service at generation.
    #[must_use]
    pub fn identity(entity_id: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            capabilities,
            iat: 0,
            nbf: 0,
            exp: 0,
            iss: String::new(),
            sub: String::new(),
            aud: String::new(),
            jti: String::new(),
        }
    }

    /// True when the bundle asserts the given capability tag.
    #[must_use]
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

/// Generation-time parameters.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Token lifetime.
    pub lifetime: Duration,

    /// Issuer string stamped into `iss` and `aud`.
    pub issuer: String,

    /// Overrides the issued-at instant; `None` means now.
    pub issued_at: Option<i64>,

    /// Overrides not-before; `None` means issued-at.
    pub not_before: Option<i64>,
}

impl TokenConfig {
    /// The generation parameters implied by server configuration.
    #[must_use]
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            lifetime: Duration::from_secs(config.token.lifetime_secs),
            issuer: "warden".to_string(),
            issued_at: None,
            not_before: None,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(600),
            issuer: "warden".to_string(),
            issued_at: None,
            not_before: None,
        }
    }
}

/// Signs and verifies identity assertions.
pub trait TokenService: Send + Sync {
    /// Signs `claims`, filling the temporal fields from `config`.
    ///
    /// # Errors
    ///
    /// [`Error::KeyUnavailable`] when the signing key cannot be obtained.
    fn generate(&self, ctx: &OpContext, claims: Claims, config: &TokenConfig) -> Result<String>;

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// [`Error::TokenInvalid`] for parse/signature/temporal failure,
    /// [`Error::KeyUnavailable`] when no verification key is present,
    /// [`Error::Internal`] for transport-shaped decode failures.
    fn validate(&self, ctx: &OpContext, token: &str) -> Result<Claims>;
}

/// Factory signature for registered token backends.
pub type TokenFactory =
    fn(&ServerConfig, &dyn KeyProvider) -> Result<Arc<dyn TokenService>>;

/// Process-wide token backend table.
pub static SERVICES: Registry<TokenFactory> = Registry::new();

/// Instantiates the backend selected by `token.backend`.
///
/// # Errors
///
/// Returns [`Error::Internal`] for an unregistered backend name, or the
/// factory's own error.
pub fn from_config(
    config: &ServerConfig,
    provider: &dyn KeyProvider,
) -> Result<Arc<dyn TokenService>> {
    let factory = SERVICES.get(&config.token.backend).ok_or_else(|| {
        Error::internal(format!("unknown token backend {:?}", config.token.backend))
    })?;
    factory(config, provider)
}

/// Registers the built-in token backends.
pub fn register_builtin() {
    SERVICES.register("jwt-rsa", RsaTokenService::factory);
}
