//! Secret hashing interface and backends.
//!
//! The tree stores only the opaque string a backend hands back from
//! [`Crypto::secure_secret`]; plaintext travels as
//! [`secrecy::SecretString`] and is exposed exactly once, at the hashing
//! boundary. Verification failure is [`Error::AuthorizationFailure`]
//! regardless of the underlying cause, so callers cannot distinguish
//! "wrong secret" from "unparseable stored hash".

mod bcrypt;

use std::sync::Arc;

pub use self::bcrypt::BcryptEngine;
use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};
use crate::registry::Registry;
use secrecy::SecretString;

/// One-way secret hashing and verification.
pub trait Crypto: Send + Sync {
    /// Hashes `plain` into the stored representation.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when hashing fails.
    fn secure_secret(&self, ctx: &OpContext, plain: &SecretString) -> Result<String>;

    /// Verifies `candidate` against a previously stored hash.
    ///
    /// # Errors
    ///
    /// [`Error::AuthorizationFailure`] on mismatch or undecodable hash.
    fn verify_secret(&self, ctx: &OpContext, candidate: &SecretString, stored: &str) -> Result<()>;
}

/// Factory signature for registered crypto backends.
pub type CryptoFactory = fn(&ServerConfig) -> Result<Arc<dyn Crypto>>;

/// Process-wide crypto backend table.
pub static ENGINES: Registry<CryptoFactory> = Registry::new();

/// Instantiates the backend selected by `crypto.backend`.
///
/// # Errors
///
/// Returns [`Error::Internal`] for an unregistered backend name.
pub fn from_config(config: &ServerConfig) -> Result<Arc<dyn Crypto>> {
    let factory = ENGINES.get(&config.crypto.backend).ok_or_else(|| {
        Error::internal(format!(
            "unknown crypto backend {:?}",
            config.crypto.backend
        ))
    })?;
    factory(config)
}

/// Registers the built-in crypto backends.
pub fn register_builtin() {
    ENGINES.register("bcrypt", BcryptEngine::factory);
}
