//! Key material providers.
//!
//! A provider fetches labeled key material by `(mechanism, usecase)`,
//! e.g. `("rsa", "public")`. Providers hand back raw bytes; PEM parsing
//! and rejection happens in the consumer (the token service). The
//! provider-level error distinguishes "no such key" from genuine I/O so
//! the token layer can degrade to verification-only mode.

mod filesystem;

use std::sync::Arc;

pub use filesystem::FilesystemKeys;

use crate::config::ServerConfig;
use crate::errors::Error;
use crate::registry::Registry;

/// Provider-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyProviderError {
    /// No key material exists for the requested label.
    #[error("no key for ({mechanism}, {usecase})")]
    NoSuchKey {
        mechanism: String,
        usecase: String,
    },

    /// The provider failed to read existing material.
    #[error("key provider failure: {0}")]
    Internal(String),
}

/// Fetches labeled key material.
pub trait KeyProvider: Send + Sync {
    /// Returns the bytes registered under `(mechanism, usecase)`.
    ///
    /// # Errors
    ///
    /// [`KeyProviderError::NoSuchKey`] when the label has no material;
    /// [`KeyProviderError::Internal`] for read failures.
    fn provide(&self, mechanism: &str, usecase: &str) -> Result<Vec<u8>, KeyProviderError>;
}

/// Factory signature for registered key providers.
pub type KeyProviderFactory =
    fn(&ServerConfig) -> Result<Arc<dyn KeyProvider>, crate::errors::Error>;

/// Process-wide key provider table.
pub static PROVIDERS: Registry<KeyProviderFactory> = Registry::new();

/// Instantiates the provider selected by `token.keyprovider`.
///
/// # Errors
///
/// Returns [`Error::Internal`] for an unregistered provider name.
pub fn from_config(config: &ServerConfig) -> Result<Arc<dyn KeyProvider>, Error> {
    let factory = PROVIDERS.get(&config.token.keyprovider).ok_or_else(|| {
        Error::internal(format!(
            "unknown key provider {:?}",
            config.token.keyprovider
        ))
    })?;
    factory(config)
}

/// Registers the built-in key providers.
pub fn register_builtin() {
    PROVIDERS.register("filesystem", FilesystemKeys::factory);
}
