//! bcrypt key-stretching backend.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use super::Crypto;
use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};

/// bcrypt-backed [`Crypto`] engine. Cost is fixed at construction.
pub struct BcryptEngine {
    cost: u32,
}

impl BcryptEngine {
    /// Creates an engine with the given cost factor.
    #[must_use]
    pub const fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Registered factory for the `bcrypt` backend; reads
    /// `crypto.bcrypt.cost`.
    ///
    /// # Errors
    ///
    /// Infallible; the cost range is validated at config load.
    pub fn factory(config: &ServerConfig) -> Result<Arc<dyn Crypto>> {
        Ok(Arc::new(Self::new(config.crypto.bcrypt.cost)))
    }
}

impl Crypto for BcryptEngine {
    fn secure_secret(&self, ctx: &OpContext, plain: &SecretString) -> Result<String> {
        ctx.check()?;
        ::bcrypt::hash(plain.expose_secret(), self.cost)
            .map_err(|e| Error::internal(format!("bcrypt hash failed: {e}")))
    }

    fn verify_secret(&self, ctx: &OpContext, candidate: &SecretString, stored: &str) -> Result<()> {
        ctx.check()?;
        match ::bcrypt::verify(candidate.expose_secret(), stored) {
            Ok(true) => Ok(()),
            // A stored hash that fails to parse is indistinguishable from
            // a mismatch to the caller.
            Ok(false) | Err(_) => Err(Error::AuthorizationFailure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // MIN_COST keeps the suite fast; production cost comes from config.
    const TEST_COST: u32 = 4;

    #[test]
    fn hash_then_verify() {
        let engine = BcryptEngine::new(TEST_COST);
        let ctx = OpContext::background();
        let stored = engine
            .secure_secret(&ctx, &SecretString::from("s3cret".to_string()))
            .unwrap();

        assert!(!stored.contains("s3cret"));
        assert!(engine
            .verify_secret(&ctx, &SecretString::from("s3cret".to_string()), &stored)
            .is_ok());
    }

    #[test]
    fn wrong_secret_is_authorization_failure() {
        let engine = BcryptEngine::new(TEST_COST);
        let ctx = OpContext::background();
        let stored = engine
            .secure_secret(&ctx, &SecretString::from("s3cret".to_string()))
            .unwrap();

        assert_eq!(
            engine.verify_secret(&ctx, &SecretString::from("wrong".to_string()), &stored),
            Err(Error::AuthorizationFailure)
        );
    }

    #[test]
    fn garbage_stored_hash_is_authorization_failure() {
        let engine = BcryptEngine::new(TEST_COST);
        let ctx = OpContext::background();
        assert_eq!(
            engine.verify_secret(
                &ctx,
                &SecretString::from("s3cret".to_string()),
                "not-a-bcrypt-hash"
            ),
            Err(Error::AuthorizationFailure)
        );
    }

    #[test]
    fn same_secret_hashes_differently() {
        let engine = BcryptEngine::new(TEST_COST);
        let ctx = OpContext::background();
        let a = engine
            .secure_secret(&ctx, &SecretString::from("s3cret".to_string()))
            .unwrap();
        let b = engine
            .secure_secret(&ctx, &SecretString::from("s3cret".to_string()))
            .unwrap();
        assert_ne!(a, b);
    }
}
