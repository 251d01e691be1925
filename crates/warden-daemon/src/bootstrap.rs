//! One-shot GLOBAL_ROOT bootstrap.
//!
//! Grants `GLOBAL_ROOT` to a named entity exactly once per process
//! lifetime, from an out-of-band startup path (never over the wire).
//! Once exercised (or explicitly disabled) the gate never reopens.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;
use warden_core::context::OpContext;
use warden_core::errors::{Error, Result};
use warden_core::tree::Tree;

/// The one-shot bootstrap gate.
pub struct Bootstrapper {
    used: AtomicBool,
}

impl Bootstrapper {
    /// A fresh, armed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            used: AtomicBool::new(false),
        }
    }

    /// Permanently closes the gate without exercising it.
    pub fn disable(&self) {
        self.used.store(true, Ordering::Release);
    }

    /// Whether the gate has been exercised or disabled.
    #[must_use]
    pub fn spent(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// Exercises the gate: parses `"entity:secret"`, creates the
    /// entity if missing (verifying the secret if it exists), and
    /// grants `GLOBAL_ROOT` directly.
    ///
    /// # Errors
    ///
    /// - [`Error::Internal`] when the gate was already spent
    /// - [`Error::MalformedRequest`] for a spec without a colon
    /// - [`Error::AuthorizationFailure`] when the entity exists and
    ///   the supplied secret does not verify
    pub fn bootstrap(&self, ctx: &OpContext, tree: &Tree, spec: &str) -> Result<()> {
        if self.used.swap(true, Ordering::AcqRel) {
            return Err(Error::internal("bootstrap already exercised"));
        }
        let (id, secret) = spec.split_once(':').ok_or(Error::MalformedRequest)?;
        if id.is_empty() {
            return Err(Error::MalformedRequest);
        }

        match tree.fetch_entity(ctx, id) {
            Ok(_) => tree.validate_entity_secret(ctx, id, secret)?,
            Err(Error::UnknownEntity) => tree.create_entity(ctx, id, -1, secret)?,
            Err(e) => return Err(e),
        }
        tree.set_entity_capability(ctx, id, "GLOBAL_ROOT")?;
        info!(entity = id, "bootstrap granted GLOBAL_ROOT; gate closed");
        Ok(())
    }
}

impl Default for Bootstrapper {
    fn default() -> Self {
        Self::new()
    }
}
