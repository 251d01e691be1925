//! Shared fixtures for daemon integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use warden_core::crypto::BcryptEngine;
use warden_core::health::HealthRegistry;
use warden_core::keys::{KeyProvider, KeyProviderError};
use warden_core::kv::MemoryStore;
use warden_core::token::{Claims, RsaTokenService, TokenConfig, TokenService};
use warden_core::tree::Tree;
use warden_core::OpContext;
use warden_daemon::protocol::messages::{WireRequest, wire_request};
use warden_daemon::Dispatcher;

pub const RSA_PRIVATE: &str = include_str!("keys/rsa-private.tokenkey");
pub const RSA_PUBLIC: &str = include_str!("keys/rsa-public.tokenkey");

/// Serves the test keypair from memory.
pub struct StaticKeys;

impl KeyProvider for StaticKeys {
    fn provide(&self, mechanism: &str, usecase: &str) -> Result<Vec<u8>, KeyProviderError> {
        match (mechanism, usecase) {
            ("rsa", "private") => Ok(RSA_PRIVATE.as_bytes().to_vec()),
            ("rsa", "public") => Ok(RSA_PUBLIC.as_bytes().to_vec()),
            _ => Err(KeyProviderError::NoSuchKey {
                mechanism: mechanism.to_string(),
                usecase: usecase.to_string(),
            }),
        }
    }
}

/// One assembled server, minus the socket.
pub struct Fixture {
    pub dispatcher: Arc<Dispatcher>,
    pub tree: Arc<Tree>,
    pub tokens: Arc<dyn TokenService>,
}

/// Token generation parameters used across the suite.
pub fn token_config() -> TokenConfig {
    TokenConfig {
        lifetime: Duration::from_secs(300),
        issuer: "warden-test".to_string(),
        issued_at: None,
        not_before: None,
    }
}

/// Builds a dispatcher over a fresh in-memory store.
pub fn fixture(readonly: bool) -> Fixture {
    fixture_with(readonly, |_| {})
}

/// Same, with a chance to register hooks before the tree freezes.
pub fn fixture_with(readonly: bool, customize: impl FnOnce(&mut Tree)) -> Fixture {
    let mut tree = Tree::new(
        Arc::new(MemoryStore::new()),
        Arc::new(BcryptEngine::new(4)),
    )
    .expect("fresh tree");
    customize(&mut tree);
    let tree = Arc::new(tree);

    let tokens: Arc<dyn TokenService> =
        Arc::new(RsaTokenService::from_provider(&StaticKeys).expect("token service"));

    let health = Arc::new(HealthRegistry::new());
    {
        let probe = Arc::clone(&tree);
        health.register_fn("kv", move || probe.search_entities("*").is_ok());
    }

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&tree),
        Arc::clone(&tokens),
        token_config(),
        health,
        readonly,
    ));

    Fixture {
        dispatcher,
        tree,
        tokens,
    }
}

/// Mints a token asserting `entity` with the given capability tags.
/// Tests mint directly instead of round-tripping AuthGetToken so an
/// authorization test cannot depend on the code path it verifies.
pub fn mint_token(fixture: &Fixture, entity: &str, capabilities: &[&str]) -> String {
    fixture
        .tokens
        .generate(
            &OpContext::background(),
            Claims::identity(
                entity,
                capabilities.iter().map(|c| (*c).to_string()).collect(),
            ),
            &token_config(),
        )
        .expect("token generation")
}

/// Wraps a body into an envelope.
pub fn request(token: &str, body: wire_request::Body) -> WireRequest {
    WireRequest {
        request_id: 1,
        token: token.to_string(),
        body: Some(body),
    }
}
