//! RS256 JWT token backend.
//!
//! Keys arrive from the key provider labeled `("rsa", "private")` and
//! `("rsa", "public")`. Either side may be absent: a verification-only
//! deployment carries just the public key and `generate` fails with
//! `KeyUnavailable`.
//!
//! The signing algorithm header is pinned to RS256 at validation. A token
//! whose header declares any other algorithm is rejected outright, even
//! when syntactically well formed; this closes the classic
//! algorithm-confusion hole.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use super::{Claims, TokenConfig, TokenService};
use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};
use crate::keys::{KeyProvider, KeyProviderError};

/// RSA-signed JWT issuer/validator.
pub struct RsaTokenService {
    encoding: Option<EncodingKey>,
    decoding: Option<DecodingKey>,
    validation: Validation,
    serial: AtomicU64,
}

impl RsaTokenService {
    /// Builds a service from provider-supplied PEM material.
    ///
    /// Missing keys degrade the corresponding operation; material that is
    /// present but unparseable is refused here so a misprovisioned server
    /// fails at startup rather than per request.
    ///
    /// # Errors
    ///
    /// [`Error::KeyUnavailable`] when neither key is available or a
    /// present key fails its PEM parse; [`Error::Internal`] for provider
    /// I/O failures.
    pub fn from_provider(provider: &dyn KeyProvider) -> Result<Self> {
        let encoding = match provider.provide("rsa", "private") {
            Ok(pem) => Some(EncodingKey::from_rsa_pem(&pem).map_err(|e| {
                tracing::error!(error = %e, "signing key present but unparseable");
                Error::KeyUnavailable
            })?),
            Err(KeyProviderError::NoSuchKey { .. }) => None,
            Err(KeyProviderError::Internal(msg)) => return Err(Error::internal(msg)),
        };
        let decoding = match provider.provide("rsa", "public") {
            Ok(pem) => Some(DecodingKey::from_rsa_pem(&pem).map_err(|e| {
                tracing::error!(error = %e, "verification key present but unparseable");
                Error::KeyUnavailable
            })?),
            Err(KeyProviderError::NoSuchKey { .. }) => None,
            Err(KeyProviderError::Internal(msg)) => return Err(Error::internal(msg)),
        };

        if encoding.is_none() && decoding.is_none() {
            return Err(Error::KeyUnavailable);
        }
        if encoding.is_none() {
            tracing::info!("no signing key; running verification-only");
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.validate_aud = false;

        Ok(Self {
            encoding,
            decoding,
            validation,
            serial: AtomicU64::new(0),
        })
    }

    /// Registered factory for the `jwt-rsa` backend.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::from_provider`], plus
    /// [`Error::KeyGenerationDisabled`] when configuration demands a
    /// keypair this build will not generate.
    pub fn factory(
        config: &ServerConfig,
        provider: &dyn KeyProvider,
    ) -> Result<Arc<dyn TokenService>> {
        match Self::from_provider(provider) {
            Ok(service) => Ok(Arc::new(service)),
            Err(Error::KeyUnavailable) if config.token.jwt.require_keys => {
                // Key material is provisioned offline; refusing here beats
                // silently minting an ephemeral keypair nobody can verify.
                Err(Error::KeyGenerationDisabled)
            }
            Err(e) => Err(e),
        }
    }
}

impl TokenService for RsaTokenService {
    fn generate(&self, ctx: &OpContext, claims: Claims, config: &TokenConfig) -> Result<String> {
        ctx.check()?;
        let Some(encoding) = self.encoding.as_ref() else {
            return Err(Error::KeyUnavailable);
        };

        let issued_at = config
            .issued_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        let lifetime = i64::try_from(config.lifetime.as_secs())
            .map_err(|_| Error::internal("token lifetime out of range"))?;
        let serial = self.serial.fetch_add(1, Ordering::SeqCst);

        let claims = Claims {
            sub: claims.entity_id.clone(),
            iat: issued_at,
            nbf: config.not_before.unwrap_or(issued_at),
            exp: issued_at + lifetime,
            iss: config.issuer.clone(),
            aud: config.issuer.clone(),
            jti: format!("{}-{issued_at}-{serial}", claims.entity_id),
            ..claims
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, encoding)
            .map_err(|e| Error::internal(format!("token encoding failed: {e}")))
    }

    fn validate(&self, ctx: &OpContext, token: &str) -> Result<Claims> {
        ctx.check()?;
        let Some(decoding) = self.decoding.as_ref() else {
            return Err(Error::KeyUnavailable);
        };

        match jsonwebtoken::decode::<Claims>(token, decoding, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                // Transport-shaped decode failures are not a verdict on
                // the token's authenticity.
                JwtErrorKind::Base64(_) | JwtErrorKind::Json(_) | JwtErrorKind::Utf8(_) => {
                    Err(Error::internal(format!("token transport decode: {e}")))
                }
                _ => Err(Error::TokenInvalid),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const RSA_PRIVATE: &str = include_str!("testdata/rsa-private.tokenkey");
    const RSA_PUBLIC: &str = include_str!("testdata/rsa-public.tokenkey");
    const OTHER_PRIVATE: &str = include_str!("testdata/other-private.tokenkey");

    /// Provider fixture serving from a map of labels.
    struct StaticKeys {
        private: Option<&'static str>,
        public: Option<&'static str>,
    }

    impl KeyProvider for StaticKeys {
        fn provide(&self, mechanism: &str, usecase: &str) -> std::result::Result<Vec<u8>, KeyProviderError> {
            let material = match (mechanism, usecase) {
                ("rsa", "private") => self.private,
                ("rsa", "public") => self.public,
                _ => None,
            };
            material
                .map(|pem| pem.as_bytes().to_vec())
                .ok_or_else(|| KeyProviderError::NoSuchKey {
                    mechanism: mechanism.to_string(),
                    usecase: usecase.to_string(),
                })
        }
    }

    fn full_service() -> RsaTokenService {
        RsaTokenService::from_provider(&StaticKeys {
            private: Some(RSA_PRIVATE),
            public: Some(RSA_PUBLIC),
        })
        .unwrap()
    }

    fn five_minutes() -> TokenConfig {
        TokenConfig {
            lifetime: Duration::from_secs(300),
            issuer: "warden-test".to_string(),
            issued_at: None,
            not_before: None,
        }
    }

    #[test]
    fn roundtrip_preserves_identity_claims() {
        let service = full_service();
        let ctx = OpContext::background();
        let token = service
            .generate(
                &ctx,
                Claims::identity("e1", vec!["CREATE_ENTITY".to_string()]),
                &five_minutes(),
            )
            .unwrap();

        let claims = service.validate(&ctx, &token).unwrap();
        assert_eq!(claims.entity_id, "e1");
        assert_eq!(claims.capabilities, vec!["CREATE_ENTITY".to_string()]);
        assert_eq!(claims.sub, "e1");
        assert_eq!(claims.iss, "warden-test");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_invalid() {
        let service = full_service();
        let ctx = OpContext::background();
        // Issued six minutes ago with a five minute lifetime.
        let config = TokenConfig {
            issued_at: Some(chrono::Utc::now().timestamp() - 360),
            ..five_minutes()
        };
        let token = service
            .generate(&ctx, Claims::identity("e1", Vec::new()), &config)
            .unwrap();

        assert_eq!(service.validate(&ctx, &token), Err(Error::TokenInvalid));
    }

    #[test]
    fn not_yet_valid_token_is_invalid() {
        let service = full_service();
        let ctx = OpContext::background();
        let config = TokenConfig {
            not_before: Some(chrono::Utc::now().timestamp() + 3600),
            ..five_minutes()
        };
        let token = service
            .generate(&ctx, Claims::identity("e1", Vec::new()), &config)
            .unwrap();

        assert_eq!(service.validate(&ctx, &token), Err(Error::TokenInvalid));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let signer = RsaTokenService::from_provider(&StaticKeys {
            private: Some(OTHER_PRIVATE),
            public: None,
        })
        .unwrap();
        let verifier = full_service();
        let ctx = OpContext::background();

        let token = signer
            .generate(&ctx, Claims::identity("e1", Vec::new()), &five_minutes())
            .unwrap();
        assert_eq!(verifier.validate(&ctx, &token), Err(Error::TokenInvalid));
    }

    #[test]
    fn algorithm_confusion_is_rejected() {
        let service = full_service();
        let ctx = OpContext::background();

        // Well-formed HS256 token; the header alone must sink it.
        let claims = Claims {
            iat: chrono::Utc::now().timestamp(),
            nbf: chrono::Utc::now().timestamp(),
            exp: chrono::Utc::now().timestamp() + 300,
            ..Claims::identity("e1", Vec::new())
        };
        let hs256 = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"guessable"),
        )
        .unwrap();

        assert_eq!(service.validate(&ctx, &hs256), Err(Error::TokenInvalid));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let service = full_service();
        let ctx = OpContext::background();
        assert_eq!(
            service.validate(&ctx, "not-a-token"),
            Err(Error::TokenInvalid)
        );
    }

    #[test]
    fn verification_only_serves_validate_but_not_generate() {
        let full = full_service();
        let verify_only = RsaTokenService::from_provider(&StaticKeys {
            private: None,
            public: Some(RSA_PUBLIC),
        })
        .unwrap();
        let ctx = OpContext::background();

        assert_eq!(
            verify_only.generate(&ctx, Claims::identity("e1", Vec::new()), &five_minutes()),
            Err(Error::KeyUnavailable)
        );

        let token = full
            .generate(&ctx, Claims::identity("e1", Vec::new()), &five_minutes())
            .unwrap();
        assert_eq!(
            verify_only.validate(&ctx, &token).unwrap().entity_id,
            "e1"
        );
    }

    #[test]
    fn signing_only_cannot_validate() {
        let sign_only = RsaTokenService::from_provider(&StaticKeys {
            private: Some(RSA_PRIVATE),
            public: None,
        })
        .unwrap();
        let ctx = OpContext::background();
        assert_eq!(
            sign_only.validate(&ctx, "whatever"),
            Err(Error::KeyUnavailable)
        );
    }

    #[test]
    fn no_keys_at_all_is_unavailable() {
        let result = RsaTokenService::from_provider(&StaticKeys {
            private: None,
            public: None,
        });
        assert!(matches!(result, Err(Error::KeyUnavailable)));
    }

    #[test]
    fn require_keys_maps_to_generation_disabled() {
        let mut config = ServerConfig::default();
        config.token.jwt.require_keys = true;
        let result = RsaTokenService::factory(
            &config,
            &StaticKeys {
                private: None,
                public: None,
            },
        );
        assert!(matches!(result, Err(Error::KeyGenerationDisabled)));
    }

    #[test]
    fn jti_is_unique_per_token() {
        let service = full_service();
        let ctx = OpContext::background();
        let a = service
            .generate(&ctx, Claims::identity("e1", Vec::new()), &five_minutes())
            .unwrap();
        let b = service
            .generate(&ctx, Claims::identity("e1", Vec::new()), &five_minutes())
            .unwrap();
        assert_eq!(service.validate(&ctx, &a).unwrap().entity_id, "e1");
        assert_ne!(
            service.validate(&ctx, &a).unwrap().jti,
            service.validate(&ctx, &b).unwrap().jti
        );
    }
}
