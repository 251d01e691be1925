//! The uniform error surface shared by every tree operation.
//!
//! Every externally visible operation in this crate reports one of the
//! kinds below. The tree never converts one kind into another: an error
//! produced deep in a hook chain travels to the caller unchanged, and the
//! daemon's protocol layer performs the only translation (to wire status
//! codes).
//!
//! The kinds are disjoint by construction:
//!
//! - **Uniqueness**: [`DuplicateEntity`](Error::DuplicateEntity),
//!   [`DuplicateGroup`](Error::DuplicateGroup),
//!   [`DuplicateNumber`](Error::DuplicateNumber),
//!   [`ExistingExpansion`](Error::ExistingExpansion)
//! - **Existence**: [`UnknownEntity`](Error::UnknownEntity),
//!   [`UnknownGroup`](Error::UnknownGroup),
//!   [`UnknownCapability`](Error::UnknownCapability),
//!   [`NoValue`](Error::NoValue)
//! - **Authentication**: [`AuthorizationFailure`](Error::AuthorizationFailure),
//!   [`TokenInvalid`](Error::TokenInvalid),
//!   [`KeyUnavailable`](Error::KeyUnavailable)
//! - **Authorization**: [`RequestorUnqualified`](Error::RequestorUnqualified)
//! - **State**: [`EntityLocked`](Error::EntityLocked),
//!   [`ReadOnly`](Error::ReadOnly), [`RuleCycle`](Error::RuleCycle),
//!   [`PathEscape`](Error::PathEscape)
//! - **Shape**: [`MalformedRequest`](Error::MalformedRequest)
//! - **Interior**: [`Internal`](Error::Internal),
//!   [`KeyGenerationDisabled`](Error::KeyGenerationDisabled)
//!
//! Fault strings never carry secret material.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The uniform error surface of the directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An entity with the requested ID already exists.
    #[error("entity already exists")]
    DuplicateEntity,

    /// A group with the requested name already exists.
    #[error("group already exists")]
    DuplicateGroup,

    /// The requested number is already assigned or reserved.
    #[error("number is already in use or reserved")]
    DuplicateNumber,

    /// The named entity does not exist.
    #[error("entity does not exist")]
    UnknownEntity,

    /// The named group does not exist.
    #[error("group does not exist")]
    UnknownGroup,

    /// The capability tag is not part of the closed enumeration.
    #[error("unknown capability")]
    UnknownCapability,

    /// The key has no value in the store.
    #[error("no value for key")]
    NoValue,

    /// Secret verification failed.
    #[error("authorization failure")]
    AuthorizationFailure,

    /// The token failed parse, signature, or temporal validation.
    #[error("token is invalid")]
    TokenInvalid,

    /// The required signing or verification key could not be obtained.
    #[error("key unavailable")]
    KeyUnavailable,

    /// The requestor holds neither the required capability nor a
    /// delegation that covers the operation.
    #[error("requestor is not qualified")]
    RequestorUnqualified,

    /// The entity is administratively locked.
    #[error("entity is locked")]
    EntityLocked,

    /// The server is running in read-only mode.
    #[error("server is read-only")]
    ReadOnly,

    /// The rule edit would introduce a cycle in the expansion graph.
    #[error("rule would create a cycle")]
    RuleCycle,

    /// A rule of the opposite kind already exists for the target.
    #[error("an expansion already exists for the target group")]
    ExistingExpansion,

    /// The key would escape the storage root.
    #[error("key escapes the storage root")]
    PathEscape,

    /// The request is structurally invalid.
    #[error("malformed request")]
    MalformedRequest,

    /// In-process key generation is not available in this build.
    #[error("key generation is disabled")]
    KeyGenerationDisabled,

    /// An interior failure; the message is safe to log.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::Internal`] with a formatted message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_never_leaks_payloads() {
        // Fixed-kind variants render fixed strings.
        assert_eq!(Error::DuplicateEntity.to_string(), "entity already exists");
        assert_eq!(Error::TokenInvalid.to_string(), "token is invalid");
        assert_eq!(Error::ReadOnly.to_string(), "server is read-only");
    }

    #[test]
    fn internal_carries_context() {
        let err = Error::internal("store closed");
        assert_eq!(err.to_string(), "internal error: store closed");
    }

    #[test]
    fn kinds_are_comparable() {
        assert_eq!(Error::UnknownEntity, Error::UnknownEntity);
        assert_ne!(Error::UnknownEntity, Error::UnknownGroup);
    }
}
