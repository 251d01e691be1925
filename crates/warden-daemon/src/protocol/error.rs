//! Protocol-level errors and the wire status mapping.
//!
//! The tree never converts error kinds; this module owns the ONLY
//! translation from [`warden_core::Error`] to wire statuses, so every
//! kind maps in exactly one place.

use std::io;

use warden_core::Error;

use super::messages::Status;

/// Maximum frame size in bytes (4 MiB). Enforced by the codec before
/// allocation so an oversized length prefix cannot exhaust memory.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Failures below the request layer: framing and transport.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame decode/encode failure.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing error.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The canonical wire status for an error kind.
#[must_use]
pub fn status_for(error: &Error) -> Status {
    match error {
        Error::DuplicateEntity
        | Error::DuplicateGroup
        | Error::DuplicateNumber
        | Error::ExistingExpansion => Status::AlreadyExists,

        Error::UnknownEntity | Error::UnknownGroup | Error::NoValue => Status::NotFound,

        // A capability tag is an argument, not a resource.
        Error::UnknownCapability | Error::MalformedRequest | Error::PathEscape => {
            Status::InvalidArgument
        }

        Error::AuthorizationFailure | Error::TokenInvalid => Status::Unauthenticated,

        Error::RequestorUnqualified => Status::PermissionDenied,

        Error::EntityLocked
        | Error::ReadOnly
        | Error::RuleCycle
        | Error::KeyUnavailable
        | Error::KeyGenerationDisabled => Status::FailedPrecondition,

        Error::Internal(_) => Status::Internal,

        _ => Status::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_deterministically() {
        assert_eq!(status_for(&Error::DuplicateEntity), Status::AlreadyExists);
        assert_eq!(status_for(&Error::UnknownGroup), Status::NotFound);
        assert_eq!(status_for(&Error::TokenInvalid), Status::Unauthenticated);
        assert_eq!(
            status_for(&Error::RequestorUnqualified),
            Status::PermissionDenied
        );
        assert_eq!(status_for(&Error::ReadOnly), Status::FailedPrecondition);
        assert_eq!(status_for(&Error::RuleCycle), Status::FailedPrecondition);
        assert_eq!(
            status_for(&Error::MalformedRequest),
            Status::InvalidArgument
        );
        assert_eq!(
            status_for(&Error::internal("boom")),
            Status::Internal
        );
    }
}
