//! Error types for the authentication core.
//!
//! These are the only errors that cross the protocol boundary. Store and
//! proof-engine failures are folded into this taxonomy by the `From` impls
//! below, which log internal detail and drop it from the returned value.

use tracing::{error, warn};

use crate::proof::ProofError;
use crate::store::StoreError;

/// Generic text reported for every failed authentication attempt.
pub const AUTHENTICATION_FAILED: &str = "Authentication failed";

/// Main error type for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The entity is absent or has expired. The two cases are deliberately
    /// indistinguishable so callers cannot enumerate challenges or sessions.
    #[error("Not found")]
    NotFound,

    /// A user with the requested username is already registered.
    #[error("User already registered")]
    DuplicateUser,

    /// A username, commitment or response value is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The session store cannot be reached or did not answer in time.
    #[error("Session store unavailable")]
    StoreUnavailable,

    /// The proof engine rejected the response. The challenge stays live.
    #[error("Verification failed")]
    VerificationFailed,

    /// The proof engine could not run the check. Retryable.
    #[error("Proof engine unavailable")]
    EngineUnavailable,

    /// The store returned data that could not be decoded.
    #[error("Internal error")]
    Internal,
}

impl Error {
    /// Returns true for transient infrastructure failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable | Error::EngineUnavailable)
    }

    /// Returns true when the error belongs to the "authentication failed" class.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::NotFound | Error::VerificationFailed)
    }

    /// Message safe to show to an unauthenticated caller.
    ///
    /// Not-found and rejected proofs collapse into one message so a caller
    /// cannot tell which sub-check failed.
    pub fn public_message(&self) -> String {
        match self {
            Error::NotFound | Error::VerificationFailed => AUTHENTICATION_FAILED.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Error::NotFound,
            StoreError::DuplicateUser => Error::DuplicateUser,
            StoreError::InvalidInput(msg) => Error::InvalidInput(msg),
            StoreError::Corrupt { field, reason } => {
                error!(field, %reason, "Session store returned undecodable data");
                Error::Internal
            }
            StoreError::Database(e) => {
                warn!(error = %e, "Session store operation failed");
                Error::StoreUnavailable
            }
            StoreError::Migrate(e) => {
                error!(error = %e, "Session store migration failed");
                Error::StoreUnavailable
            }
        }
    }
}

impl From<ProofError> for Error {
    fn from(err: ProofError) -> Self {
        match err {
            ProofError::InvalidElement(msg) => Error::InvalidInput(msg),
            ProofError::InvalidParams(msg) => {
                error!(%msg, "Proof engine misconfigured");
                Error::EngineUnavailable
            }
            ProofError::Unavailable(msg) => {
                warn!(%msg, "Proof engine unavailable");
                Error::EngineUnavailable
            }
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_share_one_message() {
        assert_eq!(Error::NotFound.public_message(), AUTHENTICATION_FAILED);
        assert_eq!(
            Error::VerificationFailed.public_message(),
            AUTHENTICATION_FAILED
        );
        assert_ne!(Error::DuplicateUser.public_message(), AUTHENTICATION_FAILED);
    }

    #[test]
    fn database_errors_do_not_leak() {
        let err: Error = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, Error::StoreUnavailable));
        assert!(err.is_retryable());
        assert!(!err.to_string().contains("pool"));
    }

    #[test]
    fn corrupt_rows_are_internal() {
        let err: Error = StoreError::Corrupt {
            field: "y1",
            reason: "not a decimal integer".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Internal));
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_elements_become_invalid_input() {
        let err: Error = ProofError::InvalidElement("r1 out of range".to_string()).into();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
