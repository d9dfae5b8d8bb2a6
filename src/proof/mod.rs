//! Proof Engine contract for the interactive Chaum-Pedersen protocol.
//!
//! The session core never performs arithmetic on commitment values. It hands
//! them to a [`ProofEngine`], which issues challenges for a prover's
//! commitments and checks the prover's response against a stored transcript.

use num_bigint::BigUint;

/// Chaum-Pedersen engine over a prime-order subgroup of Z*p.
pub mod chaum_pedersen;
/// Standard group parameter sets.
pub mod groups;
/// Prover-side helpers used by clients.
pub mod prover;

pub use chaum_pedersen::ChaumPedersen;

/// Errors reported by a proof engine.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// Invalid group parameters were provided.
    #[error("Invalid group parameters: {0}")]
    InvalidParams(String),

    /// A value is not an element of the prime-order subgroup.
    #[error("Invalid group element: {0}")]
    InvalidElement(String),

    /// The engine could not complete the operation.
    #[error("Proof engine unavailable: {0}")]
    Unavailable(String),
}

/// A user's enrollment public key `(y1, y2) = (g^x, h^x)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicKey {
    /// Commitment to the secret under generator `g`.
    pub y1: BigUint,
    /// Commitment to the secret under generator `h`.
    pub y2: BigUint,
}

impl PublicKey {
    /// Creates a public key from its two commitments.
    pub fn new(y1: BigUint, y2: BigUint) -> Self {
        Self { y1, y2 }
    }
}

/// Values exchanged during one authentication attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transcript {
    /// Verifier challenge `c`.
    pub c: BigUint,
    /// Prover commitment `r1 = g^k`.
    pub r1: BigUint,
    /// Prover commitment `r2 = h^k`.
    pub r2: BigUint,
}

/// Capability the authentication core consumes to run the protocol.
///
/// Implementations must be cheap to share across tasks; verification may be
/// moved onto the blocking thread pool.
pub trait ProofEngine: Send + Sync + 'static {
    /// Checks that an enrollment key is well formed for this engine's group.
    fn validate_public_key(&self, key: &PublicKey) -> Result<(), ProofError>;

    /// Validates the prover's commitments and draws a fresh challenge for them.
    fn issue_challenge(&self, r1: BigUint, r2: BigUint) -> Result<Transcript, ProofError>;

    /// Checks the prover's response `s` against a stored transcript.
    ///
    /// `Ok(false)` is a rejection; `Err` means the check could not be run.
    fn verify(&self, key: &PublicKey, transcript: &Transcript, s: &BigUint)
        -> Result<bool, ProofError>;

    /// Maximum big-endian byte length of a group element.
    fn element_len(&self) -> usize;
}
