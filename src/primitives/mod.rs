//! Randomness shared by the proof engine and the session store.

/// Cryptographically secure randomness and opaque token generation.
pub mod rng;

pub use rng::{random_token, SecureRng, TOKEN_BYTES};
