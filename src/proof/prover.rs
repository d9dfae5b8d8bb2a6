//! Client-side half of the protocol.
//!
//! The server never runs this code; it lives here so the bundled client and
//! the test suites can drive a real prover.

use argon2::Argon2;
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::{ChaumPedersen, ProofError, PublicKey, Transcript};

const SECRET_DOMAIN: &[u8] = b"zkp-auth-v1-secret-";

/// A prover holding the secret exponent `x`.
pub struct Prover<'a> {
    engine: &'a ChaumPedersen,
    x: BigUint,
}

/// Nonce and commitments for one authentication attempt.
pub struct Commitment {
    k: BigUint,
    /// `g^k mod p`.
    pub r1: BigUint,
    /// `h^k mod p`.
    pub r2: BigUint,
}

impl<'a> Prover<'a> {
    /// Creates a prover for secret `x`.
    pub fn new(engine: &'a ChaumPedersen, x: BigUint) -> Self {
        Self { engine, x }
    }

    /// Creates a prover whose secret is derived from a password.
    pub fn from_password(
        engine: &'a ChaumPedersen,
        username: &str,
        password: &str,
    ) -> Result<Self, ProofError> {
        let x = secret_from_password(engine, username, password)?;
        Ok(Self::new(engine, x))
    }

    /// Enrollment public key `(g^x, h^x)`.
    pub fn public_key(&self) -> PublicKey {
        let (y1, y2) = self.engine.compute_commitments(&self.x);
        PublicKey::new(y1, y2)
    }

    /// First protocol message: fresh commitments for a random nonce.
    pub fn commit(&self) -> Commitment {
        let k = self.engine.random_exponent();
        let (r1, r2) = self.engine.compute_commitments(&k);
        Commitment { k, r1, r2 }
    }

    /// Third protocol message: the response to challenge `c`.
    pub fn respond(&self, commitment: &Commitment, c: &BigUint) -> BigUint {
        self.engine.solve_challenge(&commitment.k, c, &self.x)
    }

    /// Response for a transcript the verifier handed back.
    pub fn respond_to(&self, commitment: &Commitment, transcript: &Transcript) -> BigUint {
        self.respond(commitment, &transcript.c)
    }
}

/// Derives a secret exponent in `[1, q)` from a username and password.
///
/// The username, hashed with a domain tag, salts Argon2id so the same password
/// yields unrelated secrets for different users.
pub fn secret_from_password(
    engine: &ChaumPedersen,
    username: &str,
    password: &str,
) -> Result<BigUint, ProofError> {
    let mut hasher = Sha256::new();
    hasher.update(SECRET_DOMAIN);
    hasher.update(username.as_bytes());
    let salt = hasher.finalize();

    let mut output = Zeroizing::new([0u8; 64]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), &salt, &mut output[..])
        .map_err(|e| ProofError::Unavailable(format!("Password hashing failed: {e}")))?;

    let x = BigUint::from_bytes_be(&output[..]) % &engine.params().q;
    if x.is_zero() {
        return Err(ProofError::InvalidParams(
            "Password derived a zero secret".to_string(),
        ));
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::ProofEngine;

    #[test]
    fn password_secret_is_deterministic_per_user() {
        let engine = ChaumPedersen::rfc5114();
        let a = secret_from_password(&engine, "alice", "hunter2").unwrap();
        let b = secret_from_password(&engine, "alice", "hunter2").unwrap();
        let c = secret_from_password(&engine, "bob", "hunter2").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < engine.params().q);
    }

    #[test]
    fn prover_answers_issued_challenge() {
        let engine = ChaumPedersen::rfc5114();
        let prover = Prover::from_password(&engine, "alice", "correct horse").unwrap();
        let key = prover.public_key();

        let commitment = prover.commit();
        let transcript = engine
            .issue_challenge(commitment.r1.clone(), commitment.r2.clone())
            .unwrap();
        let s = prover.respond_to(&commitment, &transcript);

        assert!(engine.verify(&key, &transcript, &s).unwrap());

        let impostor = Prover::from_password(&engine, "alice", "wrong").unwrap();
        let s = impostor.respond_to(&commitment, &transcript);
        assert!(!engine.verify(&key, &transcript, &s).unwrap());
    }
}
