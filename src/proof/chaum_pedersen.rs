use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};

use super::groups::GroupParams;
use super::{ProofEngine, ProofError, PublicKey, Transcript};
use crate::primitives::SecureRng;

/// Interactive Chaum-Pedersen protocol over a prime-order subgroup of Z*p.
///
/// Proves knowledge of `x` such that `y1 = g^x` and `y2 = h^x` without
/// revealing `x`:
///
/// 1. Prover sends `r1 = g^k`, `r2 = h^k` for a random nonce `k`.
/// 2. Verifier answers with a random challenge `c` in `[0, q)`.
/// 3. Prover sends `s = (k - c * x) mod q`.
/// 4. Verifier accepts iff `r1 = g^s * y1^c` and `r2 = h^s * y2^c` (mod p).
#[derive(Clone, Debug)]
pub struct ChaumPedersen {
    params: GroupParams,
}

impl ChaumPedersen {
    /// Creates an engine from explicit group parameters.
    ///
    /// Both generators must be distinct non-identity elements of order `q`.
    pub fn new(params: GroupParams) -> Result<Self, ProofError> {
        let GroupParams { p, q, g, h } = &params;

        if p <= &BigUint::from(3u32) || q.is_zero() || q >= p {
            return Err(ProofError::InvalidParams(
                "Modulus and order are out of range".to_string(),
            ));
        }

        if !(&(p - 1u32) % q).is_zero() {
            return Err(ProofError::InvalidParams(
                "Subgroup order does not divide p - 1".to_string(),
            ));
        }

        for (name, gen) in [("g", g), ("h", h)] {
            if gen <= &BigUint::one() || gen >= p || !gen.modpow(q, p).is_one() {
                return Err(ProofError::InvalidParams(format!(
                    "Generator {name} is not an element of order q"
                )));
            }
        }

        if g == h {
            return Err(ProofError::InvalidParams(
                "Generators g and h must differ".to_string(),
            ));
        }

        Ok(Self { params })
    }

    /// Engine over the RFC 5114 2048-bit group.
    pub fn rfc5114() -> Self {
        Self {
            params: GroupParams::rfc5114(),
        }
    }

    /// Returns the group parameters.
    pub fn params(&self) -> &GroupParams {
        &self.params
    }

    /// Computes `(g^e, h^e)`. Used for both public keys and commitments.
    pub fn compute_commitments(&self, e: &BigUint) -> (BigUint, BigUint) {
        let GroupParams { p, g, h, .. } = &self.params;
        (g.modpow(e, p), h.modpow(e, p))
    }

    /// Draws a uniformly random non-zero exponent in `[1, q)`.
    pub fn random_exponent(&self) -> BigUint {
        let mut rng = SecureRng::new();
        rng.gen_biguint_range(&BigUint::one(), &self.params.q)
    }

    /// Computes the prover response `s = (k - c * x) mod q`.
    pub fn solve_challenge(&self, k: &BigUint, c: &BigUint, x: &BigUint) -> BigUint {
        let q = &self.params.q;
        let cx = (c * x) % q;
        ((k % q) + q - cx) % q
    }

    fn validate_element(&self, name: &str, e: &BigUint) -> Result<(), ProofError> {
        let GroupParams { p, q, .. } = &self.params;

        if e.is_zero() || e >= p {
            return Err(ProofError::InvalidElement(format!("{name} is out of range")));
        }

        if !e.modpow(q, p).is_one() {
            return Err(ProofError::InvalidElement(format!(
                "{name} is not in the prime-order subgroup"
            )));
        }

        Ok(())
    }
}

impl ProofEngine for ChaumPedersen {
    fn validate_public_key(&self, key: &PublicKey) -> Result<(), ProofError> {
        self.validate_element("y1", &key.y1)?;
        self.validate_element("y2", &key.y2)?;

        if key.y1.is_one() || key.y2.is_one() {
            return Err(ProofError::InvalidElement(
                "Public key contains identity elements".to_string(),
            ));
        }

        Ok(())
    }

    fn issue_challenge(&self, r1: BigUint, r2: BigUint) -> Result<Transcript, ProofError> {
        self.validate_element("r1", &r1)?;
        self.validate_element("r2", &r2)?;

        let mut rng = SecureRng::new();
        let c = rng.gen_biguint_below(&self.params.q);

        Ok(Transcript { c, r1, r2 })
    }

    fn verify(
        &self,
        key: &PublicKey,
        transcript: &Transcript,
        s: &BigUint,
    ) -> Result<bool, ProofError> {
        let GroupParams { p, q, g, h } = &self.params;

        if s >= q {
            return Ok(false);
        }

        // r1 == g^s * y1^c (mod p)
        let rhs1 = (g.modpow(s, p) * key.y1.modpow(&transcript.c, p)) % p;
        // r2 == h^s * y2^c (mod p)
        let rhs2 = (h.modpow(s, p) * key.y2.modpow(&transcript.c, p)) % p;

        Ok(transcript.r1 == rhs1 && transcript.r2 == rhs2)
    }

    fn element_len(&self) -> usize {
        ((self.params.p.bits() + 7) / 8) as usize
    }
}
