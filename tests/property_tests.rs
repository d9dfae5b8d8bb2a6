use num_bigint::BigUint;
use proptest::prelude::*;
use zkp_auth::proof::groups::GroupParams;
use zkp_auth::proof::prover::Prover;
use zkp_auth::store::{decode_biguint, encode_biguint};
use zkp_auth::{ChaumPedersen, ProofEngine, Transcript};

fn toy() -> ChaumPedersen {
    ChaumPedersen::new(GroupParams::toy()).unwrap()
}

proptest! {
    #[test]
    fn honest_prover_always_verifies(x in 1u32..11, k in 1u32..11, c in 0u32..11) {
        let engine = toy();
        let (y1, y2) = engine.compute_commitments(&BigUint::from(x));
        let (r1, r2) = engine.compute_commitments(&BigUint::from(k));
        let c = BigUint::from(c);

        let s = engine.solve_challenge(&BigUint::from(k), &c, &BigUint::from(x));
        prop_assert!(s < engine.params().q);

        let key = zkp_auth::PublicKey::new(y1, y2);
        let transcript = Transcript { c, r1, r2 };
        prop_assert!(engine.verify(&key, &transcript, &s).unwrap());
    }

    #[test]
    fn only_one_response_verifies(x in 1u32..11, k in 1u32..11, c in 0u32..11, other in 0u32..11) {
        let engine = toy();
        let (y1, y2) = engine.compute_commitments(&BigUint::from(x));
        let (r1, r2) = engine.compute_commitments(&BigUint::from(k));
        let c = BigUint::from(c);
        let s = engine.solve_challenge(&BigUint::from(k), &c, &BigUint::from(x));
        let other = BigUint::from(other);
        prop_assume!(other != s);

        let key = zkp_auth::PublicKey::new(y1, y2);
        let transcript = Transcript { c, r1, r2 };
        prop_assert!(!engine.verify(&key, &transcript, &other).unwrap());
    }

    #[test]
    fn responses_at_or_above_q_are_rejected(excess in 0u32..1000) {
        let engine = toy();
        let prover = Prover::new(&engine, BigUint::from(4u32));
        let commitment = prover.commit();
        let transcript = Transcript {
            c: BigUint::from(3u32),
            r1: commitment.r1.clone(),
            r2: commitment.r2.clone(),
        };
        let s = &engine.params().q + BigUint::from(excess);

        prop_assert!(!engine.verify(&prover.public_key(), &transcript, &s).unwrap());
    }

    #[test]
    fn decimal_codec_preserves_values(bytes in prop::collection::vec(any::<u8>(), 1..300)) {
        let value = BigUint::from_bytes_be(&bytes);
        prop_assert_eq!(decode_biguint("y1", &encode_biguint(&value)).unwrap(), value);
    }

    #[test]
    fn non_decimal_text_is_corruption(text in "[0-9]*[^0-9][0-9a-z]*") {
        prop_assert!(decode_biguint("c", &text).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn rfc5114_round_trip(seed in prop::collection::vec(any::<u8>(), 32)) {
        let engine = ChaumPedersen::rfc5114();
        let x = BigUint::from_bytes_be(&seed) % &engine.params().q;
        prop_assume!(x > BigUint::from(0u32));

        let prover = Prover::new(&engine, x);
        let key = prover.public_key();
        prop_assert!(engine.validate_public_key(&key).is_ok());

        let commitment = prover.commit();
        let transcript = engine
            .issue_challenge(commitment.r1.clone(), commitment.r2.clone())
            .unwrap();
        let s = prover.respond_to(&commitment, &transcript);

        prop_assert!(engine.verify(&key, &transcript, &s).unwrap());
    }
}
