use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use num_bigint::BigUint;
use zkp_auth::config::SessionSettings;
use zkp_auth::proof::prover::Prover;
use zkp_auth::store::SqliteStore;
use zkp_auth::{Authenticator, ChaumPedersen, ProofEngine, SessionStore};

fn bench_rfc5114_commitments(c: &mut Criterion) {
    let engine = ChaumPedersen::rfc5114();
    let prover = Prover::new(&engine, engine.random_exponent());

    c.bench_function("rfc5114_commit", |b| b.iter(|| black_box(prover.commit())));
}

fn bench_rfc5114_verification(c: &mut Criterion) {
    let engine = ChaumPedersen::rfc5114();
    let prover = Prover::new(&engine, engine.random_exponent());
    let key = prover.public_key();
    let commitment = prover.commit();
    let transcript = engine
        .issue_challenge(commitment.r1.clone(), commitment.r2.clone())
        .unwrap();
    let s = prover.respond_to(&commitment, &transcript);

    c.bench_function("rfc5114_verify", |b| {
        b.iter(|| {
            engine
                .verify(black_box(&key), black_box(&transcript), black_box(&s))
                .unwrap()
        })
    });
}

fn bench_sqlite_authentication(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let client = ChaumPedersen::rfc5114();
    let prover = Prover::new(&client, BigUint::from(0x5eed_u32));

    let auth = runtime.block_on(async {
        let store = SqliteStore::open(dir.path().join("bench.db")).await.unwrap();
        let store: Arc<dyn SessionStore> = Arc::new(store);
        let auth = Authenticator::new(
            ChaumPedersen::rfc5114(),
            store,
            &SessionSettings::default(),
        );
        let key = prover.public_key();
        auth.register("bench", key.y1, key.y2).await.unwrap();
        auth
    });

    c.bench_function("sqlite_challenge_and_verify", |b| {
        b.to_async(&runtime).iter(|| async {
            let commitment = prover.commit();
            let issued = auth
                .begin_authentication("bench", commitment.r1.clone(), commitment.r2.clone())
                .await
                .unwrap();
            let s = prover.respond_to(&commitment, &issued.transcript);
            auth.verify_authentication(&issued.auth_id, s).await.unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_rfc5114_commitments,
    bench_rfc5114_verification,
    bench_sqlite_authentication
);
criterion_main!(benches);
