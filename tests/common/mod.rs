//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use num_bigint::BigUint;
use tempfile::TempDir;
use zkp_auth::config::SessionSettings;
use zkp_auth::proof::groups::GroupParams;
use zkp_auth::store::SqliteStore;
use zkp_auth::{Authenticator, ChaumPedersen, SessionStore};

/// Initialize test tracing (call once at the beginning of tests).
///
/// Only logs from the crate under test are shown. Subsequent calls are safe
/// and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("zkp_auth=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// A fresh SQLite store in a temporary directory. Keep the `TempDir` alive
/// for as long as the store is used.
pub async fn sqlite_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("auth.db")).await.unwrap();
    (dir, store)
}

/// Engine over the p = 23, q = 11 group. Fast enough for property tests.
pub fn toy_engine() -> ChaumPedersen {
    ChaumPedersen::new(GroupParams::toy()).unwrap()
}

/// Authenticator over a fresh SQLite store.
pub async fn authenticator(
    engine: ChaumPedersen,
    settings: &SessionSettings,
) -> (TempDir, Arc<dyn SessionStore>, Authenticator<ChaumPedersen>) {
    let (dir, store) = sqlite_store().await;
    let store: Arc<dyn SessionStore> = Arc::new(store);
    let auth = Authenticator::new(engine, Arc::clone(&store), settings);
    (dir, store, auth)
}

pub fn big(text: &str) -> BigUint {
    BigUint::parse_bytes(text.as_bytes(), 10).unwrap()
}
