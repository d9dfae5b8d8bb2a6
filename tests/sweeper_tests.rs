mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use tokio::sync::watch;
use zkp_auth::store::StoreError;
use zkp_auth::sweeper::{spawn_sweeper, sweep_once};
use zkp_auth::{ActiveSession, AuthChallenge, SessionStore, SweepStats, Transcript, User};

use common::sqlite_store;

#[tokio::test]
async fn sweep_once_reports_removed_rows() {
    let (_dir, store) = sqlite_store().await;
    let one = BigUint::from(2u32);
    store.register_user("alice", &one, &one).await.unwrap();

    let t = Transcript {
        c: one.clone(),
        r1: one.clone(),
        r2: one.clone(),
    };
    store
        .create_auth_challenge("alice", &t, Duration::ZERO)
        .await
        .unwrap();

    let stats = sweep_once(&store).await.unwrap();
    assert_eq!(stats.challenges_removed, 1);
    assert_eq!(sweep_once(&store).await.unwrap().total(), 0);
}

#[tokio::test]
async fn background_sweep_runs_and_stops() {
    let (_dir, store) = sqlite_store().await;
    let store: Arc<dyn SessionStore> = Arc::new(store);
    let one = BigUint::from(2u32);
    store.register_user("bob", &one, &one).await.unwrap();

    let t = Transcript {
        c: one.clone(),
        r1: one.clone(),
        r2: one.clone(),
    };
    let auth_id = store
        .create_auth_challenge("bob", &t, Duration::ZERO)
        .await
        .unwrap();

    let (tx, rx) = watch::channel(false);
    let handle = spawn_sweeper(Arc::clone(&store), Duration::from_millis(50), rx);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.sweep_expired().await.unwrap().total(), 0);
    assert!(store.get_auth_challenge(&auth_id).await.is_err());

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

/// Store whose first sweep panics. Only the sweep is implemented.
#[derive(Default)]
struct FlakyStore {
    sweeps: AtomicUsize,
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn register_user(&self, _: &str, _: &BigUint, _: &BigUint) -> Result<(), StoreError> {
        unimplemented!()
    }

    async fn get_user_by_username(&self, _: &str) -> Result<User, StoreError> {
        unimplemented!()
    }

    async fn get_user_by_id(&self, _: i64) -> Result<User, StoreError> {
        unimplemented!()
    }

    async fn user_exists(&self, _: &str) -> Result<bool, StoreError> {
        unimplemented!()
    }

    async fn delete_user(&self, _: &str) -> Result<(), StoreError> {
        unimplemented!()
    }

    async fn create_auth_challenge(
        &self,
        _: &str,
        _: &Transcript,
        _: Duration,
    ) -> Result<String, StoreError> {
        unimplemented!()
    }

    async fn get_auth_challenge(&self, _: &str) -> Result<AuthChallenge, StoreError> {
        unimplemented!()
    }

    async fn complete_verification(&self, _: &str, _: Duration) -> Result<String, StoreError> {
        unimplemented!()
    }

    async fn get_active_session(&self, _: &str) -> Result<ActiveSession, StoreError> {
        unimplemented!()
    }

    async fn touch_session_activity(&self, _: &str) -> Result<(), StoreError> {
        unimplemented!()
    }

    async fn delete_session(&self, _: &str) -> Result<(), StoreError> {
        unimplemented!()
    }

    async fn sweep_expired(&self) -> Result<SweepStats, StoreError> {
        if self.sweeps.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first sweep blows up");
        }
        Ok(SweepStats::default())
    }

    async fn close(&self) {}
}

#[tokio::test(start_paused = true)]
async fn panicked_sweep_is_restarted() {
    let store = Arc::new(FlakyStore::default());
    let (tx, rx) = watch::channel(false);
    let handle = spawn_sweeper(store.clone(), Duration::from_secs(1), rx);

    for _ in 0..100 {
        if store.sweeps.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    assert!(store.sweeps.load(Ordering::SeqCst) >= 2);

    tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropped_sender_stops_the_sweeper() {
    let store = Arc::new(FlakyStore::default());
    let (tx, rx) = watch::channel(false);
    let handle = spawn_sweeper(store, Duration::from_secs(3600), rx);

    drop(tx);
    handle.await.unwrap();
}
