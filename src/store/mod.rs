//! Session Store: durable, transactional record of users, in-flight
//! authentication challenges, and active sessions.
//!
//! The store owns every state transition of the protocol. Two operations
//! mutate more than one row, [`SessionStore::create_auth_challenge`] and
//! [`SessionStore::complete_verification`]; each runs inside one transaction
//! and leaves no trace when any step fails.
//!
//! # Absent and expired are the same answer
//!
//! Read operations report an expired challenge or session exactly like one
//! that never existed ([`StoreError::NotFound`]). Splitting the two cases would
//! let a caller probe which identifiers were ever issued. Keep them merged.
//!
//! Reads never delete. Expired rows stay in place, logically dead, until
//! [`SessionStore::sweep_expired`] reclaims them.
//!
//! # Cancellation
//!
//! Every operation is an ordinary future. Dropping it before completion drops
//! the open transaction, which rolls back, so a cancelled call has no visible
//! effect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sqlx::pool::PoolOptions;

use crate::config::{Backend, DatabaseSettings, PoolSettings};
use crate::proof::{PublicKey, Transcript};

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Errors reported by a session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The row does not exist or has expired.
    #[error("Not found or expired")]
    NotFound,

    /// The username is already taken.
    #[error("Username already registered")]
    DuplicateUser,

    /// A value handed to the store is unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A stored value could not be decoded.
    #[error("Corrupt value in column {field}: {reason}")]
    Corrupt {
        /// Column holding the bad value.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The database reported an error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying schema migrations failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Registered identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// Store-assigned identity.
    pub id: i64,
    /// Unique, immutable username.
    pub username: String,
    /// First enrollment commitment.
    pub y1: BigUint,
    /// Second enrollment commitment.
    pub y2: BigUint,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last amendment of enrollment data.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The user's enrollment public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.y1.clone(), self.y2.clone())
    }
}

/// One in-flight proof attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Store-assigned row id.
    pub id: i64,
    /// Opaque, unguessable handle given to the client.
    pub auth_id: String,
    /// Owning user.
    pub user_id: i64,
    /// Challenge `c`.
    pub challenge: BigUint,
    /// Commitment `r1`.
    pub commitment_r1: BigUint,
    /// Commitment `r2`.
    pub commitment_r2: BigUint,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Absolute deadline.
    pub expires_at: DateTime<Utc>,
    /// Set once, when the proof is accepted and a session is issued.
    pub verified: bool,
}

impl AuthChallenge {
    /// The protocol transcript recorded for this attempt.
    pub fn transcript(&self) -> Transcript {
        Transcript {
            c: self.challenge.clone(),
            r1: self.commitment_r1.clone(),
            r2: self.commitment_r2.clone(),
        }
    }
}

/// Authenticated session issued after a successful proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSession {
    /// Store-assigned row id.
    pub id: i64,
    /// Opaque bearer token.
    pub session_id: String,
    /// Owning user.
    pub user_id: i64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Absolute deadline.
    pub expires_at: DateTime<Utc>,
    /// Last recorded activity. Advisory; never extends `expires_at`.
    pub last_activity: DateTime<Utc>,
}

/// Rows reclaimed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired challenges removed.
    pub challenges_removed: u64,
    /// Expired sessions removed.
    pub sessions_removed: u64,
}

impl SweepStats {
    /// Total rows removed.
    pub fn total(&self) -> u64 {
        self.challenges_removed + self.sessions_removed
    }
}

/// Durable store behind the authentication protocol.
///
/// Implementations are shared across tasks behind an `Arc` and must be safe
/// to call concurrently, including for the same `auth_id` or `session_id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new user. Fails with `DuplicateUser` if the name is taken.
    async fn register_user(&self, username: &str, y1: &BigUint, y2: &BigUint)
        -> Result<(), StoreError>;

    /// Looks up a user by name.
    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError>;

    /// Looks up a user by id.
    async fn get_user_by_id(&self, id: i64) -> Result<User, StoreError>;

    /// Reports whether a username is registered.
    async fn user_exists(&self, username: &str) -> Result<bool, StoreError>;

    /// Deletes a user together with all of their challenges and sessions.
    /// Deleting an unknown user is not an error.
    async fn delete_user(&self, username: &str) -> Result<(), StoreError>;

    /// Records a new challenge for `username` and returns its `auth_id`.
    ///
    /// Resolving the user and inserting the challenge happen in one
    /// transaction; an unknown user leaves no row behind.
    async fn create_auth_challenge(
        &self,
        username: &str,
        transcript: &Transcript,
        ttl: Duration,
    ) -> Result<String, StoreError>;

    /// Fetches a live challenge. Expired and unknown ids both yield `NotFound`.
    async fn get_auth_challenge(&self, auth_id: &str) -> Result<AuthChallenge, StoreError>;

    /// Marks a live, unverified challenge as verified and issues a session.
    ///
    /// The flag flips through one conditional update, so among concurrent
    /// callers for the same `auth_id` exactly one obtains a session. The rest,
    /// and any caller for an expired, unknown or already consumed challenge,
    /// get `NotFound` and nothing is written.
    async fn complete_verification(&self, auth_id: &str, ttl: Duration)
        -> Result<String, StoreError>;

    /// Fetches a live session. Expired and unknown ids both yield `NotFound`.
    async fn get_active_session(&self, session_id: &str) -> Result<ActiveSession, StoreError>;

    /// Records activity on a session. A missing session is not an error.
    async fn touch_session_activity(&self, session_id: &str) -> Result<(), StoreError>;

    /// Removes a session. Idempotent.
    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// Physically removes every expired challenge and session.
    async fn sweep_expired(&self) -> Result<SweepStats, StoreError>;

    /// Closes the underlying connection pool.
    async fn close(&self);
}

/// Connects to the backend named in `settings` and applies migrations.
pub async fn connect(settings: &DatabaseSettings) -> Result<Arc<dyn SessionStore>, StoreError> {
    let store: Arc<dyn SessionStore> = match settings.backend {
        Backend::Sqlite => Arc::new(SqliteStore::connect(settings).await?),
        Backend::Postgres => Arc::new(PostgresStore::connect(settings).await?),
    };
    Ok(store)
}

pub(crate) fn pool_options<DB: sqlx::Database>(settings: &PoolSettings) -> PoolOptions<DB> {
    PoolOptions::<DB>::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(settings.max_lifetime_secs))
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
}

/// Encodes a big integer as base-10 text.
pub fn encode_biguint(value: &BigUint) -> String {
    value.to_str_radix(10)
}

/// Decodes base-10 text written by [`encode_biguint`].
///
/// Any deviation is reported as corruption rather than defaulted.
pub fn decode_biguint(field: &'static str, text: &str) -> Result<BigUint, StoreError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StoreError::Corrupt {
            field,
            reason: "not a base-10 integer".to_string(),
        });
    }

    BigUint::parse_bytes(text.as_bytes(), 10).ok_or_else(|| StoreError::Corrupt {
        field,
        reason: "not a base-10 integer".to_string(),
    })
}

pub(crate) fn validate_registration(
    username: &str,
    y1: &BigUint,
    y2: &BigUint,
) -> Result<(), StoreError> {
    if username.is_empty() {
        return Err(StoreError::InvalidInput("Username cannot be empty".to_string()));
    }
    if y1.is_zero() || y2.is_zero() {
        return Err(StoreError::InvalidInput(
            "Public commitments cannot be zero".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn deadline(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| StoreError::InvalidInput("TTL out of range".to_string()))
}

pub(crate) fn map_insert_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateUser,
        _ => StoreError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_codec_is_lossless_for_large_values() {
        let value = BigUint::from(1u32) << 2048usize;
        let value = value - 1u32;
        let text = encode_biguint(&value);
        assert_eq!(decode_biguint("y1", &text).unwrap(), value);
    }

    #[test]
    fn malformed_text_is_corruption() {
        for text in ["", "12a", "-5", " 7", "0x10"] {
            assert!(matches!(
                decode_biguint("c", text),
                Err(StoreError::Corrupt { field: "c", .. })
            ));
        }
    }

    #[test]
    fn zero_commitments_are_rejected() {
        let one = BigUint::from(1u32);
        assert!(validate_registration("alice", &BigUint::zero(), &one).is_err());
        assert!(validate_registration("", &one, &one).is_err());
        assert!(validate_registration("alice", &one, &one).is_ok());
    }

    #[test]
    fn deadline_rejects_unrepresentable_ttl() {
        let now = Utc::now();
        assert!(deadline(now, Duration::from_secs(u64::MAX)).is_err());
        assert_eq!(deadline(now, Duration::ZERO).unwrap(), now);
    }
}
