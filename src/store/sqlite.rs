//! SQLite backend for the session store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::{
    deadline, decode_biguint, encode_biguint, map_insert_error, pool_options,
    validate_registration, ActiveSession, AuthChallenge, SessionStore, StoreError, SweepStats,
    User,
};
use crate::config::DatabaseSettings;
use crate::primitives::random_token;
use crate::proof::Transcript;

/// Session store backed by an SQLite database file.
///
/// Timestamps are stored as unix milliseconds so expiry checks compare
/// integers.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens or creates the database file in `settings.path`.
    ///
    /// Runs migrations automatically to ensure schema is up to date.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let path = settings.path.as_path();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(
                    format!("Failed to create db directory: {e}").into(),
                )
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            // WAL lets readers proceed while one writer commits
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = pool_options::<Sqlite>(&settings.pool)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;

        info!(path = %path.display(), "SQLite session store ready");
        Ok(Self { pool })
    }

    /// Opens a database file with default pool bounds.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::connect(&DatabaseSettings::sqlite(path.as_ref())).await
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_user(&self, column: &str, key: UserKey<'_>) -> Result<User, StoreError> {
        let sql = format!(
            "SELECT id, username, y1, y2, created_at, updated_at FROM users WHERE {column} = ?1"
        );
        let query = sqlx::query(&sql);
        let query = match key {
            UserKey::Name(name) => query.bind(name),
            UserKey::Id(id) => query.bind(id),
        };

        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        parse_user_row(&row)
    }
}

enum UserKey<'a> {
    Name(&'a str),
    Id(i64),
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn register_user(
        &self,
        username: &str,
        y1: &BigUint,
        y2: &BigUint,
    ) -> Result<(), StoreError> {
        validate_registration(username, y1, y2)?;
        let now = millis(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO users (username, y1, y2, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
        )
        .bind(username)
        .bind(encode_biguint(y1))
        .bind(encode_biguint(y2))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        debug!(username, "User registered");
        Ok(())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.fetch_user("username", UserKey::Name(username)).await
    }

    async fn get_user_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.fetch_user("id", UserKey::Id(id)).await
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE username = ?1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_auth_challenge(
        &self,
        username: &str,
        transcript: &Transcript,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let expires_at = deadline(now, ttl)?;
        let auth_id = random_token();

        let mut tx = self.pool.begin().await?;

        // User lookup and insert in one statement: the transaction takes the
        // write lock up front instead of upgrading a read snapshot.
        let result = sqlx::query(
            r#"
            INSERT INTO auth_sessions (
                auth_id, user_id, challenge_c, commitment_r1, commitment_r2,
                created_at, expires_at, verified
            )
            SELECT ?1, id, ?2, ?3, ?4, ?5, ?6, 0
            FROM users
            WHERE username = ?7
            "#,
        )
        .bind(&auth_id)
        .bind(encode_biguint(&transcript.c))
        .bind(encode_biguint(&transcript.r1))
        .bind(encode_biguint(&transcript.r2))
        .bind(millis(now))
        .bind(millis(expires_at))
        .bind(username)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await?;
        Ok(auth_id)
    }

    async fn get_auth_challenge(&self, auth_id: &str) -> Result<AuthChallenge, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, auth_id, user_id, challenge_c, commitment_r1, commitment_r2,
                   created_at, expires_at, verified
            FROM auth_sessions
            WHERE auth_id = ?1 AND expires_at > ?2
            "#,
        )
        .bind(auth_id)
        .bind(millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        parse_challenge_row(&row)
    }

    async fn complete_verification(
        &self,
        auth_id: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let expires_at = deadline(now, ttl)?;

        let mut tx = self.pool.begin().await?;

        let user_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE auth_sessions SET verified = 1
            WHERE auth_id = ?1 AND verified = 0 AND expires_at > ?2
            RETURNING user_id
            "#,
        )
        .bind(auth_id)
        .bind(millis(now))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            return Err(StoreError::NotFound);
        };

        let session_id = random_token();
        sqlx::query(
            r#"
            INSERT INTO active_sessions (session_id, user_id, created_at, expires_at, last_activity)
            VALUES (?1, ?2, ?3, ?4, ?3)
            "#,
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(millis(now))
        .bind(millis(expires_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session_id)
    }

    async fn get_active_session(&self, session_id: &str) -> Result<ActiveSession, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, user_id, created_at, expires_at, last_activity
            FROM active_sessions
            WHERE session_id = ?1 AND expires_at > ?2
            "#,
        )
        .bind(session_id)
        .bind(millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(ActiveSession {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            created_at: timestamp(&row, "created_at")?,
            expires_at: timestamp(&row, "expires_at")?,
            last_activity: timestamp(&row, "last_activity")?,
        })
    }

    async fn touch_session_activity(&self, session_id: &str) -> Result<(), StoreError> {
        let now = millis(Utc::now());
        sqlx::query(
            r#"
            UPDATE active_sessions SET last_activity = MAX(last_activity, ?2)
            WHERE session_id = ?1 AND expires_at > ?2
            "#,
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM active_sessions WHERE session_id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<SweepStats, StoreError> {
        let now = millis(Utc::now());
        let mut tx = self.pool.begin().await?;

        let challenges = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let sessions = sqlx::query("DELETE FROM active_sessions WHERE expires_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(SweepStats {
            challenges_removed: challenges.rows_affected(),
            sessions_removed: sessions.rows_affected(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn timestamp(row: &SqliteRow, field: &'static str) -> Result<DateTime<Utc>, StoreError> {
    let ms: i64 = row.try_get(field)?;
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        field,
        reason: format!("timestamp {ms} out of range"),
    })
}

fn text_biguint(row: &SqliteRow, field: &'static str) -> Result<num_bigint::BigUint, StoreError> {
    let text: String = row.try_get(field)?;
    decode_biguint(field, &text)
}

fn parse_user_row(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        y1: text_biguint(row, "y1")?,
        y2: text_biguint(row, "y2")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn parse_challenge_row(row: &SqliteRow) -> Result<AuthChallenge, StoreError> {
    Ok(AuthChallenge {
        id: row.try_get("id")?,
        auth_id: row.try_get("auth_id")?,
        user_id: row.try_get("user_id")?,
        challenge: text_biguint(row, "challenge_c")?,
        commitment_r1: text_biguint(row, "commitment_r1")?,
        commitment_r2: text_biguint(row, "commitment_r2")?,
        created_at: timestamp(row, "created_at")?,
        expires_at: timestamp(row, "expires_at")?,
        verified: row.try_get("verified")?,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn migrations_create_tables() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("auth.db")).await.unwrap();

        for table in ["users", "auth_sessions", "active_sessions"] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(store.pool())
                .await
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn corrupt_commitment_fails_the_read() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("auth.db")).await.unwrap();

        store
            .register_user("mallory", &BigUint::from(5u32), &BigUint::from(7u32))
            .await
            .unwrap();
        sqlx::query("UPDATE users SET y2 = 'garbage' WHERE username = 'mallory'")
            .execute(store.pool())
            .await
            .unwrap();

        let result = store.get_user_by_username("mallory").await;
        assert!(matches!(
            result,
            Err(StoreError::Corrupt { field: "y2", .. })
        ));
    }

    #[tokio::test]
    async fn nested_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("auth.db");
        SqliteStore::open(&path).await.unwrap();
        assert!(path.exists());
    }
}
