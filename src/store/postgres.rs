//! PostgreSQL backend for the session store.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use sqlx::postgres::{PgConnectOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info};

use super::{
    deadline, decode_biguint, encode_biguint, map_insert_error, pool_options,
    validate_registration, ActiveSession, AuthChallenge, SessionStore, StoreError, SweepStats,
    User,
};
use crate::config::{DatabaseSettings, PoolSettings};
use crate::primitives::random_token;
use crate::proof::Transcript;

const USER_COLUMNS: &str = "id, username, y1, y2, created_at, updated_at";

/// Session store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects using host, port, credentials, database name and TLS mode from
    /// `settings`, then runs migrations.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, StoreError> {
        let ssl_mode = PgSslMode::from_str(&settings.ssl_mode)?;

        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name)
            .ssl_mode(ssl_mode);

        let pool = pool_options::<Postgres>(&settings.pool)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations/postgres").run(&pool).await?;

        info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.name,
            "Postgres session store ready"
        );
        Ok(Self { pool })
    }

    /// Connects with a `postgres://` URL and runs migrations.
    pub async fn connect_url(url: &str, pool: &PoolSettings) -> Result<Self, StoreError> {
        let pool = pool_options::<Postgres>(pool).connect(url).await?;
        sqlx::migrate!("./migrations/postgres").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PostgresStore {
    async fn register_user(
        &self,
        username: &str,
        y1: &BigUint,
        y2: &BigUint,
    ) -> Result<(), StoreError> {
        validate_registration(username, y1, y2)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (username, y1, y2, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
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
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        parse_user_row(&row)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<User, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)?;

        parse_user_row(&row)
    }

    async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE username = $1")
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

        let mut tx = self.pool.begin().await?;

        // Share lock keeps the user alive until the challenge row commits.
        let user_id: i64 =
            sqlx::query_scalar("SELECT id FROM users WHERE username = $1 FOR SHARE")
                .bind(username)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound)?;

        let auth_id = random_token();
        sqlx::query(
            r#"
            INSERT INTO auth_sessions (
                auth_id, user_id, challenge_c, commitment_r1, commitment_r2,
                created_at, expires_at, verified
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
            "#,
        )
        .bind(&auth_id)
        .bind(user_id)
        .bind(encode_biguint(&transcript.c))
        .bind(encode_biguint(&transcript.r1))
        .bind(encode_biguint(&transcript.r2))
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(auth_id)
    }

    async fn get_auth_challenge(&self, auth_id: &str) -> Result<AuthChallenge, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, auth_id, user_id, challenge_c, commitment_r1, commitment_r2,
                   created_at, expires_at, verified
            FROM auth_sessions
            WHERE auth_id = $1 AND expires_at > $2
            "#,
        )
        .bind(auth_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(AuthChallenge {
            id: row.try_get("id")?,
            auth_id: row.try_get("auth_id")?,
            user_id: row.try_get("user_id")?,
            challenge: text_biguint(&row, "challenge_c")?,
            commitment_r1: text_biguint(&row, "commitment_r1")?,
            commitment_r2: text_biguint(&row, "commitment_r2")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            verified: row.try_get("verified")?,
        })
    }

    async fn complete_verification(
        &self,
        auth_id: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        let now = Utc::now();
        let expires_at = deadline(now, ttl)?;

        let mut tx = self.pool.begin().await?;

        // Concurrent callers block on the row lock and re-check the predicate
        // after the winner commits, so only one sees verified = FALSE.
        let user_id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE auth_sessions SET verified = TRUE
            WHERE auth_id = $1 AND NOT verified AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(auth_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            return Err(StoreError::NotFound);
        };

        let session_id = random_token();
        sqlx::query(
            r#"
            INSERT INTO active_sessions (session_id, user_id, created_at, expires_at, last_activity)
            VALUES ($1, $2, $3, $4, $3)
            "#,
        )
        .bind(&session_id)
        .bind(user_id)
        .bind(now)
        .bind(expires_at)
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
            WHERE session_id = $1 AND expires_at > $2
            "#,
        )
        .bind(session_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(ActiveSession {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            last_activity: row.try_get("last_activity")?,
        })
    }

    async fn touch_session_activity(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE active_sessions SET last_activity = GREATEST(last_activity, $2)
            WHERE session_id = $1 AND expires_at > $2
            "#,
        )
        .bind(session_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM active_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<SweepStats, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let challenges = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let sessions = sqlx::query("DELETE FROM active_sessions WHERE expires_at <= $1")
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

fn text_biguint(row: &PgRow, field: &'static str) -> Result<BigUint, StoreError> {
    let text: String = row.try_get(field)?;
    decode_biguint(field, &text)
}

fn parse_user_row(row: &PgRow) -> Result<User, StoreError> {
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        y1: text_biguint(row, "y1")?,
        y2: text_biguint(row, "y2")?,
        created_at,
        updated_at,
    })
}
