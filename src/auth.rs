//! Protocol Orchestrator.
//!
//! [`Authenticator`] sequences the Proof Engine and the Session Store into the
//! three protocol phases. It holds no protocol state of its own: every
//! challenge and session lives in the store, so any number of instances can
//! serve the same database.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use num_bigint::BigUint;
use tracing::{debug, info, warn};

use crate::config::SessionSettings;
use crate::proof::{ProofEngine, PublicKey, Transcript};
use crate::store::{ActiveSession, SessionStore, StoreError, User};
use crate::{Error, Result};

const MAX_USERNAME_LEN: usize = 256;

/// A challenge handed to the client in response to Begin-authentication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedChallenge {
    /// Handle the client quotes when answering.
    pub auth_id: String,
    /// Stored transcript; the client answers `transcript.c`.
    pub transcript: Transcript,
}

/// Coordinates registration, challenge issuance and verification.
///
/// Constructed either with a connected store or in degraded mode, where every
/// operation fails fast with [`Error::StoreUnavailable`].
pub struct Authenticator<E: ProofEngine> {
    engine: Arc<E>,
    store: Option<Arc<dyn SessionStore>>,
    challenge_ttl: Duration,
    session_ttl: Duration,
    operation_timeout: Duration,
}

impl<E: ProofEngine> Clone for Authenticator<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            store: self.store.clone(),
            challenge_ttl: self.challenge_ttl,
            session_ttl: self.session_ttl,
            operation_timeout: self.operation_timeout,
        }
    }
}

impl<E: ProofEngine> Authenticator<E> {
    /// Creates an authenticator over a connected store.
    pub fn new(engine: E, store: Arc<dyn SessionStore>, settings: &SessionSettings) -> Self {
        Self::with_store(engine, Some(store), settings)
    }

    /// Creates an authenticator with no store. All operations return
    /// [`Error::StoreUnavailable`].
    pub fn degraded(engine: E, settings: &SessionSettings) -> Self {
        Self::with_store(engine, None, settings)
    }

    /// Creates an authenticator, degraded when `store` is `None`.
    pub fn with_store(
        engine: E,
        store: Option<Arc<dyn SessionStore>>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            store,
            challenge_ttl: settings.challenge_ttl(),
            session_ttl: settings.session_ttl(),
            operation_timeout: settings.operation_timeout(),
        }
    }

    /// True when running without a store.
    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    /// The proof engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The store handle, if connected.
    pub fn store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.store.as_ref()
    }

    fn require_store(&self) -> Result<&dyn SessionStore> {
        self.store.as_deref().ok_or(Error::StoreUnavailable)
    }

    /// Runs one store call under the per-operation deadline. The call's
    /// future is dropped on timeout, rolling back any open transaction.
    async fn call<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                warn!(timeout = ?self.operation_timeout, "Session store call timed out");
                Err(Error::StoreUnavailable)
            }
        }
    }

    /// Phase 1: enrolls `username` with public key `(y1, y2)`.
    pub async fn register(&self, username: &str, y1: BigUint, y2: BigUint) -> Result<()> {
        let start = Instant::now();
        counter!("auth.register.requests").increment(1);

        let result = self.register_inner(username, y1, y2).await;

        histogram!("auth.register.duration").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(()) => {
                counter!("auth.register.success").increment(1);
                info!(username, "User registered");
            }
            Err(e) => {
                counter!("auth.register.failure").increment(1);
                debug!(username, error = %e, "Registration rejected");
            }
        }

        result
    }

    async fn register_inner(&self, username: &str, y1: BigUint, y2: BigUint) -> Result<()> {
        let store = self.require_store()?;
        validate_username(username)?;
        self.check_width("y1", &y1)?;
        self.check_width("y2", &y2)?;

        let key = PublicKey::new(y1, y2);
        self.engine.validate_public_key(&key)?;

        self.call(store.register_user(username, &key.y1, &key.y2))
            .await
    }

    /// Phase 2: records the prover's commitments `(r1, r2)` for `username`
    /// and issues a fresh challenge.
    pub async fn begin_authentication(
        &self,
        username: &str,
        r1: BigUint,
        r2: BigUint,
    ) -> Result<IssuedChallenge> {
        let start = Instant::now();
        counter!("auth.challenge.requests").increment(1);

        let result = self.begin_inner(username, r1, r2).await;

        histogram!("auth.challenge.duration").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => counter!("auth.challenge.success").increment(1),
            Err(_) => counter!("auth.challenge.failure").increment(1),
        }

        result
    }

    async fn begin_inner(&self, username: &str, r1: BigUint, r2: BigUint) -> Result<IssuedChallenge> {
        let store = self.require_store()?;
        validate_username(username)?;
        self.check_width("r1", &r1)?;
        self.check_width("r2", &r2)?;

        let transcript = self.engine.issue_challenge(r1, r2)?;

        let auth_id = self
            .call(store.create_auth_challenge(username, &transcript, self.challenge_ttl))
            .await?;

        debug!(username, auth_id = short(&auth_id), "Challenge issued");
        Ok(IssuedChallenge {
            auth_id,
            transcript,
        })
    }

    /// Phase 3: checks response `s` for challenge `auth_id` and, on success,
    /// returns a new session id.
    ///
    /// A rejected response leaves the challenge live until it expires, so the
    /// client may answer again. A challenge that already produced a session is
    /// consumed and reported as [`Error::NotFound`].
    pub async fn verify_authentication(&self, auth_id: &str, s: BigUint) -> Result<String> {
        let start = Instant::now();
        counter!("auth.verify.requests").increment(1);

        let result = self.verify_inner(auth_id, s).await;

        histogram!("auth.verify.duration").record(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => {
                counter!("auth.verify.success").increment(1);
                info!(auth_id = short(auth_id), "Authentication succeeded");
            }
            Err(e) => {
                counter!("auth.verify.failure").increment(1);
                debug!(auth_id = short(auth_id), error = %e, "Authentication failed");
            }
        }

        result
    }

    async fn verify_inner(&self, auth_id: &str, s: BigUint) -> Result<String> {
        let store = self.require_store()?;
        if auth_id.is_empty() {
            return Err(Error::NotFound);
        }
        self.check_width("s", &s)?;

        let challenge = self.call(store.get_auth_challenge(auth_id)).await?;
        if challenge.verified {
            return Err(Error::NotFound);
        }

        let user = self.call(store.get_user_by_id(challenge.user_id)).await?;

        let engine = Arc::clone(&self.engine);
        let key = user.public_key();
        let transcript = challenge.transcript();
        let accepted = tokio::task::spawn_blocking(move || engine.verify(&key, &transcript, &s))
            .await
            .map_err(|e| {
                warn!(error = %e, "Proof verification task failed");
                Error::EngineUnavailable
            })??;

        if !accepted {
            return Err(Error::VerificationFailed);
        }

        self.call(store.complete_verification(auth_id, self.session_ttl))
            .await
    }

    /// Returns a live session and records activity on it.
    pub async fn validate_session(&self, session_id: &str) -> Result<ActiveSession> {
        let store = self.require_store()?;
        if session_id.is_empty() {
            return Err(Error::NotFound);
        }

        let session = self.call(store.get_active_session(session_id)).await?;
        self.call(store.touch_session_activity(session_id)).await?;
        Ok(session)
    }

    /// Looks up the user owning a session or challenge.
    pub async fn user_by_id(&self, user_id: i64) -> Result<User> {
        let store = self.require_store()?;
        self.call(store.get_user_by_id(user_id)).await
    }

    /// Ends a session. Succeeds whether or not the session exists.
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        let store = self.require_store()?;
        self.call(store.delete_session(session_id)).await?;
        counter!("auth.logout").increment(1);
        Ok(())
    }

    fn check_width(&self, name: &str, value: &BigUint) -> Result<()> {
        let len = ((value.bits() + 7) / 8) as usize;
        if len > self.engine.element_len() {
            return Err(Error::InvalidInput(format!("{name} is too large")));
        }
        Ok(())
    }
}

/// Checks that a username is non-empty, bounded, and drawn from
/// `[A-Za-z0-9_.-]`.
pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::InvalidInput("Username cannot be empty".to_string()));
    }

    if username.len() > MAX_USERNAME_LEN {
        return Err(Error::InvalidInput("Username too long".to_string()));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(Error::InvalidInput(
            "Username contains invalid characters".to_string(),
        ));
    }

    Ok(())
}

fn short(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::ChaumPedersen;

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a.b-c_9").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("alice bob").is_err());
        assert!(validate_username("ålice").is_err());
        assert!(validate_username(&"a".repeat(257)).is_err());
    }

    #[test]
    fn short_handles_small_tokens() {
        assert_eq!(short("abcdef0123456789"), "abcdef01");
        assert_eq!(short("abc"), "abc");
    }

    #[tokio::test]
    async fn degraded_mode_fails_fast() {
        let auth = Authenticator::degraded(
            ChaumPedersen::rfc5114(),
            &SessionSettings::default(),
        );
        assert!(auth.is_degraded());

        let one = BigUint::from(1u32);
        assert!(matches!(
            auth.register("alice", one.clone(), one.clone()).await,
            Err(Error::StoreUnavailable)
        ));
        assert!(matches!(
            auth.begin_authentication("alice", one.clone(), one.clone()).await,
            Err(Error::StoreUnavailable)
        ));
        assert!(matches!(
            auth.verify_authentication("id", one).await,
            Err(Error::StoreUnavailable)
        ));
        assert!(matches!(
            auth.validate_session("sid").await,
            Err(Error::StoreUnavailable)
        ));
        assert!(matches!(auth.logout("sid").await, Err(Error::StoreUnavailable)));
    }
}
