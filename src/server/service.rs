use num_bigint::BigUint;
use tonic::{Request, Response, Status};
use tracing::warn;

use super::rate_limit::{CallKind, RateLimiter};
use crate::error::AUTHENTICATION_FAILED;
use crate::proof::ProofEngine;
use crate::proto::auth_server::Auth;
use crate::proto::{
    AuthenticationAnswerRequest, AuthenticationAnswerResponse, AuthenticationChallengeRequest,
    AuthenticationChallengeResponse, LogoutResponse, RegisterRequest, RegisterResponse,
    SessionRequest, SessionResponse,
};
use crate::{Authenticator, Error};

const MAX_TOKEN_LEN: usize = 128;

/// gRPC service exposing the three protocol phases plus session checks.
pub struct AuthServiceImpl<E: ProofEngine> {
    auth: Authenticator<E>,
    rate_limiter: RateLimiter,
}

impl<E: ProofEngine> AuthServiceImpl<E> {
    /// Creates a new service over an authenticator and a shared rate limiter.
    pub fn new(auth: Authenticator<E>, rate_limiter: RateLimiter) -> Self {
        Self { auth, rate_limiter }
    }

    #[allow(clippy::result_large_err)]
    fn decode(&self, name: &str, bytes: &[u8]) -> Result<BigUint, Status> {
        if bytes.is_empty() {
            return Err(Status::invalid_argument(format!("Empty {name} value")));
        }

        if bytes.len() > self.auth.engine().element_len() {
            return Err(Status::invalid_argument(format!("{name} value too large")));
        }

        Ok(BigUint::from_bytes_be(bytes))
    }

    #[allow(clippy::result_large_err)]
    fn check_token(token: &str) -> Result<(), Status> {
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(Status::permission_denied(AUTHENTICATION_FAILED));
        }
        Ok(())
    }
}

/// Maps a core error to a status on the registration and challenge paths,
/// where precise feedback is safe.
fn status_for_setup(err: Error) -> Status {
    match err {
        Error::NotFound => Status::not_found("User not found"),
        Error::DuplicateUser => Status::already_exists(err.public_message()),
        Error::InvalidInput(_) => Status::invalid_argument(err.public_message()),
        other => status_for_infrastructure(other),
    }
}

/// Maps a core error on the verification and session paths. Every
/// authentication failure collapses into one status and message.
fn status_for_authentication(err: Error) -> Status {
    if err.is_authentication_failure() {
        return Status::permission_denied(AUTHENTICATION_FAILED);
    }
    match err {
        Error::InvalidInput(_) => Status::invalid_argument(err.public_message()),
        other => status_for_infrastructure(other),
    }
}

fn status_for_infrastructure(err: Error) -> Status {
    if err.is_retryable() {
        warn!(error = %err, "Request failed on unavailable dependency");
        Status::unavailable(err.public_message())
    } else {
        Status::internal(err.public_message())
    }
}

#[tonic::async_trait]
impl<E: ProofEngine> Auth for AuthServiceImpl<E> {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        self.rate_limiter.check(CallKind::Request).await?;

        let req = request.into_inner();
        let y1 = self.decode("y1", &req.y1)?;
        let y2 = self.decode("y2", &req.y2)?;

        self.auth
            .register(&req.user, y1, y2)
            .await
            .map_err(status_for_setup)?;

        Ok(Response::new(RegisterResponse {}))
    }

    async fn create_authentication_challenge(
        &self,
        request: Request<AuthenticationChallengeRequest>,
    ) -> Result<Response<AuthenticationChallengeResponse>, Status> {
        self.rate_limiter.check(CallKind::Request).await?;

        let req = request.into_inner();
        let r1 = self.decode("r1", &req.r1)?;
        let r2 = self.decode("r2", &req.r2)?;

        let issued = self
            .auth
            .begin_authentication(&req.user, r1, r2)
            .await
            .map_err(status_for_setup)?;

        Ok(Response::new(AuthenticationChallengeResponse {
            auth_id: issued.auth_id,
            c: issued.transcript.c.to_bytes_be(),
            r1: issued.transcript.r1.to_bytes_be(),
            r2: issued.transcript.r2.to_bytes_be(),
        }))
    }

    async fn verify_authentication(
        &self,
        request: Request<AuthenticationAnswerRequest>,
    ) -> Result<Response<AuthenticationAnswerResponse>, Status> {
        self.rate_limiter.check(CallKind::Verification).await?;

        let req = request.into_inner();
        Self::check_token(&req.auth_id)?;
        let s = self.decode("s", &req.s)?;

        let session_id = self
            .auth
            .verify_authentication(&req.auth_id, s)
            .await
            .map_err(status_for_authentication)?;

        Ok(Response::new(AuthenticationAnswerResponse { session_id }))
    }

    async fn validate_session(
        &self,
        request: Request<SessionRequest>,
    ) -> Result<Response<SessionResponse>, Status> {
        self.rate_limiter.check(CallKind::Request).await?;

        let req = request.into_inner();
        Self::check_token(&req.session_id)?;

        let session = self
            .auth
            .validate_session(&req.session_id)
            .await
            .map_err(status_for_authentication)?;

        let user = self
            .auth
            .user_by_id(session.user_id)
            .await
            .map_err(status_for_authentication)?;

        Ok(Response::new(SessionResponse {
            user: user.username,
            expires_at: session.expires_at.timestamp(),
        }))
    }

    async fn logout(
        &self,
        request: Request<SessionRequest>,
    ) -> Result<Response<LogoutResponse>, Status> {
        self.rate_limiter.check(CallKind::Request).await?;

        let req = request.into_inner();
        if req.session_id.len() <= MAX_TOKEN_LEN {
            self.auth
                .logout(&req.session_id)
                .await
                .map_err(status_for_authentication)?;
        }

        Ok(Response::new(LogoutResponse {}))
    }
}
