//! Token buckets in front of the RPC handlers.
//!
//! Every call draws from the shared request bucket. Answers to a challenge
//! also draw from a smaller verification bucket, since each one costs two
//! 2048-bit exponentiations on the blocking pool. A call is admitted only when
//! every bucket it needs has a token; a refused call takes nothing.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tokio::sync::Mutex;
use tonic::Status;
use tracing::debug;

use crate::config::RateLimitSettings;

/// Which budget a call is charged against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// Registration, challenge issuance, session checks and logout.
    Request,
    /// An answer to a challenge.
    Verification,
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn new(per_minute: u64, burst: u64, now: Instant) -> Self {
        Self {
            capacity: burst as f64,
            refill_per_sec: per_minute as f64 / 60.0,
            tokens: burst as f64,
            refilled_at: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.refilled_at {
            return;
        }
        let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.refilled_at = now;
    }

    fn has_token(&self) -> bool {
        self.tokens >= 1.0
    }
}

#[derive(Debug)]
struct Buckets {
    requests: Bucket,
    verifications: Bucket,
}

impl Buckets {
    fn admit(&mut self, kind: CallKind, now: Instant) -> Result<(), &'static str> {
        self.requests.refill(now);
        self.verifications.refill(now);

        if !self.requests.has_token() {
            return Err("Rate limit exceeded");
        }
        if kind == CallKind::Verification && !self.verifications.has_token() {
            return Err("Too many verification attempts");
        }

        self.requests.tokens -= 1.0;
        if kind == CallKind::Verification {
            self.verifications.tokens -= 1.0;
        }
        Ok(())
    }
}

/// Shared limiter; clones draw from the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<Buckets>>,
}

impl RateLimiter {
    /// Creates a limiter with full buckets.
    pub fn new(settings: &RateLimitSettings) -> Self {
        let now = Instant::now();
        Self {
            buckets: Arc::new(Mutex::new(Buckets {
                requests: Bucket::new(settings.requests_per_minute, settings.burst, now),
                verifications: Bucket::new(
                    settings.verifications_per_minute,
                    settings.verification_burst,
                    now,
                ),
            })),
        }
    }

    /// Admits one call of `kind` or answers `RESOURCE_EXHAUSTED`.
    pub async fn check(&self, kind: CallKind) -> Result<(), Status> {
        self.check_at(kind, Instant::now()).await
    }

    async fn check_at(&self, kind: CallKind, now: Instant) -> Result<(), Status> {
        let result = self.buckets.lock().await.admit(kind, now);
        result.map_err(|reason| {
            counter!("auth.rate_limited").increment(1);
            debug!(?kind, reason, "Call refused by rate limiter");
            Status::resource_exhausted(reason)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn settings(requests: u64, burst: u64, verifications: u64, verification_burst: u64) -> RateLimitSettings {
        RateLimitSettings {
            requests_per_minute: requests,
            burst,
            verifications_per_minute: verifications,
            verification_burst,
        }
    }

    #[tokio::test]
    async fn verification_budget_runs_out_first() {
        let limiter = RateLimiter::new(&settings(600, 20, 60, 3));
        let now = Instant::now();

        for _ in 0..3 {
            limiter.check_at(CallKind::Verification, now).await.unwrap();
        }
        let status = limiter
            .check_at(CallKind::Verification, now)
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
        assert_eq!(status.message(), "Too many verification attempts");

        // Other calls still have budget.
        limiter.check_at(CallKind::Request, now).await.unwrap();
    }

    #[tokio::test]
    async fn refused_verification_takes_no_request_token() {
        let limiter = RateLimiter::new(&settings(600, 3, 60, 1));
        let now = Instant::now();

        limiter.check_at(CallKind::Verification, now).await.unwrap();
        for _ in 0..5 {
            assert!(limiter.check_at(CallKind::Verification, now).await.is_err());
        }

        // One request token went to the admitted answer; two remain.
        limiter.check_at(CallKind::Request, now).await.unwrap();
        limiter.check_at(CallKind::Request, now).await.unwrap();
        let status = limiter.check_at(CallKind::Request, now).await.unwrap_err();
        assert_eq!(status.message(), "Rate limit exceeded");
    }

    #[tokio::test]
    async fn exhausted_requests_block_verifications_too() {
        let limiter = RateLimiter::new(&settings(60, 2, 60, 5));
        let now = Instant::now();

        limiter.check_at(CallKind::Request, now).await.unwrap();
        limiter.check_at(CallKind::Request, now).await.unwrap();
        let status = limiter
            .check_at(CallKind::Verification, now)
            .await
            .unwrap_err();
        assert_eq!(status.message(), "Rate limit exceeded");
    }

    #[tokio::test]
    async fn verification_budget_refills_at_its_own_rate() {
        let limiter = RateLimiter::new(&settings(6000, 100, 30, 1));
        let start = Instant::now();

        limiter.check_at(CallKind::Verification, start).await.unwrap();
        assert!(limiter
            .check_at(CallKind::Verification, start + Duration::from_secs(1))
            .await
            .is_err());

        // 30 per minute is one token every two seconds.
        limiter
            .check_at(CallKind::Verification, start + Duration::from_millis(2100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refill_never_exceeds_burst() {
        let limiter = RateLimiter::new(&settings(60, 2, 60, 2));
        let later = Instant::now() + Duration::from_secs(3600);

        limiter.check_at(CallKind::Request, later).await.unwrap();
        limiter.check_at(CallKind::Request, later).await.unwrap();
        assert!(limiter.check_at(CallKind::Request, later).await.is_err());
    }

    #[tokio::test]
    async fn clones_share_buckets() {
        let limiter = RateLimiter::new(&settings(60, 1, 60, 1));
        let other = limiter.clone();
        let now = Instant::now();

        limiter.check_at(CallKind::Request, now).await.unwrap();
        assert!(other.check_at(CallKind::Request, now).await.is_err());
    }
}
