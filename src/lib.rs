//! Passwordless authentication with the interactive Chaum-Pedersen protocol.
//!
//! A client proves knowledge of a secret exponent `x` behind its enrollment
//! key `(y1, y2) = (g^x, h^x)` without ever sending `x`. The crate is built
//! around three pieces:
//!
//! - [`proof`]: the Proof Engine contract and a `num-bigint` implementation.
//! - [`store`]: the transactional Session Store holding users, in-flight
//!   challenges and active sessions (SQLite or PostgreSQL through `sqlx`).
//! - [`auth`]: the stateless orchestrator sequencing the two into the
//!   register / challenge / verify phases.
//!
//! The `grpc` feature adds a `tonic` transport and the server and client
//! binaries.

#![warn(missing_docs)]

/// Protocol orchestration.
pub mod auth;
/// Service configuration.
pub mod config;
/// Error types.
pub mod error;
/// Shared randomness.
pub mod primitives;
/// Proof Engine contract and implementation.
pub mod proof;
/// Session Store contract and backends.
pub mod store;
/// Background expiry sweep.
pub mod sweeper;

#[cfg(feature = "grpc")]
/// gRPC transport.
pub mod server;

#[cfg(feature = "grpc")]
#[allow(missing_docs)]
/// Generated protobuf types.
pub mod proto {
    tonic::include_proto!("zkp_auth");
}

pub use auth::{Authenticator, IssuedChallenge};
pub use config::AuthConfig;
pub use error::{Error, Result};
pub use primitives::SecureRng;
pub use proof::{ChaumPedersen, ProofEngine, PublicKey, Transcript};
pub use store::{ActiveSession, AuthChallenge, SessionStore, SweepStats, User};
