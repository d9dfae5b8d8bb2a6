/// Token-bucket request limiting.
pub mod rate_limit;
/// gRPC service implementation.
pub mod service;

pub use rate_limit::{CallKind, RateLimiter};
pub use service::AuthServiceImpl;
