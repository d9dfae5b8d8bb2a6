//! Layered service configuration: defaults, TOML file, then `ZKP_AUTH_` environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable prefix for every configuration key.
pub const ENV_PREFIX: &str = "ZKP_AUTH_";

const SSL_MODES: &[&str] = &[
    "disable",
    "allow",
    "prefer",
    "require",
    "verify-ca",
    "verify-full",
];

/// Top-level configuration for the authentication service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Listener configuration.
    pub server: ServerSettings,
    /// Session store connection and pool bounds.
    pub database: DatabaseSettings,
    /// Challenge and session lifetimes.
    pub sessions: SessionSettings,
    /// Rate limiting configuration.
    pub rate_limit: RateLimitSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
    /// TLS configuration.
    pub tls: TlsSettings,
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
        }
    }
}

impl ServerSettings {
    /// Converts host and port into a socket address.
    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("Invalid server address {}:{}: {e}", self.host, self.port))
    }
}

/// Relational backend holding users, challenges and sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Embedded SQLite database file.
    Sqlite,
    /// PostgreSQL server.
    Postgres,
}

/// Session store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Which backend to connect to.
    pub backend: Backend,
    /// SQLite database file. Ignored for Postgres.
    pub path: PathBuf,
    /// Postgres host.
    pub host: String,
    /// Postgres port.
    pub port: u16,
    /// Postgres user.
    pub user: String,
    /// Postgres password.
    pub password: String,
    /// Postgres database name.
    pub name: String,
    /// Postgres TLS mode (`disable`, `prefer`, `require`, ...).
    pub ssl_mode: String,
    /// Connection pool bounds.
    pub pool: PoolSettings,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Postgres,
            path: PathBuf::from("data/zkp_auth.db"),
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            name: "zkp_auth".to_string(),
            ssl_mode: "disable".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

impl DatabaseSettings {
    /// SQLite settings for the given database file, with default pool bounds.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Sqlite,
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Connection pool bounds. Every limit is finite so load cannot grow the pool
/// without bound.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum open connections.
    pub max_connections: u32,
    /// Idle connections kept warm.
    pub min_connections: u32,
    /// Idle connections above the floor are closed after this long.
    pub idle_timeout_secs: u64,
    /// Connections are recycled after this long regardless of use.
    pub max_lifetime_secs: u64,
    /// How long a caller waits for a free connection.
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 25,
            min_connections: 5,
            idle_timeout_secs: 60,
            max_lifetime_secs: 300,
            acquire_timeout_secs: 5,
        }
    }
}

/// Protocol lifetimes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Absolute lifetime of an authentication challenge.
    pub challenge_ttl_secs: u64,
    /// Absolute lifetime of an active session.
    pub session_ttl_secs: u64,
    /// Interval between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Deadline for a single store operation.
    pub operation_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            challenge_ttl_secs: 300,
            session_ttl_secs: 86_400,
            sweep_interval_secs: 60,
            operation_timeout_ms: 5_000,
        }
    }
}

impl SessionSettings {
    /// Challenge lifetime.
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    /// Session lifetime.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Per-operation store deadline.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Rate limiting settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sustained rate for every RPC.
    pub requests_per_minute: u64,
    /// Burst capacity for every RPC.
    pub burst: u64,
    /// Sustained rate for challenge answers, which run the proof check.
    pub verifications_per_minute: u64,
    /// Burst capacity for challenge answers.
    pub verification_burst: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            burst: 10,
            verifications_per_minute: 30,
            verification_burst: 5,
        }
    }
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

impl MetricsSettings {
    /// Converts host and port into a socket address for the metrics server.
    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("Invalid metrics address {}:{}: {e}", self.host, self.port))
    }
}

/// TLS configuration settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Whether TLS is enabled.
    pub enabled: bool,
    /// Path to TLS certificate file (PEM format).
    pub cert_path: String,
    /// Path to TLS private key file (PEM format).
    pub key_path: String,
}

impl AuthConfig {
    /// Loads configuration from `.env` file, TOML file, and environment variables.
    ///
    /// Configuration priority (highest to lowest):
    /// 1. Environment variables with `ZKP_AUTH_` prefix, `__` between sections
    ///    (e.g., `ZKP_AUTH_DATABASE__HOST=db.internal`)
    /// 2. TOML configuration file (if exists)
    /// 3. `.env` file (if exists)
    /// 4. Built-in defaults
    ///
    /// The TOML file path can be set via `ZKP_AUTH_CONFIG_PATH`. If not set,
    /// defaults to `./config/auth.toml`. A missing file is skipped.
    ///
    /// # Environment Variable Examples
    /// ```bash
    /// ZKP_AUTH_SERVER__PORT=50051
    /// ZKP_AUTH_DATABASE__BACKEND=postgres
    /// ZKP_AUTH_DATABASE__PASSWORD=secret
    /// ZKP_AUTH_DATABASE__POOL__MAX_CONNECTIONS=25
    /// ZKP_AUTH_SESSIONS__CHALLENGE_TTL_SECS=300
    /// ```
    ///
    /// # Errors
    /// Returns an error if the configuration is malformed or contains invalid values.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        // Attempt to load .env file (silently ignore if it doesn't exist)
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("ZKP_AUTH_CONFIG_PATH")
            .unwrap_or_else(|_| "config/auth.toml".to_string());

        Figment::from(Serialized::defaults(AuthConfig::default()))
            .merge(Toml::file(&config_path))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["CONFIG_PATH"])
                    .split("__"),
            )
            .extract()
    }

    /// Validates the configuration for production readiness.
    ///
    /// # Errors
    /// Returns an error message if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tls.enabled {
            if self.tls.cert_path.is_empty() {
                return Err("TLS is enabled but cert_path is empty".to_string());
            }
            if self.tls.key_path.is_empty() {
                return Err("TLS is enabled but key_path is empty".to_string());
            }
            if !PathBuf::from(&self.tls.cert_path).exists() {
                return Err(format!(
                    "TLS certificate file does not exist: {}",
                    self.tls.cert_path
                ));
            }
            if !PathBuf::from(&self.tls.key_path).exists() {
                return Err(format!(
                    "TLS key file does not exist: {}",
                    self.tls.key_path
                ));
            }
        }

        let sessions = &self.sessions;
        if sessions.challenge_ttl_secs == 0 {
            return Err("challenge_ttl_secs cannot be zero".to_string());
        }
        if sessions.session_ttl_secs == 0 {
            return Err("session_ttl_secs cannot be zero".to_string());
        }
        if sessions.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs cannot be zero".to_string());
        }
        if sessions.operation_timeout_ms == 0 {
            return Err("operation_timeout_ms cannot be zero".to_string());
        }

        let pool = &self.database.pool;
        if pool.max_connections == 0 {
            return Err("Pool max_connections cannot be zero".to_string());
        }
        if pool.min_connections > pool.max_connections {
            return Err("Pool min_connections exceeds max_connections".to_string());
        }
        if pool.max_lifetime_secs == 0 || pool.idle_timeout_secs == 0 {
            return Err("Pool lifetimes cannot be zero".to_string());
        }

        if self.database.backend == Backend::Postgres
            && !SSL_MODES.contains(&self.database.ssl_mode.as_str())
        {
            return Err(format!("Unknown ssl_mode: {}", self.database.ssl_mode));
        }

        if self.rate_limit.requests_per_minute == 0 {
            return Err("Rate limit requests_per_minute cannot be zero".to_string());
        }

        if self.rate_limit.burst == 0 {
            return Err("Rate limit burst cannot be zero".to_string());
        }

        if self.rate_limit.verifications_per_minute == 0 || self.rate_limit.verification_burst == 0 {
            return Err("Verification rate limit cannot be zero".to_string());
        }

        Ok(())
    }
}
