use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zkp_auth::proto::auth_server::AuthServer;
use zkp_auth::server::{AuthServiceImpl, RateLimiter};
use zkp_auth::sweeper::spawn_sweeper;
use zkp_auth::{store, AuthConfig, Authenticator, ChaumPedersen};

type Service = AuthServer<AuthServiceImpl<ChaumPedersen>>;

#[derive(Parser, Debug)]
#[command(name = "zkp-auth-server")]
#[command(about = "Chaum-Pedersen passwordless authentication server", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to, overriding the configuration file
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AuthConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        AuthConfig::default()
    });

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.metrics {
        config.metrics.enabled = true;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        return Err(format!("Invalid configuration: {e}").into());
    }

    let addr = config.server.addr()?;

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            Ok(()) => info!("Metrics server started on {metrics_addr}"),
            Err(e) => error!("Failed to start metrics server: {e}"),
        }
    }

    let store = match store::connect(&config.database).await {
        Ok(store) => {
            info!(backend = ?config.database.backend, "Session store connected");
            Some(store)
        }
        Err(e) => {
            warn!(error = %e, "Session store unavailable, starting in degraded mode");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = store.clone().map(|store| {
        spawn_sweeper(store, config.sessions.sweep_interval(), shutdown_rx.clone())
    });

    let auth = Authenticator::with_store(ChaumPedersen::rfc5114(), store.clone(), &config.sessions);
    let degraded = auth.is_degraded();
    let rate_limiter = RateLimiter::new(&config.rate_limit);
    let service = AuthServiceImpl::new(auth, rate_limiter);

    let (mut health_reporter, health_service) = health_reporter();
    if degraded {
        health_reporter.set_not_serving::<Service>().await;
    } else {
        health_reporter.set_serving::<Service>().await;
    }

    let mut builder = Server::builder();
    if config.tls.enabled {
        let cert = tokio::fs::read(&config.tls.cert_path).await?;
        let key = tokio::fs::read(&config.tls.key_path).await?;
        builder = builder.tls_config(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))?;
        info!("TLS enabled");
    }

    info!(
        %addr,
        rpm = config.rate_limit.requests_per_minute,
        burst = config.rate_limit.burst,
        verifications_per_minute = config.rate_limit.verifications_per_minute,
        degraded,
        "Server starting"
    );

    let result = builder
        .add_service(health_service)
        .add_service(AuthServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal(health_reporter))
        .await;

    let _ = shutdown_tx.send(true);
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!("Sweeper task failed during shutdown: {e}");
        }
    }
    if let Some(store) = store {
        store.close().await;
    }

    match result {
        Ok(()) => {
            info!("Server shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {e}");
            Err(e.into())
        }
    }
}

async fn shutdown_signal(mut health_reporter: HealthReporter) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    health_reporter.set_not_serving::<Service>().await;

    info!("Initiating graceful shutdown (allowing in-flight requests to complete)");

    tokio::time::sleep(Duration::from_secs(2)).await;
}
