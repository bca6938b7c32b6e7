//! Tessera server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tessera_core::config::{AppConfig, RecoveryConfig};
use tessera_server::{AppState, CompletionDetector, SessionNotifier, create_router};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tessera - chunked file ingestion server
#[derive(Parser, Debug)]
#[command(name = "tessera-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TESSERA_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Override the bind address from configuration
    #[arg(long)]
    bind: Option<String>,
}

/// Load configuration: defaults, then the TOML file if present, then
/// `TESSERA_`-prefixed environment variables (`__` separates sections).
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    let config_path = std::path::Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("TESSERA_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}

/// Periodically retry finalize for stuck files and drop idle session
/// associations.
fn spawn_recovery_task(
    detector: Arc<CompletionDetector>,
    sessions: Arc<SessionNotifier>,
    config: RecoveryConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval());
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = detector
                .recover_stale(config.stale_after(), config.batch_size)
                .await
            {
                tracing::error!(error = %e, "Recovery sweep failed");
            }
            sessions.prune_idle(config.session_idle());
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tessera v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    tessera_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = tessera_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    // Fail fast rather than report healthy with unreachable storage.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = tessera_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let state = AppState::new(config.clone(), storage, metadata);

    if config.recovery.enabled {
        spawn_recovery_task(
            state.detector.clone(),
            state.sessions.clone(),
            config.recovery.clone(),
        );
        tracing::info!(
            interval_secs = config.recovery.interval_secs,
            stale_after_secs = config.recovery.stale_after_secs,
            "Recovery sweep enabled"
        );
    } else {
        tracing::info!("Recovery sweep disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(config: &str) -> Args {
        Args {
            config: config.to_string(),
            bind: None,
        }
    }

    #[test]
    fn load_config_without_file_uses_defaults() {
        let config = load_config(&args("/nonexistent/tessera.toml")).unwrap();
        assert_eq!(config.ingest.max_chunk_size, tessera_core::MAX_CHUNK_SIZE);
        assert!(config.recovery.enabled);
    }

    #[test]
    fn load_config_reads_toml_and_bind_override() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9000"
metrics_enabled = false

[ingest]
max_chunk_size = 1024

[storage]
type = "filesystem"
path = "/tmp/tessera"
"#,
        )
        .unwrap();

        let mut cli = args(path.to_str().unwrap());
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert!(!config.server.metrics_enabled);
        assert_eq!(config.ingest.max_chunk_size, 1024);

        cli.bind = Some("0.0.0.0:7000".to_string());
        assert_eq!(load_config(&cli).unwrap().server.bind, "0.0.0.0:7000");
    }

    #[test]
    fn load_config_rejects_invalid_values() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("server.toml");
        std::fs::write(&path, "[ingest]\nmax_chunk_size = 0\n").unwrap();
        assert!(load_config(&args(path.to_str().unwrap())).is_err());
    }
}
