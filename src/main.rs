use std::path::PathBuf;

use anyhow::{Context, Result};
use keygate::config::GatewayConfig;
use keygate::{host_api, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Library code logs through `log`; the subscriber picks those records up.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Config file: first CLI argument, else KEYGATE_CONFIG, else defaults + env.
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KEYGATE_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => GatewayConfig::default(),
    }
    .apply_env(|key| std::env::var(key).ok());

    let addr = config.bind_addr()?;
    let state = AppState::from_config(&config)?;

    let stats = state.issuer.pool_stats();
    let limits: Vec<String> = state.gate.limits().iter().map(|l| l.to_string()).collect();
    tracing::info!(
        keys = stats.total,
        limits = %limits.join(", "),
        upstream = %config.upstream_url,
        trust_forwarded_for = config.trust_forwarded_for,
        "keygate starting"
    );

    host_api::start_server(addr, state, shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))?;

    tracing::info!("keygate stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
            return;
        }
        tracing::info!("Received SIGINT (Ctrl+C)");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!("Received SIGTERM");
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
