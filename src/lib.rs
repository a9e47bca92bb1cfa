// Coin ledger and LLM generation proxy

pub mod api;
pub mod config;
pub mod db;
pub mod ledger;
pub mod proxy;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::AppState;
use crate::ledger::CoinLedger;
use crate::proxy::{router, GenerationProxy};

/// Startup options collected from the command line
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // Keep an already-installed subscriber
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

pub async fn run(options: ServerOptions) -> Result<()> {
    let config_path = options
        .config_path
        .unwrap_or_else(config::default_config_path);
    let created = !config_path.exists();

    let mut app_config = config::load_config(&config_path)?;

    init_tracing(app_config.debug);
    if created {
        tracing::info!("Created default config at {:?}", config_path);
    } else {
        tracing::info!("Loaded config from {:?}", config_path);
    }

    for note in config::apply_env_overrides(&mut app_config, |name| std::env::var(name).ok()) {
        tracing::warn!("Ignoring environment override: {}", note);
    }

    if let Some(host) = options.host {
        app_config.host = host;
    }
    if let Some(port) = options.port {
        app_config.port = port;
    }

    let ledger = CoinLedger::from_config(&app_config.ledger)?;
    let proxy = GenerationProxy::new(
        app_config.providers.clone(),
        app_config.generation.clone(),
    )?;

    for entry in router::describe_all(&app_config.providers) {
        if entry.configured {
            tracing::info!(
                "Provider {} ready: {} (fallback: {})",
                entry.provider,
                entry.model,
                entry.fallback_model.as_deref().unwrap_or("none")
            );
        } else {
            tracing::debug!("Provider {} has no API key", entry.provider);
        }
    }

    let state = AppState {
        ledger: Arc::new(ledger),
        proxy: Arc::new(proxy),
        config: Arc::new(app_config),
    };

    tokio::spawn(async {
        shutdown_signal().await;
        let _ = api::stop_server().await;
    });

    api::start_server(state).await
}
