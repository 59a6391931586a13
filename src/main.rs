use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use baas_api_rust::config::AppConfig;
use baas_api_rust::context::AppContext;
use baas_api_rust::database::{MemoryStore, PgStore, Store};
use baas_api_rust::server;
use baas_api_rust::services::{LogMailAdapter, StorePushController};

#[derive(Parser)]
#[command(name = "baas-api")]
#[command(about = "Backend-as-a-service REST API server")]
#[command(version)]
struct Args {
    #[arg(long, help = "Port to listen on (overrides PORT)")]
    port: Option<u16>,

    #[arg(long, help = "Path the REST API is mounted under (overrides BAAS_MOUNT_PATH)")]
    mount_path: Option<String>,

    #[arg(long, help = "YAML configuration file (overrides BAAS_CONFIG_FILE)")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, BAAS_MASTER_KEY, etc.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = AppConfig::load(|key| match (key, &args.config) {
        ("BAAS_CONFIG_FILE", Some(path)) => Some(path.clone()),
        _ => std::env::var(key).ok(),
    })
    .context("invalid configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(mount_path) = args.mount_path {
        config.server.mount_path = mount_path;
    }
    config.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Starting BaaS API in {:?} mode", config.environment);

    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let timeout = Duration::from_secs(config.database.connection_timeout);
            let store = PgStore::connect(url, config.database.max_connections, timeout)
                .await
                .context("failed to connect to PostgreSQL")?;
            tracing::info!("Using PostgreSQL store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; objects are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let port = config.server.port;
    let mount_path = config.server.mount_path.clone();
    let push_enabled = config.push.enabled;

    let mut ctx = AppContext::new(config, store.clone()).with_mail(Arc::new(LogMailAdapter));
    if push_enabled {
        ctx = ctx.with_push(Arc::new(StorePushController::new(store)));
    }

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("BaaS API listening on http://{}{}", bind_addr, mount_path);

    axum::serve(listener, server::app(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
