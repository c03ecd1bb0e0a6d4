use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use traffic_api::{build_router, AppState};
use traffic_common::AppConfig;
use traffic_engine::{Scheduler, StoreExecutor};
use traffic_store::PgStore;

#[derive(Parser)]
#[command(name = "traffic-api", about = "Traffic control network HTTP API")]
struct Cli {
    /// Bind host, overrides WEB_HOST
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides WEB_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Do not run schema migrations on startup
    #[arg(long)]
    skip_migrations: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    info!(max_connections = config.db_max_connections, "Connected to database");

    if cli.skip_migrations {
        info!("Skipping migrations");
    } else {
        PgStore::migrate(&pool).await?;
        info!("Migrations complete");
    }

    let store = Arc::new(PgStore::connect(pool).await?);
    let (scheduler, worker) = Scheduler::spawn(StoreExecutor::new(store.clone(), store.clone()));
    let state = Arc::new(AppState::new(store.clone(), scheduler, config.engine.clone()));
    let app = build_router(state);

    let host = cli.host.unwrap_or(config.web_host);
    let port = cli.port.unwrap_or(config.web_port);
    let addr = format!("{host}:{port}");
    info!("Traffic API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Pending reverts and reopens are in memory only; they die with the process.
    worker.abort();
    store.pool().close().await;
    info!("Traffic API stopped");

    Ok(())
}
