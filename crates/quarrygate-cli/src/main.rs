//! `quarrygate` — boot-time wiring for the gateway binary: load
//! config, load the schema registry, construct the request pipeline's
//! shared state, and serve. Subcommands nest under `clap::Subcommand`.

mod config;
mod connection;
mod http_client;
mod mongo;
mod reload;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use quarrygate_api::auth::JwtVerifier;
use quarrygate_api::rate_limit::RateLimiter;
use quarrygate_api::state::AppState;
use quarrygate_procedures::{ExecutorConfig, NoopHooks, ProcedureExecutor};
use quarrygate_schema::SchemaRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "quarrygate")]
#[command(about = "Schema-driven REST gateway over MongoDB", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Path to the TOML config file.
        #[arg(short, long, default_value = "quarrygate.toml")]
        config: PathBuf,
    },
    /// Load and validate the schema registry without starting a server.
    Check {
        #[arg(short, long, default_value = "quarrygate.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config } => serve(config).await,
        Commands::Check { config } => check(config).await,
    }
}

async fn check(config_path: PathBuf) -> Result<()> {
    let config = config::ServerConfig::load(&config_path).context("loading config")?;
    let registry = SchemaRegistry::load_from_dirs(&config.collections_dir, &config.procedures_dir)
        .context("loading schema registry")?;
    println!(
        "ok: {} collections, {} procedures",
        registry.collection_names().count(),
        registry.procedure_names().count(),
    );
    Ok(())
}

async fn serve(config_path: PathBuf) -> Result<()> {
    let config = config::ServerConfig::load(&config_path).context("loading config")?;
    let addr = config.socket_addr().map_err(|err| anyhow::anyhow!(err))?;

    let registry = SchemaRegistry::load_from_dirs(&config.collections_dir, &config.procedures_dir)
        .context("loading schema registry")?;

    let connection = connection::Connection::new(&config.mongo_uri, connection::PoolConfig::default())
        .await
        .context("connecting to MongoDB")?;
    connection.ping().await.context("pinging MongoDB")?;

    let db = mongo::MongoExecutor::new(connection);
    let http = http_client::ReqwestHttpClient::new(Duration::from_secs(config.http_timeout_secs));
    let executor = ProcedureExecutor::new(db, http, NoopHooks, ExecutorConfig {
        default_step_timeout_ms: config.gateway.procedure_timeout_ms,
        ..ExecutorConfig::default()
    });

    let verifier = JwtVerifier::new(config.gateway.jwt_secret.clone(), config.role_hierarchy());
    let rate_limiter = RateLimiter::new(config.gateway.rate_limit_algorithm.into());

    let registry_cell = Arc::new(ArcSwap::from_pointee(registry));
    // Keep the watcher alive for the server's lifetime; dropping it would
    // stop hot-reload silently.
    let _watcher = if config.gateway.hot_reload.enabled {
        Some(
            reload::spawn(
                config.collections_dir.clone(),
                config.procedures_dir.clone(),
                Duration::from_millis(config.gateway.hot_reload.debounce_ms),
                registry_cell.clone(),
            )
            .context("starting schema hot-reload watcher")?,
        )
    } else {
        None
    };

    let state = AppState {
        registry_cell,
        config: Arc::new(config.gateway.clone()),
        verifier: Arc::new(verifier),
        rate_limiter: Arc::new(rate_limiter),
        executor: Arc::new(executor),
        started_at: std::time::Instant::now(),
    };

    let router = quarrygate_api::build_router(state);
    quarrygate_api::serve(router, addr).await.context("serving")
}
