//! leadflow CLI entry point.
//!
//! Provides `serve`, `migrate`, and `check-config` subcommands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use leadflow::config::Config;
use leadflow::leads::store::{self, LeadStore, SqliteLeadStore};
use leadflow::outbound::broadcast::Broadcaster;
use leadflow::outbound::Transports;
use leadflow::pipeline::delivery_log::DeliveryLog;
use leadflow::pipeline::dispatch::ReplyTexts;
use leadflow::pipeline::router::EventRouter;
use leadflow::pipeline::Timeouts;
use leadflow::server::{build_router, AppState};
use leadflow::templates::store::SqliteTemplateStore;

/// leadflow: multi-channel lead capture.
#[derive(Parser)]
#[command(name = "leadflow", version, about)]
struct Cli {
    /// Config file (defaults to `$LEADFLOW_CONFIG_PATH` or `./leadflow.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve,
    /// Apply database migrations and exit.
    Migrate,
    /// Validate configuration and report problems.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to load .env: {e}");
        }
    }
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => handle_serve(cli.config.as_deref()).await,
        Command::Migrate => handle_migrate(cli.config.as_deref()).await,
        Command::CheckConfig => handle_check_config(cli.config.as_deref()),
    }
}

/// Run the HTTP server until Ctrl-C.
async fn handle_serve(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;
    let _logging_guard =
        leadflow::logging::init_production(config.server.logs_dir.as_deref(), &config.server.log_level)?;

    for warning in config.warnings() {
        warn!("{warning}");
    }

    let pool = store::open_pool(&config.storage.database_path, config.storage.max_connections)
        .await
        .with_context(|| format!("failed to open {}", config.storage.database_path))?;
    store::migrate(&pool).await.context("failed to migrate database")?;

    let lead_store: Arc<dyn LeadStore> = Arc::new(SqliteLeadStore::new(pool.clone()));
    let templates = SqliteTemplateStore::new(pool.clone());
    let transports = Transports::from_config(&config);
    let timeouts = Timeouts::from(&config.timeouts);
    let delivery_log = config
        .delivery_log
        .enabled
        .then(|| DeliveryLog::new(pool.clone(), config.delivery_log.capacity));

    let router = EventRouter::with_parts(
        &config,
        Arc::clone(&lead_store),
        transports.clone(),
        ReplyTexts::from_config(&config),
        timeouts,
        delivery_log,
    );
    let broadcaster = Broadcaster::new(
        Arc::clone(&lead_store),
        transports,
        Duration::from_millis(config.broadcast.delay_ms),
        timeouts.send,
    );
    let app = build_router(
        AppState::new(router, lead_store, broadcaster, templates)
            .with_webhook_body_limit(config.server.webhook_body_limit_bytes),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "leadflow listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(leadflow::server::shutdown_signal())
        .await
        .context("server error")?;

    pool.close().await;
    info!("leadflow stopped");
    Ok(())
}

/// Apply migrations and exit.
async fn handle_migrate(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;
    leadflow::logging::init_cli(&config.server.log_level);

    let pool = store::open_pool(&config.storage.database_path, 1)
        .await
        .with_context(|| format!("failed to open {}", config.storage.database_path))?;
    store::migrate(&pool).await.context("failed to migrate database")?;
    pool.close().await;
    info!(path = %config.storage.database_path, "migrations applied");
    Ok(())
}

/// Print the resolved configuration (secrets redacted) and any warnings.
fn handle_check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load configuration")?;
    leadflow::logging::init_cli(&config.server.log_level);

    println!("bind:          {}", config.server.bind);
    println!("database:      {}", config.storage.database_path);
    println!("delivery log:  {} (capacity {})", config.delivery_log.enabled, config.delivery_log.capacity);
    for channel in leadflow::leads::Channel::ALL {
        let resolved = config.channel(channel);
        println!(
            "{:<14} enabled={} verify_token={} sender={}",
            format!("{channel}:"),
            resolved.enabled,
            if resolved.verify_token.is_some() { "set" } else { "unset" },
            if resolved.can_send() { "configured" } else { "none" },
        );
    }

    let warnings = config.warnings();
    if warnings.is_empty() {
        println!("config OK");
    } else {
        for warning in &warnings {
            println!("warning: {warning}");
        }
    }
    Ok(())
}
