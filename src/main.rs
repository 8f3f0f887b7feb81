//! Main entry point for the lobby-ledger service
//!
//! Initializes logging and configuration, runs the coordinator behind the
//! AMQP consumer and shuts everything down gracefully on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use lobby_ledger::config::{validate_config, AppConfig};
use lobby_ledger::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Lobby Ledger - game listings, match reports and ratings for a lobby room
#[derive(Parser)]
#[command(
    name = "lobby-ledger",
    version,
    about = "Lobby coordination service for game listings, match reports and ELO ratings",
    long_about = "Lobby Ledger consumes presence events and client commands from AMQP, keeps the \
                 list of hosted games, reconciles the end-of-match reports sent by every \
                 participant and maintains ELO-style ratings for 1v1 games."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Metrics port override
    #[arg(long, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// SQLite database override
    #[arg(long, value_name = "FILE", help = "Persist matches and ratings to this SQLite file")]
    database: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    // Components are probed without consuming the command queue
    let app_state = Arc::new(AppState::new(config).await?);
    let health = HealthCheck::check(app_state.clone()).await;
    app_state.shutdown().await?;

    match health {
        Ok(health) => {
            let status = health
                .checks
                .iter()
                .filter(|check| check.name != "service_running")
                .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

            println!("Health Check: {}", status);
            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_deref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }

            if status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Lobby Ledger");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Metrics port: {}", config.service.metrics_port);
    info!("   AMQP: {}", config.amqp.url);
    info!(
        "   Queues: {} -> {}",
        config.amqp.command_queue, config.amqp.exchange_name
    );
    match &config.storage.database_path {
        Some(path) => info!("   Database: {}", path.display()),
        None => info!("   Database: in-memory"),
    }
    info!(
        "   Limits: {} listings, {} pending matches",
        config.registry.max_listings, config.registry.max_pending_matches
    );
}

/// Load configuration from file or environment and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }

    if let Some(database) = &args.database {
        config.storage.database_path = Some(database.clone());
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful - exiting without starting service");
        return Ok(());
    }

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        if let Err(e) = app_state.shutdown().await {
            warn!("Cleanup after failed start also failed: {}", e);
        }
        std::process::exit(1);
    }

    info!("Lobby Ledger is running, press Ctrl+C to shut down");

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    Ok(())
}
