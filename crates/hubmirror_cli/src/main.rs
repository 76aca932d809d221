//! Hubmirror CLI - runs the incremental sync engine.

mod config;
mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hubmirror::{GitHubGateway, SqlStore, SyncService};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "hubmirror")]
#[command(version)]
#[command(about = "Incremental GitHub mirror with a delta-sync protocol")]
#[command(
    long_about = "Hubmirror continuously polls the GitHub API for tracked users, \
organizations, and repositories, mirrors what changed into a local database, \
and serves connected clients an ordered, resumable delta log."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Onboard a credential: resolve the user and spider their data
    Onboard {
        /// Personal access token to onboard
        token: String,
    },
    /// Run the polling engine for all configured credentials
    Serve,
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Rollback the last migration
    Down,
    /// Show migration status
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Migrate { action } => run_migrate(&config, action).await,
        Commands::Onboard { token } => run_onboard(&config, token).await,
        Commands::Serve => run_serve(&config).await,
    }
}

async fn run_migrate(
    config: &Config,
    action: MigrateAction,
) -> Result<(), Box<dyn std::error::Error>> {
    use hubmirror::migration::{Migrator, MigratorTrait};

    let db = hubmirror::connect(&config.database_url()).await?;
    match action {
        MigrateAction::Up => {
            Migrator::up(&db, None).await?;
            println!("Migrations applied");
        }
        MigrateAction::Down => {
            Migrator::down(&db, Some(1)).await?;
            println!("Rolled back one migration");
        }
        MigrateAction::Status => {
            let pending = Migrator::get_pending_migrations(&db).await?;
            if pending.is_empty() {
                println!("Schema is up to date");
            } else {
                println!("{} pending migration(s)", pending.len());
            }
        }
    }
    Ok(())
}

async fn build_service(config: &Config) -> Result<SyncService, Box<dyn std::error::Error>> {
    let db = hubmirror::connect_and_migrate(&config.database_url()).await?;
    let store = Arc::new(SqlStore::new(db));

    let gateway = match &config.github.api_base {
        Some(base) => GitHubGateway::with_api_base(base.clone(), config.sync.requests_per_second)?,
        None => GitHubGateway::new(config.sync.requests_per_second)?,
    };

    Ok(SyncService::new(
        store,
        Arc::new(gateway),
        config.sync.to_sync_config(),
    ))
}

async fn run_onboard(config: &Config, token: String) -> Result<(), Box<dyn std::error::Error>> {
    shutdown::setup_shutdown_handler();
    let service = build_service(config).await?;

    service.onboard(token);
    tracing::info!("onboarding started, spidering until idle or Ctrl+C");

    // The cascade runs in the background; give it a window to finish and let
    // Ctrl+C end it early.
    tokio::select! {
        _ = shutdown::wait_for_shutdown() => {}
        _ = tokio::time::sleep(Duration::from_secs(300)) => {}
    }
    Ok(())
}

async fn run_serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    shutdown::setup_shutdown_handler();
    let service = build_service(config).await?;

    let tokens = config.github.all_tokens();
    if tokens.is_empty() {
        tracing::warn!("no credentials configured; nothing to poll");
    }
    for token in tokens {
        service.onboard(token);
    }

    // Re-signal interest periodically so agents stay active while we run.
    let period = config.sync.to_sync_config().poll_period;
    let mut keepalive = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown::wait_for_shutdown() => break,
            _ = keepalive.tick() => {
                match service.poll_all_users().await {
                    Ok(polled) => tracing::debug!(
                        polled,
                        active = service.registry().active_count(),
                        "engine running"
                    ),
                    Err(error) => tracing::warn!(%error, "poll sweep failed"),
                }
            }
        }
    }

    tracing::info!("shutting down");
    Ok(())
}
