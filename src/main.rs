//! Teams SSO demo app
//!
//! Serves a page that requires a Microsoft Teams sign-in and shows the
//! synchronized local user.

#![deny(clippy::all)]

mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use teams_sso::auth::RedirectTargets;
use teams_sso::profile::repository::JsonFileUserRepository;
use teams_sso::{AzureProvider, Config, LocalUserSync};

use server::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only warn if it exists but is broken
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nEdit config.toml or set the following environment variables:");
            eprintln!("  TEAMS_APP_ID=<your-azure-ad-app-id>");
            eprintln!("  TEAMS_APP_SECRET=<your-azure-ad-app-secret>");
            eprintln!("  TEAMS_TENANT_ID=<your-tenant-id>");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let provider = Arc::new(AzureProvider::new(&config)?);

    let repository = match config.users_file() {
        Some(path) => JsonFileUserRepository::new(path),
        None => JsonFileUserRepository::at_default_location()
            .context("No users_file configured and no data directory available")?,
    };
    info!("Local users stored at {:?}", repository.path());

    let state = Arc::new(AppState::new(
        provider,
        RedirectTargets::from_config(&config),
        LocalUserSync::new(repository),
    ));

    tokio::select! {
        result = server::serve(&config.app.bind_address, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

/// Log filter comes from `RUST_LOG`, falling back to the configured level.
fn init_logging(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}
