mod config;
mod game;
mod presence;
mod routes;
mod services;
mod state;
mod ws;

use std::sync::Arc;
use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use services::{IdentityService, LocalRoster, RecordService};
use state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "volley_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "volley_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("VOLLEY server v{} starting", env!("CARGO_PKG_VERSION"));

    // In production the identity and record collaborators live in the main
    // platform; the standalone binary runs against the in-process roster,
    // which accepts `user:Display Name` tokens.
    let roster = Arc::new(LocalRoster::permissive());
    tracing::info!("using in-process roster for identity and match records");

    let identity: Arc<dyn IdentityService> = roster.clone();
    let records: Arc<dyn RecordService> = roster;
    let state = AppState::new(identity, records);

    let app = routes::build_router(state);
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
