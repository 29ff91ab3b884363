//! Event registration service — entry point.
//!
//! Serves the public event pages with their multi-step registration form,
//! hands registrants off to the payment provider, and exposes the admin
//! console (event management, live registrant list, CSV export).

mod admin;
mod api;
mod auth;
mod changes;
mod config;
mod db;
mod errors;
mod models;
mod payment;
mod registrants;
mod registration;
mod sidebar;
mod stepper;
mod storage;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    // Shared HTTP client for the payment function.
    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;

    let state = Arc::new(api::AppState::new(pool, config.clone(), client));

    match (&config.admin_email, &config.admin_password) {
        (Some(email), Some(password)) => state.auth.ensure_admin(email, password).await?,
        _ => warn!("ADMIN_EMAIL / ADMIN_PASSWORD not set; existing admin accounts only"),
    }
    state.images.ensure_bucket().await?;

    // ─── Background session sweep ─────────────────────────
    let sweeper = state.auth.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match sweeper.purge_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Removed {n} expired admin sessions"),
                Err(e) => warn!("Session sweep failed: {e}"),
            }
        }
    });

    // ─── HTTP server ──────────────────────────────────────
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("Registrar listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
