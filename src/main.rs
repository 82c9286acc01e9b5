//! Donation pledge processor — entry point.
//!
//! Accepts payment confirmations from the charge processor over a small
//! Axum API, records each one exactly once in the donation ledger, keeps
//! campaign totals consistent under concurrent pledges, and runs a
//! background reconciliation sweep that repairs any total that diverged
//! from the ledger after a partial failure.

mod api;
mod config;
mod db;
mod errors;
mod models;
mod notifier;
mod pledge;
mod sweep;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use pledge::PledgeContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // ─── Receipt notifier ─────────────────────────────────
    let transport = match &config.receipt_webhook_url {
        Some(url) => {
            let client = Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?;
            notifier::Transport::Webhook {
                client,
                url: url.clone(),
            }
        }
        None => notifier::Transport::Log,
    };
    let (notifier_handle, notifier_worker) = notifier::channel(
        transport,
        config.receipt_retry_attempts,
        Duration::from_secs(config.receipt_retry_delay_secs),
    );
    tokio::spawn(notifier_worker);

    // ─── Background reconciliation sweep ──────────────────
    let sweep_state = Arc::new(sweep::SweepState {
        pool: pool.clone(),
        interval_secs: config.sweep_interval_secs,
    });
    tokio::spawn(sweep::run(sweep_state));

    // ─── REST API ─────────────────────────────────────────
    let ctx = PledgeContext {
        pool,
        notifier: notifier_handle,
        aggregate_retry_attempts: config.aggregate_retry_attempts,
        aggregate_backoff: Duration::from_millis(config.aggregate_backoff_ms),
    };
    let api_state = Arc::new(api::ApiState { ctx });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/confirmations", post(api::post_confirmation))
        .route("/campaigns/:id", get(api::get_campaign))
        .route("/campaigns/:id/donations", get(api::get_campaign_donations))
        .route("/campaigns/:id/reconcile", post(api::post_reconcile))
        .route("/donors/:id/donations", get(api::get_donor_donations))
        .route("/operator/queue", get(api::get_operator_queue))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
