//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::db;
use crate::errors::PledgeError;
use crate::models::{Campaign, Donation, OperatorQueueEntry, PaymentConfirmation};
use crate::pledge::{self, PledgeContext};

#[derive(Clone)]
pub struct ApiState {
    pub ctx: PledgeContext,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PledgeResponse {
    pub donation: Donation,
    /// False while the campaign total is pending reconciliation; the
    /// donation itself is durably recorded either way.
    pub aggregate_applied: bool,
    pub deduplicated: bool,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub count: usize,
    pub donations: Vec<Donation>,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub campaign_id: String,
    pub raised_cents: i64,
}

#[derive(Serialize)]
pub struct OperatorQueueResponse {
    pub count: usize,
    pub entries: Vec<OperatorQueueEntry>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub retryable: bool,
}

fn error_response(e: PledgeError) -> axum::response::Response {
    let status = match &e {
        PledgeError::InvalidDonation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PledgeError::TransientStorage(_) | PledgeError::AggregateConflict(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            retryable: e.is_retryable(),
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /confirmations`
///
/// Intake for the payment-confirmation feed. Safe under redelivery: the
/// same payment reference is only ever credited once.
pub async fn post_confirmation(
    State(state): State<Arc<ApiState>>,
    Json(conf): Json<PaymentConfirmation>,
) -> impl IntoResponse {
    match pledge::process_confirmation(&state.ctx, &conf).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(PledgeResponse {
                donation: outcome.donation,
                aggregate_applied: outcome.aggregate_applied,
                deduplicated: outcome.deduplicated,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /campaigns/:id`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<String>,
) -> impl IntoResponse {
    match db::get_campaign(&state.ctx.pool, &campaign_id).await {
        Ok(Some(campaign)) => (StatusCode::OK, Json::<Campaign>(campaign)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("campaign {campaign_id} not found"),
                retryable: false,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /campaigns/:id/donations`
///
/// Completed donations for the campaign, newest first. This is a public
/// listing, so anonymous donors are masked.
pub async fn get_campaign_donations(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<String>,
) -> impl IntoResponse {
    match db::list_completed_by_campaign(&state.ctx.pool, &campaign_id).await {
        Ok(donations) => {
            let donations: Vec<Donation> = donations
                .into_iter()
                .map(Donation::masked_for_display)
                .collect();
            let count = donations.len();
            (StatusCode::OK, Json(DonationsResponse { count, donations })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /donors/:id/donations`
pub async fn get_donor_donations(
    State(state): State<Arc<ApiState>>,
    Path(donor_id): Path<String>,
) -> impl IntoResponse {
    match db::list_donations_by_donor(&state.ctx.pool, &donor_id).await {
        Ok(donations) => {
            let count = donations.len();
            (StatusCode::OK, Json(DonationsResponse { count, donations })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `POST /campaigns/:id/reconcile`
///
/// Manual repair: recompute the campaign total from the ledger.
pub async fn post_reconcile(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<String>,
) -> impl IntoResponse {
    match pledge::reconcile(&state.ctx.pool, &campaign_id).await {
        Ok(raised_cents) => (
            StatusCode::OK,
            Json(ReconcileResponse {
                campaign_id,
                raised_cents,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /operator/queue`
///
/// Rejected confirmations awaiting review — money moved upstream but
/// could not be credited.
pub async fn get_operator_queue(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    match db::list_operator_queue(&state.ctx.pool).await {
        Ok(entries) => {
            let count = entries.len();
            (StatusCode::OK, Json(OperatorQueueResponse { count, entries })).into_response()
        }
        Err(e) => error_response(e),
    }
}
