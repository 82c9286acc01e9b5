//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PledgeError {
    /// The confirmation references money that was charged but cannot be
    /// credited (bad amount, unknown or inactive campaign). Non-retryable;
    /// the confirmation is parked in the operator queue for review.
    #[error("Invalid donation: {0}")]
    InvalidDonation(String),

    /// Storage was unavailable or another delivery of the same payment
    /// reference is mid-flight. Always safe to retry the whole operation.
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// The conditional increment lost a version race. Retryable with backoff.
    #[error("Aggregate version conflict on campaign {0}")]
    AggregateConflict(String),

    /// The increment retry budget was exhausted after the ledger write
    /// succeeded. The donation stands; the reconciliation sweep repairs
    /// the campaign total.
    #[error("Aggregate update failed for campaign {0} after {1} attempts")]
    AggregateUpdateFailed(String, u32),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PledgeError {
    /// Whether the caller may safely re-deliver the confirmation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientStorage(_) | Self::AggregateConflict(_) | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PledgeError>;
