//! Domain types: campaigns, the donation ledger, reconciliation records,
//! and the payment-confirmation wire shape.
//!
//! Monetary amounts are integer cents throughout. Timestamps are unix
//! seconds stored as `i64`.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a campaign. Only `active` campaigns accept pledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Awaiting moderation approval.
    Pending,
    /// Accepting donations.
    Active,
    /// Reached its goal or end date.
    Completed,
    /// Rejected by moderation.
    Rejected,
}

impl CampaignStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "active" => Self::Active,
            "completed" => Self::Completed,
            _ => Self::Rejected,
        }
    }

    /// Short identifier string suitable for storage in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }
}

/// Status of a ledger entry. The ledger is append-only: a row may move
/// `pending → completed` or `pending → failed` exactly once and its amount
/// and campaign never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Completed,
    Failed,
}

impl DonationStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A fundraising campaign as stored in / read from the database.
///
/// `raised_cents` is derived state: the sum of completed donation amounts.
/// It is mutated only through the conditional increment or `reconcile`.
/// `version` is the revision token those writes are conditioned on.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub goal_cents: i64,
    pub raised_cents: i64,
    pub status: String,
    pub organizer_id: String,
    pub end_date: i64,
    pub version: i64,
    pub created_at: i64,
}

impl Campaign {
    pub fn status(&self) -> CampaignStatus {
        CampaignStatus::from_str(&self.status)
    }
}

/// One confirmed contribution, as stored in / read from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: i64,
    /// Idempotency key: the upstream charge reference, unique per donation.
    pub payment_ref: String,
    pub campaign_id: String,
    pub donor_id: String,
    pub donor_name: String,
    pub amount_cents: i64,
    pub message: Option<String>,
    pub anonymous: bool,
    pub status: String,
    pub created_at: i64,
}

impl Donation {
    pub fn status(&self) -> DonationStatus {
        DonationStatus::from_str(&self.status)
    }

    /// Display form for public listings: an anonymous donor's gift stays
    /// visible but their identity does not.
    pub fn masked_for_display(mut self) -> Donation {
        if self.anonymous {
            self.donor_name = "Anonymous".to_string();
            self.donor_id = String::new();
        }
        self
    }
}

/// Outcome of the ledger-write step for a claimed payment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Ok,
    Failed,
    /// Rejected as invalid and parked in the operator queue.
    Invalid,
}

impl LedgerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Invalid => "invalid",
        }
    }
}

/// Outcome of the aggregate-update step for a claimed payment reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    Ok,
    Failed,
}

/// Tracks one payment reference through the processing state machine:
/// claimed → ledger {ok|failed|invalid} → aggregate {ok|failed}.
/// Terminal success is ledger `ok` + aggregate `ok`; anything else is
/// retryable or repaired by the reconciliation sweep.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReconciliationRecord {
    pub payment_ref: String,
    pub campaign_id: String,
    pub ledger_outcome: Option<String>,
    pub aggregate_outcome: Option<String>,
    pub claimed_at: i64,
    pub updated_at: i64,
}

impl ReconciliationRecord {
    pub fn aggregate_ok(&self) -> bool {
        self.aggregate_outcome.as_deref() == Some("ok")
    }
}

/// A payment confirmation as delivered by the external charge processor.
/// Delivery is at-least-once; `payment_ref` is the dedupe key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub payment_ref: String,
    pub campaign_id: String,
    pub donor_id: String,
    pub donor_name: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
}

/// A rejected confirmation awaiting operator review.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OperatorQueueEntry {
    pub id: i64,
    pub payment_ref: String,
    pub reason: String,
    pub payload: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn campaign_status_round_trips_through_storage_strings() {
        for status in [
            CampaignStatus::Pending,
            CampaignStatus::Active,
            CampaignStatus::Completed,
            CampaignStatus::Rejected,
        ] {
            assert_eq!(CampaignStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_campaign_status_maps_to_rejected() {
        assert_eq!(CampaignStatus::from_str("garbage"), CampaignStatus::Rejected);
    }

    #[test]
    fn anonymous_donation_is_masked_for_display() {
        let donation = Donation {
            id: 1,
            payment_ref: "p1".to_string(),
            campaign_id: "c1".to_string(),
            donor_id: "donor-1".to_string(),
            donor_name: "Ada".to_string(),
            amount_cents: 500,
            message: None,
            anonymous: true,
            status: "completed".to_string(),
            created_at: 0,
        };
        let named = Donation {
            anonymous: false,
            ..donation.clone()
        };

        let masked = donation.masked_for_display();
        assert_eq!(masked.donor_name, "Anonymous");
        assert_eq!(masked.donor_id, "");
        assert_eq!(masked.amount_cents, 500);

        let unmasked = named.masked_for_display();
        assert_eq!(unmasked.donor_name, "Ada");
        assert_eq!(unmasked.donor_id, "donor-1");
    }

    #[test]
    fn confirmation_deserializes_with_optional_fields_absent() {
        let conf: PaymentConfirmation = serde_json::from_str(
            r#"{"payment_ref":"p1","campaign_id":"c1","donor_id":"d1",
                "donor_name":"Ada","amount_cents":500}"#,
        )
        .unwrap();
        assert_eq!(conf.message, None);
        assert!(!conf.anonymous);
    }
}
