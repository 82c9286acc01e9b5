//! Database layer — migrations, the campaign store, the donation ledger,
//! reconciliation records, and the operator queue.

use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqliteExecutor, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{
    AggregateOutcome, Campaign, Donation, LedgerOutcome, OperatorQueueEntry,
    PaymentConfirmation, ReconciliationRecord,
};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Campaign store
// ─────────────────────────────────────────────────────────

/// Insert a campaign row. Campaign authoring itself is handled elsewhere;
/// this exists for seeding and tests.
pub async fn insert_campaign(pool: &SqlitePool, campaign: &Campaign) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO campaigns
            (id, name, description, category, goal_cents, raised_cents,
             status, organizer_id, end_date, version, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&campaign.id)
    .bind(&campaign.name)
    .bind(&campaign.description)
    .bind(&campaign.category)
    .bind(campaign.goal_cents)
    .bind(campaign.raised_cents)
    .bind(&campaign.status)
    .bind(&campaign.organizer_id)
    .bind(campaign.end_date)
    .bind(campaign.version)
    .bind(campaign.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a campaign by id.
pub async fn get_campaign(
    executor: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<Campaign>> {
    let row = sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, name, description, category, goal_cents, raised_cents,
               status, organizer_id, end_date, version, created_at
        FROM   campaigns
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// Conditionally add `amount_cents` to a campaign's raised total.
///
/// The write only lands if the stored `version` still equals
/// `expected_version`; two racing increments cannot both succeed against
/// the same revision, so no update is ever lost. Returns the new
/// `(version, raised_cents)` on success, `None` on a version conflict.
pub async fn conditional_increment_raised(
    executor: impl SqliteExecutor<'_>,
    campaign_id: &str,
    amount_cents: i64,
    expected_version: i64,
) -> Result<Option<(i64, i64)>> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        r#"
        UPDATE campaigns
        SET    raised_cents = raised_cents + ?1,
               version      = version + 1
        WHERE  id = ?2 AND version = ?3
        RETURNING version, raised_cents
        "#,
    )
    .bind(amount_cents)
    .bind(campaign_id)
    .bind(expected_version)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// Overwrite a campaign's raised total with a recomputed value.
/// Only `reconcile` calls this; the version still advances so concurrent
/// conditional increments observe the write.
pub async fn overwrite_raised(
    executor: impl SqliteExecutor<'_>,
    campaign_id: &str,
    raised_cents: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE campaigns SET raised_cents = ?1, version = version + 1 WHERE id = ?2",
    )
    .bind(raised_cents)
    .bind(campaign_id)
    .execute(executor)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Donation ledger
// ─────────────────────────────────────────────────────────

/// Append a completed donation to the ledger.
///
/// The insert is keyed on the unique `payment_ref`, so replaying it after a
/// crash (row written, outcome marker lost) is harmless: the existing row
/// is returned instead of a duplicate being created.
pub async fn insert_donation(
    pool: &SqlitePool,
    conf: &PaymentConfirmation,
) -> Result<Donation> {
    sqlx::query(
        r#"
        INSERT INTO donations
            (payment_ref, campaign_id, donor_id, donor_name, amount_cents,
             message, anonymous, status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'completed', ?8)
        ON CONFLICT (payment_ref) DO NOTHING
        "#,
    )
    .bind(&conf.payment_ref)
    .bind(&conf.campaign_id)
    .bind(&conf.donor_id)
    .bind(&conf.donor_name)
    .bind(conf.amount_cents)
    .bind(&conf.message)
    .bind(conf.anonymous)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    let donation = find_donation_by_payment_ref(pool, &conf.payment_ref)
        .await?
        .ok_or_else(|| {
            crate::errors::PledgeError::TransientStorage(format!(
                "donation for {} not readable after insert",
                conf.payment_ref
            ))
        })?;
    Ok(donation)
}

/// Look up the ledger entry for an external charge, if any.
pub async fn find_donation_by_payment_ref(
    pool: &SqlitePool,
    payment_ref: &str,
) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, payment_ref, campaign_id, donor_id, donor_name,
               amount_cents, message, anonymous, status, created_at
        FROM   donations
        WHERE  payment_ref = ?1
        "#,
    )
    .bind(payment_ref)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Fetch completed donations for a campaign, newest first.
pub async fn list_completed_by_campaign(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, payment_ref, campaign_id, donor_id, donor_name,
               amount_cents, message, anonymous, status, created_at
        FROM   donations
        WHERE  campaign_id = ?1 AND status = 'completed'
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetch a donor's donations, newest first.
pub async fn list_donations_by_donor(
    pool: &SqlitePool,
    donor_id: &str,
) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, payment_ref, campaign_id, donor_id, donor_name,
               amount_cents, message, anonymous, status, created_at
        FROM   donations
        WHERE  donor_id = ?1
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .bind(donor_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sum of completed donation amounts for a campaign — the ground truth the
/// `raised_cents` aggregate is reconciled against.
pub async fn sum_completed_for_campaign(
    executor: impl SqliteExecutor<'_>,
    campaign_id: &str,
) -> Result<i64> {
    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(amount_cents), 0)
        FROM   donations
        WHERE  campaign_id = ?1 AND status = 'completed'
        "#,
    )
    .bind(campaign_id)
    .fetch_one(executor)
    .await?;
    Ok(total)
}

// ─────────────────────────────────────────────────────────
// Reconciliation records
// ─────────────────────────────────────────────────────────

/// Atomically claim a payment reference for processing.
///
/// Returns `true` if this call created the claim (the caller owns the
/// reference), `false` if it was already claimed by an earlier delivery.
pub async fn claim_payment_ref(
    pool: &SqlitePool,
    payment_ref: &str,
    campaign_id: &str,
) -> Result<bool> {
    let now = Utc::now().timestamp();
    let rows_affected = sqlx::query(
        r#"
        INSERT INTO reconciliation (payment_ref, campaign_id, claimed_at, updated_at)
        VALUES (?1, ?2, ?3, ?3)
        ON CONFLICT (payment_ref) DO NOTHING
        "#,
    )
    .bind(payment_ref)
    .bind(campaign_id)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected == 1)
}

/// Read the reconciliation record for a payment reference.
pub async fn get_reconciliation(
    executor: impl SqliteExecutor<'_>,
    payment_ref: &str,
) -> Result<Option<ReconciliationRecord>> {
    let row = sqlx::query_as::<_, ReconciliationRecord>(
        r#"
        SELECT payment_ref, campaign_id, ledger_outcome, aggregate_outcome,
               claimed_at, updated_at
        FROM   reconciliation
        WHERE  payment_ref = ?1
        "#,
    )
    .bind(payment_ref)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

pub async fn mark_ledger_outcome(
    pool: &SqlitePool,
    payment_ref: &str,
    outcome: LedgerOutcome,
) -> Result<()> {
    sqlx::query(
        "UPDATE reconciliation SET ledger_outcome = ?1, updated_at = ?2 WHERE payment_ref = ?3",
    )
    .bind(outcome.as_str())
    .bind(Utc::now().timestamp())
    .bind(payment_ref)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record the aggregate-update outcome. A `failed` mark never clobbers a
/// settle that a concurrent reconcile committed in the meantime.
pub async fn mark_aggregate_outcome(
    executor: impl SqliteExecutor<'_>,
    payment_ref: &str,
    outcome: AggregateOutcome,
) -> Result<()> {
    let sql = match outcome {
        AggregateOutcome::Ok => {
            "UPDATE reconciliation SET aggregate_outcome = 'ok', updated_at = ?1 \
             WHERE payment_ref = ?2"
        }
        AggregateOutcome::Failed => {
            "UPDATE reconciliation SET aggregate_outcome = 'failed', updated_at = ?1 \
             WHERE payment_ref = ?2 AND (aggregate_outcome IS NULL OR aggregate_outcome = 'failed')"
        }
    };
    sqlx::query(sql)
        .bind(Utc::now().timestamp())
        .bind(payment_ref)
        .execute(executor)
        .await?;
    Ok(())
}

/// Campaigns with at least one record whose ledger write succeeded but
/// whose aggregate update did not — the sweep's work list.
pub async fn campaigns_needing_repair(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT campaign_id
        FROM   reconciliation
        WHERE  ledger_outcome = 'ok'
          AND  (aggregate_outcome IS NULL OR aggregate_outcome = 'failed')
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// After a reconcile, every ledger-ok record for the campaign is settled:
/// the recomputed total already reflects its donation.
pub async fn settle_campaign_records(
    executor: impl SqliteExecutor<'_>,
    campaign_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE reconciliation
        SET    aggregate_outcome = 'ok', updated_at = ?1
        WHERE  campaign_id = ?2 AND ledger_outcome = 'ok'
        "#,
    )
    .bind(Utc::now().timestamp())
    .bind(campaign_id)
    .execute(executor)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Operator queue
// ─────────────────────────────────────────────────────────

/// Park a rejected confirmation for operator review. The upstream charge
/// already went through, so rejections are never silently dropped.
pub async fn enqueue_rejection(
    pool: &SqlitePool,
    conf: &PaymentConfirmation,
    reason: &str,
) -> Result<()> {
    let payload = serde_json::to_string(conf)?;
    sqlx::query(
        r#"
        INSERT INTO operator_queue (payment_ref, reason, payload, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(&conf.payment_ref)
    .bind(reason)
    .bind(payload)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch queued rejections, oldest first.
pub async fn list_operator_queue(pool: &SqlitePool) -> Result<Vec<OperatorQueueEntry>> {
    let rows = sqlx::query_as::<_, OperatorQueueEntry>(
        r#"
        SELECT id, payment_ref, reason, payload, created_at
        FROM   operator_queue
        ORDER  BY created_at ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
