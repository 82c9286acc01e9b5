//! The pledge-processing core.
//!
//! A confirmed external payment must end up in exactly two places: once in
//! the append-only donation ledger, and once in the campaign's `raised`
//! aggregate. The payment processor delivers confirmations at-least-once,
//! either write can fail independently, and confirmations for the same
//! campaign may race from replicated processes. This module makes that
//! safe:
//!
//! 1. every payment reference is claimed atomically before any write, so a
//!    redelivered confirmation finds the prior attempt instead of running
//!    again;
//! 2. the ledger insert is keyed on the payment reference, so it can be
//!    replayed without duplicating a donation;
//! 3. the aggregate increment is a version-conditioned write with bounded
//!    optimistic retry, so concurrent pledges never lose an update;
//! 4. when the increment fails after the ledger write landed, the donation
//!    stands — the ledger is the source of truth and [`reconcile`]
//!    recomputes the aggregate from it.

use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::db;
use crate::errors::{PledgeError, Result};
use crate::models::{
    AggregateOutcome, Campaign, CampaignStatus, Donation, LedgerOutcome, PaymentConfirmation,
};
use crate::notifier::{NotifierHandle, Receipt};

/// Everything a single confirmation needs to be processed.
#[derive(Clone)]
pub struct PledgeContext {
    pub pool: SqlitePool,
    pub notifier: NotifierHandle,
    /// Bounded attempts for the version-conditioned increment.
    pub aggregate_retry_attempts: u32,
    /// Base delay between conflict retries; doubles per attempt.
    pub aggregate_backoff: Duration,
}

/// What a processed confirmation produced.
#[derive(Debug, Clone)]
pub struct PledgeOutcome {
    pub donation: Donation,
    /// False when the increment retry budget ran out; the sweep will
    /// repair the campaign total from the ledger.
    pub aggregate_applied: bool,
    /// True when this confirmation was a redelivery of an already
    /// processed payment reference.
    pub deduplicated: bool,
}

/// Process one payment confirmation end to end.
///
/// Safe to invoke any number of times for the same `payment_ref`: exactly
/// one completed donation is ever created and the campaign total is
/// incremented exactly once.
pub async fn process_confirmation(
    ctx: &PledgeContext,
    conf: &PaymentConfirmation,
) -> Result<PledgeOutcome> {
    let claimed = db::claim_payment_ref(&ctx.pool, &conf.payment_ref, &conf.campaign_id).await?;
    if !claimed {
        if let Some(outcome) = resume_prior_attempt(ctx, conf).await? {
            return Ok(outcome);
        }
        // Prior attempt failed before the ledger write; fall through and
        // retry the full path under the existing claim.
    }

    let campaign = validate(ctx, conf).await?;

    // Ledger write. The insert replays cleanly on the retry path because
    // it is keyed on the payment reference.
    let donation = match db::insert_donation(&ctx.pool, conf).await {
        Ok(donation) => donation,
        Err(e) => {
            if let Err(mark_err) =
                db::mark_ledger_outcome(&ctx.pool, &conf.payment_ref, LedgerOutcome::Failed).await
            {
                warn!(
                    "Could not record ledger failure for {}: {mark_err}",
                    conf.payment_ref
                );
            }
            return Err(PledgeError::TransientStorage(e.to_string()));
        }
    };
    db::mark_ledger_outcome(&ctx.pool, &conf.payment_ref, LedgerOutcome::Ok).await?;

    // Aggregate update. A failure here never rolls the donation back.
    let aggregate_applied = match apply_increment(
        ctx,
        &conf.payment_ref,
        &conf.campaign_id,
        conf.amount_cents,
    )
    .await
    {
        Ok(IncrementOutcome::Applied(new_raised)) => {
            info!(
                "Pledge {} credited: campaign {} raised {} cents",
                conf.payment_ref, conf.campaign_id, new_raised
            );
            true
        }
        Ok(IncrementOutcome::AlreadySettled) => {
            info!(
                "Pledge {} settled by a concurrent reconcile of campaign {}",
                conf.payment_ref, conf.campaign_id
            );
            true
        }
        Err(e) => {
            db::mark_aggregate_outcome(&ctx.pool, &conf.payment_ref, AggregateOutcome::Failed)
                .await?;
            error!(
                "Aggregate update for {} diverged; awaiting reconciliation: {e}",
                conf.campaign_id
            );
            false
        }
    };

    ctx.notifier.enqueue(Receipt {
        donor_id: conf.donor_id.clone(),
        donor_name: conf.donor_name.clone(),
        campaign_name: campaign.name,
        amount_cents: conf.amount_cents,
    });

    Ok(PledgeOutcome {
        donation,
        aggregate_applied,
        deduplicated: false,
    })
}

/// Inspect an existing claim and decide whether the confirmation is a
/// settled duplicate, a resumable half-finished attempt, or a retryable
/// earlier failure (`None` — caller reruns the write path).
async fn resume_prior_attempt(
    ctx: &PledgeContext,
    conf: &PaymentConfirmation,
) -> Result<Option<PledgeOutcome>> {
    let record = db::get_reconciliation(&ctx.pool, &conf.payment_ref)
        .await?
        .ok_or_else(|| {
            PledgeError::TransientStorage(format!(
                "claim for {} vanished mid-flight",
                conf.payment_ref
            ))
        })?;
    let existing = db::find_donation_by_payment_ref(&ctx.pool, &conf.payment_ref).await?;

    match record.ledger_outcome.as_deref() {
        Some("invalid") => Err(PledgeError::InvalidDonation(format!(
            "payment {} was rejected and queued for operator review",
            conf.payment_ref
        ))),
        Some("failed") => Ok(None),
        Some("ok") => {
            let donation = existing.ok_or_else(|| {
                PledgeError::TransientStorage(format!(
                    "ledger marked ok but no donation for {}",
                    conf.payment_ref
                ))
            })?;
            if !record.aggregate_ok() {
                // The increment may or may not have landed before the
                // earlier attempt died. Re-adding would risk double
                // crediting, so recompute from the ledger instead.
                reconcile(&ctx.pool, &conf.campaign_id).await?;
            }
            Ok(Some(PledgeOutcome {
                donation,
                aggregate_applied: true,
                deduplicated: true,
            }))
        }
        _ => match existing {
            // Crashed between the insert and the outcome marker.
            Some(donation) => {
                db::mark_ledger_outcome(&ctx.pool, &conf.payment_ref, LedgerOutcome::Ok).await?;
                reconcile(&ctx.pool, &conf.campaign_id).await?;
                Ok(Some(PledgeOutcome {
                    donation,
                    aggregate_applied: true,
                    deduplicated: true,
                }))
            }
            // A concurrent delivery owns the claim right now.
            None => Err(PledgeError::TransientStorage(format!(
                "payment {} is being processed by another delivery",
                conf.payment_ref
            ))),
        },
    }
}

/// Reject an invalid confirmation: money already moved upstream, so the
/// event is parked for operator review rather than dropped.
async fn reject(ctx: &PledgeContext, conf: &PaymentConfirmation, reason: &str) -> PledgeError {
    let result: Result<()> = async {
        db::mark_ledger_outcome(&ctx.pool, &conf.payment_ref, LedgerOutcome::Invalid).await?;
        db::enqueue_rejection(&ctx.pool, conf, reason).await?;
        Ok(())
    }
    .await;
    if let Err(e) = result {
        error!(
            "Failed to queue rejected confirmation {} for review: {e}",
            conf.payment_ref
        );
    }
    warn!("Rejected confirmation {}: {reason}", conf.payment_ref);
    PledgeError::InvalidDonation(reason.to_string())
}

/// Precondition checks: positive amount, known and active campaign.
async fn validate(ctx: &PledgeContext, conf: &PaymentConfirmation) -> Result<Campaign> {
    if conf.amount_cents <= 0 {
        return Err(reject(
            ctx,
            conf,
            &format!("non-positive amount {}", conf.amount_cents),
        )
        .await);
    }
    let campaign = match db::get_campaign(&ctx.pool, &conf.campaign_id).await? {
        Some(campaign) => campaign,
        None => {
            return Err(reject(ctx, conf, &format!("unknown campaign {}", conf.campaign_id)).await)
        }
    };
    if campaign.status() != CampaignStatus::Active {
        return Err(reject(
            ctx,
            conf,
            &format!("campaign {} is {}, not active", campaign.id, campaign.status),
        )
        .await);
    }
    Ok(campaign)
}

/// What the increment step did for this payment.
enum IncrementOutcome {
    /// The conditional write landed; carries the new raised total.
    Applied(i64),
    /// A reconcile settled this payment's record first; its donation is
    /// already inside the recomputed total, so incrementing on top would
    /// double count.
    AlreadySettled,
}

/// Version-conditioned increment with bounded optimistic retry and
/// exponential backoff.
///
/// The increment and the record's `aggregate ok` marker commit in one
/// transaction, guarded on the record not having been settled underneath
/// by a concurrent reconcile. Without that guard, a sweep running between
/// the ledger write and this step would fold the donation into its
/// recomputed total and the increment here would then count it a second
/// time.
async fn apply_increment(
    ctx: &PledgeContext,
    payment_ref: &str,
    campaign_id: &str,
    amount_cents: i64,
) -> Result<IncrementOutcome> {
    let mut attempt = 0u32;
    while attempt < ctx.aggregate_retry_attempts {
        let mut tx = ctx.pool.begin().await?;

        let record = db::get_reconciliation(&mut *tx, payment_ref)
            .await?
            .ok_or_else(|| {
                PledgeError::TransientStorage(format!(
                    "claim for {payment_ref} vanished mid-flight"
                ))
            })?;
        if record.aggregate_ok() {
            tx.rollback().await?;
            return Ok(IncrementOutcome::AlreadySettled);
        }

        let campaign = db::get_campaign(&mut *tx, campaign_id)
            .await?
            .ok_or_else(|| {
                PledgeError::TransientStorage(format!("campaign {campaign_id} disappeared"))
            })?;

        match db::conditional_increment_raised(&mut *tx, campaign_id, amount_cents, campaign.version)
            .await?
        {
            Some((_new_version, new_raised)) => {
                db::mark_aggregate_outcome(&mut *tx, payment_ref, AggregateOutcome::Ok).await?;
                tx.commit().await?;
                return Ok(IncrementOutcome::Applied(new_raised));
            }
            None => {
                tx.rollback().await?;
                attempt += 1;
                let conflict = PledgeError::AggregateConflict(campaign_id.to_string());
                warn!("{conflict} (attempt {attempt}/{})", ctx.aggregate_retry_attempts);
                if attempt < ctx.aggregate_retry_attempts {
                    // Exponential backoff, capped so a long retry budget
                    // cannot produce absurd sleeps.
                    let delay = ctx.aggregate_backoff * 2u32.pow((attempt - 1).min(8));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(PledgeError::AggregateUpdateFailed(
        campaign_id.to_string(),
        ctx.aggregate_retry_attempts,
    ))
}

/// Recompute a campaign's raised total from the ledger and overwrite it.
///
/// Summing completed donations is deterministic, so this is idempotent and
/// is the repair primitive for any aggregate divergence. The sum, the
/// overwrite, and the settling of every ledger-ok reconciliation record
/// for the campaign commit as one transaction, so an in-flight increment
/// sees either none of the repair or all of it — never a recomputed total
/// with its own record still unsettled.
pub async fn reconcile(pool: &SqlitePool, campaign_id: &str) -> Result<i64> {
    let mut tx = pool.begin().await?;
    if db::get_campaign(&mut *tx, campaign_id).await?.is_none() {
        tx.rollback().await?;
        return Err(PledgeError::InvalidDonation(format!(
            "unknown campaign {campaign_id}"
        )));
    }
    let total = db::sum_completed_for_campaign(&mut *tx, campaign_id).await?;
    db::overwrite_raised(&mut *tx, campaign_id, total).await?;
    db::settle_campaign_records(&mut *tx, campaign_id).await?;
    tx.commit().await?;
    info!("Reconciled campaign {campaign_id}: raised = {total} cents");
    Ok(total)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::notifier::{self, Transport};
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::{Arc, Mutex};

    pub(crate) async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    pub(crate) async fn seed_campaign(pool: &SqlitePool, id: &str, raised: i64, status: &str) {
        let campaign = Campaign {
            id: id.to_string(),
            name: format!("Campaign {id}"),
            description: "Roof repairs for the parish hall".to_string(),
            category: "building".to_string(),
            goal_cents: 1_000_000,
            raised_cents: raised,
            status: status.to_string(),
            organizer_id: "org-1".to_string(),
            end_date: Utc::now().timestamp() + 86_400,
            version: 0,
            created_at: Utc::now().timestamp(),
        };
        db::insert_campaign(pool, &campaign).await.unwrap();
    }

    pub(crate) fn confirmation(payment_ref: &str, campaign_id: &str, amount: i64) -> PaymentConfirmation {
        PaymentConfirmation {
            payment_ref: payment_ref.to_string(),
            campaign_id: campaign_id.to_string(),
            donor_id: "donor-1".to_string(),
            donor_name: "Ada".to_string(),
            amount_cents: amount,
            message: None,
            anonymous: false,
        }
    }

    fn context_with_sink(pool: SqlitePool, attempts: u32) -> (PledgeContext, Arc<Mutex<Vec<crate::notifier::Receipt>>>) {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let (handle, worker) = notifier::channel(
            Transport::Recording(sink.clone()),
            0,
            Duration::from_millis(1),
        );
        tokio::spawn(worker);
        (
            PledgeContext {
                pool,
                notifier: handle,
                aggregate_retry_attempts: attempts,
                aggregate_backoff: Duration::from_millis(1),
            },
            sink,
        )
    }

    pub(crate) fn context(pool: SqlitePool) -> PledgeContext {
        context_with_sink(pool, 5).0
    }

    pub(crate) fn context_with_attempts(pool: SqlitePool, attempts: u32) -> PledgeContext {
        context_with_sink(pool, attempts).0
    }

    async fn raised(pool: &SqlitePool, id: &str) -> i64 {
        db::get_campaign(pool, id).await.unwrap().unwrap().raised_cents
    }

    #[tokio::test]
    async fn redelivered_confirmation_credits_exactly_once() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        let ctx = context(pool.clone());
        let conf = confirmation("p1", "c1", 500);

        let first = process_confirmation(&ctx, &conf).await.unwrap();
        assert!(!first.deduplicated);
        assert!(first.aggregate_applied);
        assert_eq!(first.donation.status(), crate::models::DonationStatus::Completed);

        let second = process_confirmation(&ctx, &conf).await.unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.donation.id, first.donation.id);

        assert_eq!(raised(&pool, "c1").await, 500);
        assert_eq!(
            db::list_completed_by_campaign(&pool, "c1").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_confirmations_lose_no_updates() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        // Generous retry budget: the assertion is about lost updates, not
        // about contention giving up early.
        let (ctx, _) = context_with_sink(pool.clone(), 64);
        let ctx = Arc::new(ctx);

        let mut handles = Vec::new();
        for i in 0..50i64 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let conf = confirmation(&format!("p{i}"), "c1", i + 1);
                process_confirmation(&ctx, &conf).await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.aggregate_applied);
        }

        // sum(1..=50)
        assert_eq!(raised(&pool, "c1").await, 1275);
        assert_eq!(
            db::list_completed_by_campaign(&pool, "c1").await.unwrap().len(),
            50
        );
    }

    #[tokio::test]
    async fn non_positive_amount_is_rejected_to_operator_queue() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 100, "active").await;
        let ctx = context(pool.clone());

        let err = process_confirmation(&ctx, &confirmation("p-bad", "c1", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::InvalidDonation(_)));
        assert!(!err.is_retryable());

        assert_eq!(raised(&pool, "c1").await, 100);
        assert!(db::find_donation_by_payment_ref(&pool, "p-bad")
            .await
            .unwrap()
            .is_none());

        let queue = db::list_operator_queue(&pool).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].payment_ref, "p-bad");
    }

    #[tokio::test]
    async fn inactive_campaign_is_rejected() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "pending").await;
        let ctx = context(pool.clone());

        let err = process_confirmation(&ctx, &confirmation("p1", "c1", 500))
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::InvalidDonation(_)));
        assert_eq!(raised(&pool, "c1").await, 0);
        assert_eq!(db::list_operator_queue(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_campaign_is_rejected() {
        let pool = test_pool().await;
        let ctx = context(pool.clone());

        let err = process_confirmation(&ctx, &confirmation("p1", "nope", 500))
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::InvalidDonation(_)));
        assert_eq!(db::list_operator_queue(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_redelivery_stays_rejected() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "pending").await;
        let ctx = context(pool.clone());
        let conf = confirmation("p1", "c1", 500);

        assert!(process_confirmation(&ctx, &conf).await.is_err());
        let err = process_confirmation(&ctx, &conf).await.unwrap_err();
        assert!(matches!(err, PledgeError::InvalidDonation(_)));
        // Only the first delivery lands in the operator queue.
        assert_eq!(db::list_operator_queue(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconcile_repairs_failed_aggregate_update() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 1000, "active").await;
        // Zero retry budget forces the increment to fail after the ledger
        // write lands.
        let (ctx, _) = context_with_sink(pool.clone(), 0);

        let outcome = process_confirmation(&ctx, &confirmation("p1", "c1", 500))
            .await
            .unwrap();
        assert!(!outcome.aggregate_applied);
        assert_eq!(raised(&pool, "c1").await, 1000);

        assert_eq!(
            db::campaigns_needing_repair(&pool).await.unwrap(),
            vec!["c1".to_string()]
        );

        let total = reconcile(&pool, "c1").await.unwrap();
        assert_eq!(total, 500);
        assert_eq!(raised(&pool, "c1").await, 500);
        assert!(db::campaigns_needing_repair(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redelivery_after_divergence_repairs_instead_of_double_crediting() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        let (failing_ctx, _) = context_with_sink(pool.clone(), 0);
        let conf = confirmation("p1", "c1", 500);

        let first = process_confirmation(&failing_ctx, &conf).await.unwrap();
        assert!(!first.aggregate_applied);

        // Redelivery with a healthy context must repair from the ledger,
        // not apply the increment a second time.
        let ctx = context(pool.clone());
        let second = process_confirmation(&ctx, &conf).await.unwrap();
        assert!(second.deduplicated);
        assert_eq!(raised(&pool, "c1").await, 500);
    }

    #[tokio::test]
    async fn sweep_settling_an_inflight_payment_suppresses_its_increment() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        let conf = confirmation("p1", "c1", 500);

        // A delivery that has written the ledger and marked it ok but has
        // not yet applied its increment.
        db::claim_payment_ref(&pool, "p1", "c1").await.unwrap();
        db::insert_donation(&pool, &conf).await.unwrap();
        db::mark_ledger_outcome(&pool, "p1", LedgerOutcome::Ok).await.unwrap();

        // The sweep sees the unsettled record and repairs the campaign;
        // the recomputed total already includes the donation.
        assert_eq!(reconcile(&pool, "c1").await.unwrap(), 500);
        assert_eq!(raised(&pool, "c1").await, 500);

        // The delivery's increment now resumes. It must observe the
        // settle and not add the amount a second time.
        let ctx = context(pool.clone());
        let outcome = apply_increment(&ctx, "p1", "c1", 500).await.unwrap();
        assert!(matches!(outcome, IncrementOutcome::AlreadySettled));

        assert_eq!(raised(&pool, "c1").await, 500);
        assert_eq!(db::sum_completed_for_campaign(&pool, "c1").await.unwrap(), 500);
        assert!(db::campaigns_needing_repair(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_owned_by_concurrent_delivery_is_retryable() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;

        // Another delivery holds the claim: no outcomes, no donation yet.
        assert!(db::claim_payment_ref(&pool, "p1", "c1").await.unwrap());

        let ctx = context(pool.clone());
        let err = process_confirmation(&ctx, &confirmation("p1", "c1", 500))
            .await
            .unwrap_err();
        assert!(matches!(err, PledgeError::TransientStorage(_)));
        assert!(err.is_retryable());

        // Nothing was written on behalf of the redelivery.
        assert!(db::find_donation_by_payment_ref(&pool, "p1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(raised(&pool, "c1").await, 0);
        assert!(db::list_operator_queue(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn crash_between_insert_and_marker_resumes_cleanly() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        let conf = confirmation("p1", "c1", 500);

        // Simulate an attempt that died right after the ledger insert:
        // claim taken, donation written, no outcome markers.
        db::claim_payment_ref(&pool, "p1", "c1").await.unwrap();
        db::insert_donation(&pool, &conf).await.unwrap();

        let ctx = context(pool.clone());
        let outcome = process_confirmation(&ctx, &conf).await.unwrap();
        assert!(outcome.deduplicated);
        assert_eq!(raised(&pool, "c1").await, 500);
        assert_eq!(
            db::list_completed_by_campaign(&pool, "c1").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        let ctx = context(pool.clone());
        process_confirmation(&ctx, &confirmation("p1", "c1", 300))
            .await
            .unwrap();

        assert_eq!(reconcile(&pool, "c1").await.unwrap(), 300);
        assert_eq!(reconcile(&pool, "c1").await.unwrap(), 300);
        assert_eq!(raised(&pool, "c1").await, 300);
    }

    #[tokio::test]
    async fn pledge_scenario_end_to_end() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 1000, "active").await;
        let ctx = Arc::new(context(pool.clone()));

        // p1 delivered twice: one donation, one increment.
        let conf1 = confirmation("p1", "c1", 500);
        process_confirmation(&ctx, &conf1).await.unwrap();
        process_confirmation(&ctx, &conf1).await.unwrap();
        assert_eq!(raised(&pool, "c1").await, 1500);

        // p2 and p3 race.
        let a = {
            let ctx = ctx.clone();
            tokio::spawn(async move { process_confirmation(&ctx, &confirmation("p2", "c1", 250)).await })
        };
        let b = {
            let ctx = ctx.clone();
            tokio::spawn(async move { process_confirmation(&ctx, &confirmation("p3", "c1", 750)).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(raised(&pool, "c1").await, 2500);
        assert_eq!(
            db::list_completed_by_campaign(&pool, "c1").await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn receipts_are_enqueued_once_per_payment() {
        let pool = test_pool().await;
        seed_campaign(&pool, "c1", 0, "active").await;
        let (ctx, sink) = context_with_sink(pool.clone(), 5);
        let conf = confirmation("p1", "c1", 500);

        process_confirmation(&ctx, &conf).await.unwrap();
        process_confirmation(&ctx, &conf).await.unwrap();

        // Give the notifier task a moment to drain the channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let delivered = sink.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].amount_cents, 500);
    }
}
