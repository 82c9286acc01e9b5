//! Long-running background task that repairs diverged campaign totals.
//!
//! Any reconciliation record stuck at ledger-ok without aggregate-ok means
//! a donation landed in the ledger but its increment did not (or its
//! outcome marker was lost). The sweep recomputes those campaigns' totals
//! from the ledger on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{error, info};

use crate::db;
use crate::pledge;

pub struct SweepState {
    pub pool: SqlitePool,
    pub interval_secs: u64,
}

/// Spawn the sweep loop as a background [`tokio`] task.
pub async fn run(state: Arc<SweepState>) {
    info!(
        "Reconciliation sweep starting — interval {}s",
        state.interval_secs
    );

    loop {
        match sweep_once(&state.pool).await {
            Ok(0) => {}
            Ok(repaired) => info!("Sweep repaired {repaired} campaign total(s)"),
            Err(e) => error!("Sweep error: {e}"),
        }

        tokio::time::sleep(Duration::from_secs(state.interval_secs)).await;
    }
}

/// Perform a single sweep iteration. Returns how many campaigns were
/// reconciled. A failure on one campaign does not stop the others.
pub async fn sweep_once(pool: &SqlitePool) -> crate::errors::Result<usize> {
    let campaigns = db::campaigns_needing_repair(pool).await?;
    let mut repaired = 0usize;

    for campaign_id in campaigns {
        match pledge::reconcile(pool, &campaign_id).await {
            Ok(total) => {
                repaired += 1;
                info!("Sweep reconciled campaign {campaign_id} to {total} cents");
            }
            Err(e) => error!("Sweep could not reconcile campaign {campaign_id}: {e}"),
        }
    }

    Ok(repaired)
}
