//! Best-effort donation receipts.
//!
//! The donation path never waits on receipt delivery: it pushes a
//! [`Receipt`] onto an unbounded channel and moves on. A spawned task
//! drains the channel and delivers each receipt through the configured
//! transport, with a small number of delayed retries. Delivery failure is
//! logged and dropped — it never reaches the caller.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// What gets sent to the donor after a successful pledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub donor_id: String,
    pub donor_name: String,
    pub campaign_name: String,
    pub amount_cents: i64,
}

/// How receipts leave the process.
pub enum Transport {
    /// POST the receipt JSON to an external delivery endpoint.
    Webhook { client: Client, url: String },
    /// No endpoint configured; log the receipt and count it delivered.
    Log,
    /// Capture receipts in memory for assertions.
    #[cfg(test)]
    Recording(std::sync::Arc<std::sync::Mutex<Vec<Receipt>>>),
}

impl Transport {
    async fn deliver(&self, receipt: &Receipt) -> Result<(), String> {
        match self {
            Transport::Webhook { client, url } => {
                let resp = client
                    .post(url)
                    .json(receipt)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                resp.error_for_status().map_err(|e| e.to_string())?;
                Ok(())
            }
            Transport::Log => {
                info!(
                    "Receipt for {}: {} cents to '{}'",
                    receipt.donor_name, receipt.amount_cents, receipt.campaign_name
                );
                Ok(())
            }
            #[cfg(test)]
            Transport::Recording(sink) => {
                sink.lock().unwrap().push(receipt.clone());
                Ok(())
            }
        }
    }
}

/// Cheap cloneable handle the donation path uses to hand off receipts.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<Receipt>,
}

impl NotifierHandle {
    /// Fire-and-forget. A closed channel only happens at shutdown; the
    /// receipt is logged so it is at least visible in that window.
    pub fn enqueue(&self, receipt: Receipt) {
        if self.tx.send(receipt.clone()).is_err() {
            warn!(
                "Notifier channel closed; dropping receipt for {}",
                receipt.donor_id
            );
        }
    }
}

/// Build the handle/worker pair. The caller spawns the returned future.
pub fn channel(
    transport: Transport,
    retry_attempts: u32,
    retry_delay: Duration,
) -> (NotifierHandle, impl std::future::Future<Output = ()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = NotifierHandle { tx };
    let worker = run(rx, transport, retry_attempts, retry_delay);
    (handle, worker)
}

/// Drain the receipt channel until every sender is dropped.
async fn run(
    mut rx: mpsc::UnboundedReceiver<Receipt>,
    transport: Transport,
    retry_attempts: u32,
    retry_delay: Duration,
) {
    while let Some(receipt) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            match transport.deliver(&receipt).await {
                Ok(()) => break,
                Err(e) if attempt < retry_attempts => {
                    attempt += 1;
                    warn!(
                        "Receipt delivery failed for {} (attempt {attempt}): {e}; retrying",
                        receipt.donor_id
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    // Best-effort contract: give up after the retry budget.
                    warn!(
                        "Giving up on receipt for {} after {attempt} retries: {e}",
                        receipt.donor_id
                    );
                    break;
                }
            }
        }
    }
}
