//! Batch worker — drains the intake queue through a pluggable handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, QueueError};
use crate::intake::event::{EngagementEvent, EventOutcome};
use crate::intake::queue::IntakeQueue;

/// Processes one claimed event and classifies the outcome.
///
/// Returning `Err` marks the event FAILED with the error recorded; a later
/// retry sweep re-queues it if retries remain.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EngagementEvent) -> Result<EventOutcome, Error>;
}

/// Claims batches off the queue and runs each item through the handler.
///
/// One failed or slow item never takes down the batch: every item gets its
/// own timeout and its own error path.
pub struct IntakeWorker {
    queue: Arc<IntakeQueue>,
    handler: Arc<dyn EventHandler>,
}

impl IntakeWorker {
    pub fn new(queue: Arc<IntakeQueue>, handler: Arc<dyn EventHandler>) -> Self {
        Self { queue, handler }
    }

    /// Spawn the batch loop. Runs until the task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Intake worker started");
            loop {
                let processed = match self.run_batch().await {
                    Ok(n) => n,
                    Err(e) => {
                        error!(error = %e, "Batch claim failed");
                        0
                    }
                };
                if processed > 0 {
                    debug!(processed, "Batch done");
                }
                tokio::time::sleep(self.queue.config().batch_delay).await;
            }
        })
    }

    /// Spawn the retry sweep loop. Backs off exponentially while there is
    /// nothing to re-queue, resets on a productive sweep.
    pub fn spawn_retry_sweep(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let base = self.queue.config().sweep_backoff_base;
            let max = self.queue.config().sweep_backoff_max;
            let mut backoff = base;
            loop {
                tokio::time::sleep(with_jitter(backoff)).await;
                match self.queue.retry_sweep().await {
                    Ok(requeued) if !requeued.is_empty() => backoff = base,
                    Ok(_) => backoff = (backoff * 2).min(max),
                    Err(e) => {
                        error!(error = %e, "Retry sweep failed");
                        backoff = (backoff * 2).min(max);
                    }
                }
            }
        })
    }

    /// Claim one batch and process every item. Returns the number of items
    /// processed (whatever their outcome).
    pub async fn run_batch(&self) -> Result<usize, Error> {
        let batch = self.queue.claim_batch().await?;
        let count = batch.len();

        for (i, event) in batch.iter().enumerate() {
            self.process_one(event).await;
            // Politeness gap between items, but not after the last one.
            if i + 1 < count {
                tokio::time::sleep(self.queue.config().item_delay).await;
            }
        }
        Ok(count)
    }

    /// Run the handler for one claimed event under the configured timeout
    /// and record the result. Never returns an error: per-item problems
    /// are recorded on the event itself.
    async fn process_one(&self, event: &EngagementEvent) {
        let timeout = self.queue.config().handler_timeout;
        let result = tokio::time::timeout(timeout, self.handler.handle(event)).await;

        let failure = match result {
            Ok(Ok(outcome)) => match self.queue.complete(&event.id, &outcome).await {
                Ok(()) => None,
                Err(e) => {
                    // Lost the record to someone else; nothing to retry.
                    warn!(event_id = %event.id, error = %e, "Completion lost");
                    None
                }
            },
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(
                QueueError::HandlerTimeout {
                    id: event.id.clone(),
                    timeout,
                }
                .to_string(),
            ),
        };

        if let Some(reason) = failure
            && let Err(e) = self.queue.fail(&event.id, &reason).await
        {
            warn!(event_id = %event.id, error = %e, "Failure not recorded");
        }
    }
}

/// Add up to 25% random jitter so multiple workers don't sweep in lockstep.
fn with_jitter(d: Duration) -> Duration {
    let jitter_ms = d.as_millis() as u64 / 4;
    if jitter_ms == 0 {
        return d;
    }
    d + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}
