//! Queue operations over the record store.
//!
//! The queue holds no state of its own. Every claim and transition goes
//! through the store's compare-and-swap operations, so any number of
//! workers (in this process or another) can share one queue safely.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::intake::event::{EngagementEvent, EventOutcome, EventStatus, Platform};
use crate::scoring::model::ActorProfile;
use crate::store::RecordStore;

/// Durable intake queue for engagement events.
pub struct IntakeQueue {
    store: Arc<dyn RecordStore>,
    config: QueueConfig,
}

impl IntakeQueue {
    pub fn new(store: Arc<dyn RecordStore>, config: QueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Ingest a raw signal. Idempotent on `(platform, external_id)`: a
    /// duplicate returns the already-stored event unchanged.
    ///
    /// Priority is fixed here, at enqueue. Later re-scoring never reorders
    /// items already in the queue.
    pub async fn enqueue(
        &self,
        platform: Platform,
        external_id: &str,
        body_text: Option<String>,
        actor: Option<ActorProfile>,
        received_at: DateTime<Utc>,
    ) -> Result<EngagementEvent, QueueError> {
        let mut event =
            EngagementEvent::new(platform, external_id, body_text, actor, received_at)?;
        event.priority = initial_priority(&event);

        let stored = self.store.insert_event_if_absent(&event).await?;
        if stored.received_at == event.received_at && stored.priority == event.priority {
            info!(
                event_id = %stored.id,
                platform = %platform,
                priority = stored.priority,
                "Event enqueued"
            );
        } else {
            debug!(event_id = %stored.id, "Duplicate event, keeping original");
        }
        Ok(stored)
    }

    /// Claim up to `batch_size` pending events, most urgent first.
    ///
    /// Each claim is a per-item CAS; losing one to another worker is
    /// normal and skipped silently.
    pub async fn claim_batch(&self) -> Result<Vec<EngagementEvent>, QueueError> {
        // Over-fetch so contended claims don't shrink the batch.
        let candidates = self
            .store
            .list_pending_events(self.config.batch_size * 2)
            .await?;

        let mut claimed = Vec::new();
        for mut event in candidates {
            if claimed.len() >= self.config.batch_size {
                break;
            }
            if self.store.try_claim_event(&event.id).await? {
                event.status = EventStatus::Processing;
                claimed.push(event);
            }
        }

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed batch");
        }
        Ok(claimed)
    }

    /// Finish a claimed event with a terminal outcome.
    pub async fn complete(&self, id: &str, outcome: &EventOutcome) -> Result<(), QueueError> {
        let target = outcome.status();
        let moved = self
            .store
            .transition_event(id, EventStatus::Processing, target, outcome.reason())
            .await?;
        if !moved {
            return Err(self.transition_error(id, target).await);
        }
        info!(event_id = %id, status = %target, "Event completed");
        Ok(())
    }

    /// Mark a claimed event failed, recording the error and bumping the
    /// retry count. A later sweep re-queues it if under the cap.
    pub async fn fail(&self, id: &str, error: &str) -> Result<(), QueueError> {
        let moved = self.store.record_event_failure(id, error).await?;
        if !moved {
            return Err(self.transition_error(id, EventStatus::Failed).await);
        }
        warn!(event_id = %id, error = %error, "Event failed");
        Ok(())
    }

    /// Re-queue failed events that still have retries left.
    pub async fn retry_sweep(&self) -> Result<Vec<EngagementEvent>, QueueError> {
        let requeued = self
            .store
            .sweep_failed_events(self.config.max_retries)
            .await?;
        if !requeued.is_empty() {
            info!(count = requeued.len(), "Re-queued failed events");
        }
        Ok(requeued)
    }

    /// Archive terminal events older than the cutoff.
    pub async fn archive(&self, older_than: DateTime<Utc>) -> Result<usize, QueueError> {
        let archived = self.store.archive_events(older_than).await?;
        if archived > 0 {
            info!(count = archived, "Archived events");
        }
        Ok(archived)
    }

    /// Number of events waiting to be claimed.
    pub async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.store.count_events(EventStatus::Pending).await?)
    }

    async fn transition_error(&self, id: &str, target: EventStatus) -> QueueError {
        match self.store.get_event(id).await {
            Ok(Some(event)) => QueueError::InvalidTransition {
                id: id.to_string(),
                current: event.status.label().to_string(),
                target: target.label().to_string(),
            },
            Ok(None) => QueueError::NotFound { id: id.to_string() },
            Err(e) => QueueError::Store(e),
        }
    }
}

/// Cheap urgency heuristic applied once at enqueue. Lower is more urgent.
///
/// This is a keyword scan, not the scoring engine: the queue must accept
/// thousands of events without paying for full scoring up front.
fn initial_priority(event: &EngagementEvent) -> i32 {
    let body = event.body_text.as_deref().unwrap_or("").to_lowercase();

    let high_intent = ["pricing", "price", "cost", "demo", "buy", "purchase", "trial"]
        .iter()
        .any(|kw| body.contains(kw));
    if high_intent {
        return 0;
    }

    let asks_question = body.contains('?');
    let large_following = event
        .actor
        .as_ref()
        .and_then(|a| a.follower_count)
        .is_some_and(|f| f >= 10_000);

    match (asks_question, large_following) {
        (true, _) => 1,
        (false, true) => 2,
        (false, false) => 5,
    }
}
