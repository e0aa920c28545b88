//! The `RecordStore` trait — typed CRUD plus atomic conditional updates.
//!
//! Every method that moves a record between states is compare-and-swap
//! shaped: it names the expected current state and returns `Ok(false)` when
//! another caller got there first. Callers treat `false` as "lost the race",
//! not as an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::intake::event::{EngagementEvent, EventStatus};
use crate::sequence::model::{
    EngagementState, Lead, SequenceInstance, SequenceStatus, Touch,
};

/// Backend-agnostic record store for events, leads, instances, and touches.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Engagement events ───────────────────────────────────────────

    /// Insert an event unless one with the same dedup key exists.
    /// Returns the stored record — the existing one, unchanged, on a
    /// duplicate (idempotent enqueue).
    async fn insert_event_if_absent(
        &self,
        event: &EngagementEvent,
    ) -> Result<EngagementEvent, StoreError>;

    /// Get an event by dedup key.
    async fn get_event(&self, id: &str) -> Result<Option<EngagementEvent>, StoreError>;

    /// Up to `limit` PENDING events ordered by `(priority ASC, received_at ASC)`.
    async fn list_pending_events(
        &self,
        limit: usize,
    ) -> Result<Vec<EngagementEvent>, StoreError>;

    /// CAS `Pending → Processing`. `false` means another worker claimed it.
    async fn try_claim_event(&self, id: &str) -> Result<bool, StoreError>;

    /// CAS a status transition, recording an optional human-readable reason.
    ///
    /// Transitions outside the `EventStatus::can_transition` table are a
    /// `Constraint` error regardless of the row's current state; a valid
    /// transition whose `from` no longer matches returns `Ok(false)`.
    async fn transition_event(
        &self,
        id: &str,
        from: EventStatus,
        to: EventStatus,
        reason: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// CAS `Processing → Failed`, incrementing `retry_count` and recording
    /// the error.
    async fn record_event_failure(&self, id: &str, error: &str) -> Result<bool, StoreError>;

    /// Move FAILED events with `retry_count < max_retries` back to PENDING.
    /// Returns the events that were re-queued; capped events are untouched.
    async fn sweep_failed_events(
        &self,
        max_retries: u32,
    ) -> Result<Vec<EngagementEvent>, StoreError>;

    /// Archive terminal events received before the cutoff.
    /// Returns the number archived.
    async fn archive_events(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Count events in a given status.
    async fn count_events(&self, status: EventStatus) -> Result<usize, StoreError>;

    // ── Leads ───────────────────────────────────────────────────────

    async fn upsert_lead(&self, lead: &Lead) -> Result<(), StoreError>;

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError>;

    // ── Sequence instances ──────────────────────────────────────────

    /// Insert a new instance. Fails with `Constraint` if the lead already
    /// has an active one.
    async fn insert_instance(&self, instance: &SequenceInstance) -> Result<(), StoreError>;

    async fn get_instance(&self, id: Uuid) -> Result<Option<SequenceInstance>, StoreError>;

    async fn list_active_instances(&self) -> Result<Vec<SequenceInstance>, StoreError>;

    /// CAS the cursor from `from` to `to`, setting `status` in the same
    /// update (used to flip to COMPLETED when the cursor passes the end).
    /// Only ACTIVE instances advance; `false` means the cursor moved under
    /// us or the instance is no longer active.
    async fn advance_cursor(
        &self,
        id: Uuid,
        from: usize,
        to: usize,
        status: SequenceStatus,
    ) -> Result<bool, StoreError>;

    /// CAS the instance status (pause, resume, archive).
    async fn set_instance_status(
        &self,
        id: Uuid,
        expected: SequenceStatus,
        target: SequenceStatus,
        pause_reason: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Persist accumulated engagement state.
    async fn save_engagement(
        &self,
        id: Uuid,
        engagement: &EngagementState,
    ) -> Result<(), StoreError>;

    // ── Touches ─────────────────────────────────────────────────────

    /// Insert or replace the touch row keyed by `(instance_id, touch_number)`.
    async fn upsert_touch(&self, touch: &Touch) -> Result<(), StoreError>;

    async fn get_touch(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<Option<Touch>, StoreError>;

    /// All touches for an instance, ordered by touch number.
    async fn list_touches(&self, instance_id: Uuid) -> Result<Vec<Touch>, StoreError>;

    /// CAS the touch `Pending → Sent`. `false` if already sent or absent
    /// (at-most-once dispatch).
    async fn mark_touch_sent(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<bool, StoreError>;
}
