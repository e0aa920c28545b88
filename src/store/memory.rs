//! In-memory `RecordStore` — tests and single-process runs.
//!
//! Every conditional update happens under the write lock, which gives the
//! same atomicity the libSQL backend gets from conditional UPDATEs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::intake::event::{EngagementEvent, EventStatus};
use crate::sequence::model::{
    EngagementState, Lead, SequenceInstance, SequenceStatus, Touch,
};
use crate::store::traits::RecordStore;

#[derive(Default)]
struct Inner {
    events: HashMap<String, EngagementEvent>,
    leads: HashMap<String, Lead>,
    instances: HashMap<Uuid, SequenceInstance>,
    touches: HashMap<(Uuid, usize), Touch>,
}

/// In-memory store backed by `tokio::sync::RwLock` maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        Ok(())
    }

    // ── Engagement events ───────────────────────────────────────────

    async fn insert_event_if_absent(
        &self,
        event: &EngagementEvent,
    ) -> Result<EngagementEvent, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.events.get(&event.id) {
            return Ok(existing.clone());
        }
        inner.events.insert(event.id.clone(), event.clone());
        Ok(event.clone())
    }

    async fn get_event(&self, id: &str) -> Result<Option<EngagementEvent>, StoreError> {
        Ok(self.inner.read().await.events.get(id).cloned())
    }

    async fn list_pending_events(
        &self,
        limit: usize,
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let inner = self.inner.read().await;
        let mut pending: Vec<EngagementEvent> = inner
            .events
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.received_at.cmp(&b.received_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn try_claim_event(&self, id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.events.get_mut(id) {
            Some(event) if event.status == EventStatus::Pending => {
                event.status = EventStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_event(
        &self,
        id: &str,
        from: EventStatus,
        to: EventStatus,
        reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        if !from.can_transition(to) {
            return Err(StoreError::Constraint(format!(
                "invalid event transition {from} -> {to}"
            )));
        }
        let mut inner = self.inner.write().await;
        match inner.events.get_mut(id) {
            Some(event) if event.status == from => {
                event.status = to;
                if let Some(reason) = reason {
                    event.status_reason = Some(reason.to_string());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_event_failure(&self, id: &str, error: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.events.get_mut(id) {
            Some(event) if event.status == EventStatus::Processing => {
                event.status = EventStatus::Failed;
                event.retry_count += 1;
                event.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_failed_events(
        &self,
        max_retries: u32,
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut requeued = Vec::new();
        for event in inner.events.values_mut() {
            if event.status == EventStatus::Failed && event.retry_count < max_retries {
                event.status = EventStatus::Pending;
                requeued.push(event.clone());
            }
        }
        Ok(requeued)
    }

    async fn archive_events(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut archived = 0;
        for event in inner.events.values_mut() {
            if event.status.is_terminal() && event.received_at < older_than {
                event.status = EventStatus::Archived;
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn count_events(&self, status: EventStatus) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .values()
            .filter(|e| e.status == status)
            .count())
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn upsert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .leads
            .insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        Ok(self.inner.read().await.leads.get(id).cloned())
    }

    // ── Sequence instances ──────────────────────────────────────────

    async fn insert_instance(&self, instance: &SequenceInstance) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let already_active = inner.instances.values().any(|i| {
            i.lead_id == instance.lead_id
                && matches!(i.status, SequenceStatus::Active | SequenceStatus::Paused)
        });
        if already_active {
            return Err(StoreError::Constraint(format!(
                "lead {} already has an active instance",
                instance.lead_id
            )));
        }
        inner.instances.insert(instance.id, instance.clone());
        if let Some(lead) = inner.leads.get_mut(&instance.lead_id) {
            lead.active_instance = Some(instance.id);
        }
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<SequenceInstance>, StoreError> {
        Ok(self.inner.read().await.instances.get(&id).cloned())
    }

    async fn list_active_instances(&self) -> Result<Vec<SequenceInstance>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.status == SequenceStatus::Active)
            .cloned()
            .collect())
    }

    async fn advance_cursor(
        &self,
        id: Uuid,
        from: usize,
        to: usize,
        status: SequenceStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.instances.get_mut(&id) {
            Some(instance)
                if instance.cursor == from && instance.status == SequenceStatus::Active =>
            {
                instance.cursor = to;
                instance.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_instance_status(
        &self,
        id: Uuid,
        expected: SequenceStatus,
        target: SequenceStatus,
        pause_reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.instances.get_mut(&id) {
            Some(instance) if instance.status == expected => {
                instance.status = target;
                instance.pause_reason = pause_reason.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_engagement(
        &self,
        id: Uuid,
        engagement: &EngagementState,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let instance = inner
            .instances
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "sequence_instance".into(),
                id: id.to_string(),
            })?;
        instance.engagement = engagement.clone();
        Ok(())
    }

    // ── Touches ─────────────────────────────────────────────────────

    async fn upsert_touch(&self, touch: &Touch) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .touches
            .insert((touch.instance_id, touch.touch_number), touch.clone());
        Ok(())
    }

    async fn get_touch(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<Option<Touch>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .touches
            .get(&(instance_id, touch_number))
            .cloned())
    }

    async fn list_touches(&self, instance_id: Uuid) -> Result<Vec<Touch>, StoreError> {
        let inner = self.inner.read().await;
        let mut touches: Vec<Touch> = inner
            .touches
            .values()
            .filter(|t| t.instance_id == instance_id)
            .cloned()
            .collect();
        touches.sort_by_key(|t| t.touch_number);
        Ok(touches)
    }

    async fn mark_touch_sent(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.touches.get_mut(&(instance_id, touch_number)) {
            Some(touch) if touch.status == crate::sequence::model::TouchStatus::Pending => {
                touch.status = crate::sequence::model::TouchStatus::Sent;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
