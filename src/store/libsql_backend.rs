//! libSQL backend — async `RecordStore` implementation.
//!
//! Claims and status transitions are conditional UPDATEs checked through
//! rows-affected, which is what makes them safe across worker processes
//! sharing one database.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::ChannelKind;
use crate::error::StoreError;
use crate::intake::event::{EngagementEvent, EventStatus, Platform};
use crate::scoring::model::ActorProfile;
use crate::sequence::model::{
    EngagementState, Lead, SequenceInstance, SequenceStatus, Touch, TouchStatus,
};
use crate::store::migrations;
use crate::store::traits::RecordStore;

/// libSQL record store.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Record store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string (our canonical write format).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const EVENT_COLUMNS: &str =
    "id, platform, body_text, actor, received_at, priority, status, retry_count, last_error, status_reason";

fn row_to_event(row: &libsql::Row) -> Result<EngagementEvent, StoreError> {
    let platform_str: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("event platform: {e}")))?;
    let actor_json: Option<String> = row.get(3).ok();
    let received_str: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("event received_at: {e}")))?;
    let status_str: String = row
        .get(6)
        .map_err(|e| StoreError::Query(format!("event status: {e}")))?;
    let retry_count: i64 = row
        .get(7)
        .map_err(|e| StoreError::Query(format!("event retry_count: {e}")))?;

    let actor: Option<ActorProfile> = match actor_json {
        Some(json) => Some(
            serde_json::from_str(&json)
                .map_err(|e| StoreError::Serialization(format!("event actor: {e}")))?,
        ),
        None => None,
    };

    Ok(EngagementEvent {
        id: row
            .get(0)
            .map_err(|e| StoreError::Query(format!("event id: {e}")))?,
        platform: Platform::parse(&platform_str).ok_or_else(|| {
            StoreError::Serialization(format!("unknown platform '{platform_str}'"))
        })?,
        body_text: row.get(2).ok(),
        actor,
        received_at: parse_datetime(&received_str),
        priority: row
            .get::<i64>(5)
            .map_err(|e| StoreError::Query(format!("event priority: {e}")))? as i32,
        status: EventStatus::parse(&status_str)
            .ok_or_else(|| StoreError::Serialization(format!("unknown status '{status_str}'")))?,
        retry_count: retry_count.max(0) as u32,
        last_error: row.get(8).ok(),
        status_reason: row.get(9).ok(),
    })
}

const INSTANCE_COLUMNS: &str =
    "id, lead_id, definition_id, cursor, status, pause_reason, started_at, engagement";

fn row_to_instance(row: &libsql::Row) -> Result<SequenceInstance, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("instance id: {e}")))?;
    let cursor: i64 = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("instance cursor: {e}")))?;
    let status_str: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("instance status: {e}")))?;
    let started_str: String = row
        .get(6)
        .map_err(|e| StoreError::Query(format!("instance started_at: {e}")))?;
    let engagement_json: String = row
        .get(7)
        .map_err(|e| StoreError::Query(format!("instance engagement: {e}")))?;

    let engagement: EngagementState = if engagement_json.trim().is_empty() || engagement_json == "{}" {
        EngagementState::default()
    } else {
        serde_json::from_str(&engagement_json)
            .map_err(|e| StoreError::Serialization(format!("instance engagement: {e}")))?
    };

    Ok(SequenceInstance {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| StoreError::Serialization(format!("instance id: {e}")))?,
        lead_id: row
            .get(1)
            .map_err(|e| StoreError::Query(format!("instance lead_id: {e}")))?,
        definition_id: row
            .get(2)
            .map_err(|e| StoreError::Query(format!("instance definition_id: {e}")))?,
        cursor: cursor.max(0) as usize,
        status: SequenceStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Serialization(format!("unknown instance status '{status_str}'"))
        })?,
        pause_reason: row.get(5).ok(),
        started_at: parse_datetime(&started_str),
        engagement,
    })
}

fn row_to_touch(row: &libsql::Row) -> Result<Touch, StoreError> {
    let instance_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("touch instance_id: {e}")))?;
    let number: i64 = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("touch number: {e}")))?;
    let scheduled_str: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("touch scheduled_for: {e}")))?;
    let status_str: String = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("touch status: {e}")))?;
    let channel_str: String = row
        .get(4)
        .map_err(|e| StoreError::Query(format!("touch channel: {e}")))?;

    Ok(Touch {
        instance_id: Uuid::parse_str(&instance_str)
            .map_err(|e| StoreError::Serialization(format!("touch instance_id: {e}")))?,
        touch_number: number.max(0) as usize,
        scheduled_for: parse_datetime(&scheduled_str),
        status: TouchStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Serialization(format!("unknown touch status '{status_str}'"))
        })?,
        channel: ChannelKind::parse(&channel_str).ok_or_else(|| {
            StoreError::Serialization(format!("unknown channel '{channel_str}'"))
        })?,
        skip_reason: row.get(5).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Engagement events ───────────────────────────────────────────

    async fn insert_event_if_absent(
        &self,
        event: &EngagementEvent,
    ) -> Result<EngagementEvent, StoreError> {
        let conn = self.conn();
        let actor_json = match &event.actor {
            Some(actor) => Some(
                serde_json::to_string(actor)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        conn.execute(
            "INSERT OR IGNORE INTO events (id, platform, body_text, actor, received_at, priority, status, retry_count, last_error, status_reason, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.id.clone(),
                event.platform.label(),
                opt_text(event.body_text.as_deref()),
                opt_text(actor_json.as_deref()),
                event.received_at.to_rfc3339(),
                i64::from(event.priority),
                event.status.label(),
                i64::from(event.retry_count),
                opt_text(event.last_error.as_deref()),
                opt_text(event.status_reason.as_deref()),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("insert_event_if_absent: {e}")))?;

        // Return whatever is stored under the dedup key (existing row on dup).
        self.get_event(&event.id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "event".into(),
                id: event.id.clone(),
            })
    }

    async fn get_event(&self, id: &str) -> Result<Option<EngagementEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_event: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_event: {e}")))?
        {
            Some(row) => Ok(Some(row_to_event(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_pending_events(
        &self,
        limit: usize,
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE status = 'pending'
                     ORDER BY priority ASC, received_at ASC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_pending_events: {e}")))?;

        let mut events = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_pending_events: {e}")))?
        {
            events.push(row_to_event(&row)?);
        }
        Ok(events)
    }

    async fn try_claim_event(&self, id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE events SET status = 'processing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("try_claim_event: {e}")))?;
        Ok(affected == 1)
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
        let affected = self
            .conn()
            .execute(
                "UPDATE events SET status = ?1, status_reason = COALESCE(?2, status_reason), updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    to.label(),
                    opt_text(reason),
                    Utc::now().to_rfc3339(),
                    id,
                    from.label(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("transition_event: {e}")))?;
        debug!(event_id = %id, from = %from, to = %to, moved = affected == 1, "Event transition");
        Ok(affected == 1)
    }

    async fn record_event_failure(&self, id: &str, error: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE events SET status = 'failed', retry_count = retry_count + 1,
                        last_error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'processing'",
                params![error, Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("record_event_failure: {e}")))?;
        Ok(affected == 1)
    }

    async fn sweep_failed_events(
        &self,
        max_retries: u32,
    ) -> Result<Vec<EngagementEvent>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id FROM events WHERE status = 'failed' AND retry_count < ?1",
                params![i64::from(max_retries)],
            )
            .await
            .map_err(|e| StoreError::Query(format!("sweep_failed_events: {e}")))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("sweep_failed_events: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("sweep id: {e}")))?;
            ids.push(id);
        }

        let mut requeued = Vec::new();
        for id in ids {
            let affected = conn
                .execute(
                    "UPDATE events SET status = 'pending', updated_at = ?1
                     WHERE id = ?2 AND status = 'failed' AND retry_count < ?3",
                    params![Utc::now().to_rfc3339(), id.clone(), i64::from(max_retries)],
                )
                .await
                .map_err(|e| StoreError::Query(format!("sweep_failed_events: {e}")))?;
            if affected == 1
                && let Some(event) = self.get_event(&id).await?
            {
                requeued.push(event);
            }
        }
        Ok(requeued)
    }

    async fn archive_events(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE events SET status = 'archived', updated_at = ?1
                 WHERE status IN ('responded', 'escalated', 'skipped') AND received_at < ?2",
                params![Utc::now().to_rfc3339(), older_than.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("archive_events: {e}")))?;
        Ok(affected as usize)
    }

    async fn count_events(&self, status: EventStatus) -> Result<usize, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM events WHERE status = ?1",
                params![status.label()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("count_events: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("count_events: {e}")))?
        {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("count_events: {e}")))?;
                Ok(count.max(0) as usize)
            }
            None => Ok(0),
        }
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn upsert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO leads (id, name, email, phone, linkedin, active_instance, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, email = excluded.email, phone = excluded.phone,
                    linkedin = excluded.linkedin, active_instance = excluded.active_instance,
                    updated_at = excluded.updated_at",
                params![
                    lead.id.clone(),
                    opt_text(lead.name.as_deref()),
                    opt_text(lead.email.as_deref()),
                    opt_text(lead.phone.as_deref()),
                    opt_text(lead.linkedin.as_deref()),
                    opt_text(lead.active_instance.map(|u| u.to_string()).as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_lead: {e}")))?;
        Ok(())
    }

    async fn get_lead(&self, id: &str) -> Result<Option<Lead>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name, email, phone, linkedin, active_instance FROM leads WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_lead: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_lead: {e}")))?
        {
            Some(row) => {
                let active_str: Option<String> = row.get(5).ok();
                Ok(Some(Lead {
                    id: row
                        .get(0)
                        .map_err(|e| StoreError::Query(format!("lead id: {e}")))?,
                    name: row.get(1).ok(),
                    email: row.get(2).ok(),
                    phone: row.get(3).ok(),
                    linkedin: row.get(4).ok(),
                    active_instance: active_str.and_then(|s| Uuid::parse_str(&s).ok()),
                }))
            }
            None => Ok(None),
        }
    }

    // ── Sequence instances ──────────────────────────────────────────

    async fn insert_instance(&self, instance: &SequenceInstance) -> Result<(), StoreError> {
        let engagement_json = serde_json::to_string(&instance.engagement)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        // The partial unique index on (lead_id) WHERE status IN
        // ('active','paused') enforces one live instance per lead.
        self.conn()
            .execute(
                "INSERT INTO instances (id, lead_id, definition_id, cursor, status, pause_reason, started_at, engagement, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    instance.id.to_string(),
                    instance.lead_id.clone(),
                    instance.definition_id.clone(),
                    instance.cursor as i64,
                    instance.status.label(),
                    opt_text(instance.pause_reason.as_deref()),
                    instance.started_at.to_rfc3339(),
                    engagement_json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    StoreError::Constraint(format!(
                        "lead {} already has an active instance",
                        instance.lead_id
                    ))
                } else {
                    StoreError::Query(format!("insert_instance: {msg}"))
                }
            })?;

        self.conn()
            .execute(
                "UPDATE leads SET active_instance = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    instance.id.to_string(),
                    Utc::now().to_rfc3339(),
                    instance.lead_id.clone(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_instance lead link: {e}")))?;
        Ok(())
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<SequenceInstance>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_instance: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_instance: {e}")))?
        {
            Some(row) => Ok(Some(row_to_instance(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_active_instances(&self) -> Result<Vec<SequenceInstance>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM instances WHERE status = 'active'
                     ORDER BY started_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_active_instances: {e}")))?;

        let mut instances = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_active_instances: {e}")))?
        {
            instances.push(row_to_instance(&row)?);
        }
        Ok(instances)
    }

    async fn advance_cursor(
        &self,
        id: Uuid,
        from: usize,
        to: usize,
        status: SequenceStatus,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE instances SET cursor = ?1, status = ?2, updated_at = ?3
                 WHERE id = ?4 AND cursor = ?5 AND status = 'active'",
                params![
                    to as i64,
                    status.label(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    from as i64,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("advance_cursor: {e}")))?;
        Ok(affected == 1)
    }

    async fn set_instance_status(
        &self,
        id: Uuid,
        expected: SequenceStatus,
        target: SequenceStatus,
        pause_reason: Option<&str>,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE instances SET status = ?1, pause_reason = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    target.label(),
                    opt_text(pause_reason),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    expected.label(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_instance_status: {e}")))?;
        Ok(affected == 1)
    }

    async fn save_engagement(
        &self,
        id: Uuid,
        engagement: &EngagementState,
    ) -> Result<(), StoreError> {
        let engagement_json = serde_json::to_string(engagement)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let affected = self
            .conn()
            .execute(
                "UPDATE instances SET engagement = ?1, updated_at = ?2 WHERE id = ?3",
                params![engagement_json, Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("save_engagement: {e}")))?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "sequence_instance".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Touches ─────────────────────────────────────────────────────

    async fn upsert_touch(&self, touch: &Touch) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO touches (instance_id, touch_number, scheduled_for, status, channel, skip_reason, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(instance_id, touch_number) DO UPDATE SET
                    scheduled_for = excluded.scheduled_for, status = excluded.status,
                    channel = excluded.channel, skip_reason = excluded.skip_reason,
                    updated_at = excluded.updated_at",
                params![
                    touch.instance_id.to_string(),
                    touch.touch_number as i64,
                    touch.scheduled_for.to_rfc3339(),
                    touch.status.label(),
                    touch.channel.label(),
                    opt_text(touch.skip_reason.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_touch: {e}")))?;
        Ok(())
    }

    async fn get_touch(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<Option<Touch>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT instance_id, touch_number, scheduled_for, status, channel, skip_reason
                 FROM touches WHERE instance_id = ?1 AND touch_number = ?2",
                params![instance_id.to_string(), touch_number as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_touch: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("get_touch: {e}")))?
        {
            Some(row) => Ok(Some(row_to_touch(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_touches(&self, instance_id: Uuid) -> Result<Vec<Touch>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT instance_id, touch_number, scheduled_for, status, channel, skip_reason
                 FROM touches WHERE instance_id = ?1 ORDER BY touch_number ASC",
                params![instance_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_touches: {e}")))?;

        let mut touches = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_touches: {e}")))?
        {
            touches.push(row_to_touch(&row)?);
        }
        Ok(touches)
    }

    async fn mark_touch_sent(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE touches SET status = 'sent', updated_at = ?1
                 WHERE instance_id = ?2 AND touch_number = ?3 AND status = 'pending'",
                params![
                    Utc::now().to_rfc3339(),
                    instance_id.to_string(),
                    touch_number as i64,
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_touch_sent: {e}")))?;
        Ok(affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::event::Platform;

    fn event(external_id: &str) -> EngagementEvent {
        EngagementEvent::new(
            Platform::Instagram,
            external_id,
            Some("interested in pricing".into()),
            Some(ActorProfile {
                name: Some("Dana".into()),
                bio: Some("Founder".into()),
                follower_count: Some(1200),
                location: None,
            }),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn event_roundtrip() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut e = event("c1");
        e.priority = 2;
        store.insert_event_if_absent(&e).await.unwrap();

        let stored = store.get_event("instagram:c1").await.unwrap().unwrap();
        assert_eq!(stored.platform, Platform::Instagram);
        assert_eq!(stored.priority, 2);
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.actor.unwrap().follower_count, Some(1200));
    }

    #[tokio::test]
    async fn local_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leadflow.db");
        {
            let store = LibSqlStore::new_local(&path).await.unwrap();
            store.insert_event_if_absent(&event("c1")).await.unwrap();
        }

        let store = LibSqlStore::new_local(&path).await.unwrap();
        let stored = store.get_event("instagram:c1").await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_first() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut first = event("c1");
        first.priority = 1;
        store.insert_event_if_absent(&first).await.unwrap();

        let mut second = event("c1");
        second.priority = 7;
        let stored = store.insert_event_if_absent(&second).await.unwrap();
        assert_eq!(stored.priority, 1);
        assert_eq!(store.count_events(EventStatus::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claim_cas_via_rows_affected() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert_event_if_absent(&event("c1")).await.unwrap();

        assert!(store.try_claim_event("instagram:c1").await.unwrap());
        assert!(!store.try_claim_event("instagram:c1").await.unwrap());
    }

    #[tokio::test]
    async fn pending_events_ordered_by_priority_then_time() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let base = Utc::now();

        let mut urgent_late = event("a");
        urgent_late.priority = 0;
        urgent_late.received_at = base + chrono::Duration::seconds(10);
        let mut urgent_early = event("b");
        urgent_early.priority = 0;
        urgent_early.received_at = base;
        let mut relaxed = event("c");
        relaxed.priority = 5;
        relaxed.received_at = base - chrono::Duration::seconds(60);

        for e in [&urgent_late, &urgent_early, &relaxed] {
            store.insert_event_if_absent(e).await.unwrap();
        }

        let pending = store.list_pending_events(10).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["instagram:b", "instagram:a", "instagram:c"]);
    }

    #[tokio::test]
    async fn retry_sweep_respects_cap() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.insert_event_if_absent(&event("c1")).await.unwrap();

        // Fail three times (the cap). Each sweep puts the event back.
        for _ in 0..3 {
            assert!(store.try_claim_event("instagram:c1").await.unwrap());
            store
                .record_event_failure("instagram:c1", "timeout")
                .await
                .unwrap();
            store.sweep_failed_events(3).await.unwrap();
        }

        // retry_count is now 3; a sweep with cap 3 must not requeue.
        let requeued = store.sweep_failed_events(3).await.unwrap();
        assert!(requeued.is_empty());
        let stored = store.get_event("instagram:c1").await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failed);
        assert_eq!(stored.retry_count, 3);
    }

    #[tokio::test]
    async fn instance_roundtrip_with_engagement() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_lead(&Lead::new("lead-1")).await.unwrap();

        let mut instance = SequenceInstance::new("lead-1", "moderate-6", Utc::now());
        instance.engagement.record(
            ChannelKind::Email,
            crate::sequence::model::EngagementSignal::Opened,
            Utc::now(),
        );
        store.insert_instance(&instance).await.unwrap();

        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.lead_id, "lead-1");
        assert_eq!(stored.engagement.stats(ChannelKind::Email).opens, 1);

        let lead = store.get_lead("lead-1").await.unwrap().unwrap();
        assert_eq!(lead.active_instance, Some(instance.id));
    }

    #[tokio::test]
    async fn second_active_instance_rejected() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.upsert_lead(&Lead::new("lead-1")).await.unwrap();
        store
            .insert_instance(&SequenceInstance::new("lead-1", "a", Utc::now()))
            .await
            .unwrap();
        let err = store
            .insert_instance(&SequenceInstance::new("lead-1", "b", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn touch_sent_is_at_most_once() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let instance_id = Uuid::new_v4();
        store
            .upsert_touch(&Touch {
                instance_id,
                touch_number: 0,
                scheduled_for: Utc::now(),
                status: TouchStatus::Pending,
                channel: ChannelKind::Email,
                skip_reason: None,
            })
            .await
            .unwrap();

        assert!(store.mark_touch_sent(instance_id, 0).await.unwrap());
        assert!(!store.mark_touch_sent(instance_id, 0).await.unwrap());
    }
}
