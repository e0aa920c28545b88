//! Engagement events and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::scoring::model::ActorProfile;

// ── Platform ────────────────────────────────────────────────────────

/// Source platform of an engagement signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    Facebook,
    Linkedin,
    X,
    Web,
}

impl Platform {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
            Self::Linkedin => "linkedin",
            Self::X => "x",
            Self::Web => "web",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instagram" => Some(Self::Instagram),
            "facebook" => Some(Self::Facebook),
            "linkedin" => Some(Self::Linkedin),
            "x" => Some(Self::X),
            "web" => Some(Self::Web),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Queue item lifecycle. Transitions outside `can_transition` are rejected
/// at the store layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Responded,
    Escalated,
    Skipped,
    Failed,
    Archived,
}

impl EventStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Responded => "responded",
            Self::Escalated => "escalated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "responded" => Some(Self::Responded),
            "escalated" => Some(Self::Escalated),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Terminal processing outcomes (eligible for archiving).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Responded | Self::Escalated | Self::Skipped)
    }

    /// The transition table:
    /// `PENDING → PROCESSING → {RESPONDED, ESCALATED, SKIPPED, FAILED}`,
    /// `FAILED → PENDING` (bounded retry), terminal → `ARCHIVED`.
    pub fn can_transition(&self, target: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, target),
            (Pending, Processing)
                | (Processing, Responded)
                | (Processing, Escalated)
                | (Processing, Skipped)
                | (Processing, Failed)
                | (Failed, Pending)
                | (Responded, Archived)
                | (Escalated, Archived)
                | (Skipped, Archived)
        )
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Caller-supplied classification when completing a processed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// A response was sent.
    Responded,
    /// Needs a human; reason is surfaced to the operator.
    Escalated { reason: String },
    /// Deliberately not acted on (spam, out of scope, unreachable).
    Skipped { reason: String },
}

impl EventOutcome {
    pub fn status(&self) -> EventStatus {
        match self {
            Self::Responded => EventStatus::Responded,
            Self::Escalated { .. } => EventStatus::Escalated,
            Self::Skipped { .. } => EventStatus::Skipped,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Responded => None,
            Self::Escalated { reason } | Self::Skipped { reason } => Some(reason),
        }
    }
}

// ── Event ───────────────────────────────────────────────────────────

/// An inbound engagement signal in the intake queue.
///
/// Created once at ingestion, mutated only through the queue's transition
/// operations, archived rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    /// Dedup key: `platform:external_id`. Globally unique.
    pub id: String,
    pub platform: Platform,
    pub body_text: Option<String>,
    pub actor: Option<ActorProfile>,
    pub received_at: DateTime<Utc>,
    /// Lower is more urgent. Fixed at enqueue.
    pub priority: i32,
    pub status: EventStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Human-readable reason for a terminal status.
    pub status_reason: Option<String>,
}

impl EngagementEvent {
    /// Validated construction. Rejects empty external ids at the boundary
    /// instead of letting an unusable dedup key in.
    pub fn new(
        platform: Platform,
        external_id: &str,
        body_text: Option<String>,
        actor: Option<ActorProfile>,
        received_at: DateTime<Utc>,
    ) -> Result<Self, QueueError> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(QueueError::MalformedEvent {
                id: format!("{platform}:<empty>"),
                reason: "external id is empty".into(),
            });
        }

        Ok(Self {
            id: dedup_key(platform, external_id),
            platform,
            body_text: body_text.filter(|t| !t.trim().is_empty()),
            actor,
            received_at,
            priority: 0,
            status: EventStatus::Pending,
            retry_count: 0,
            last_error: None,
            status_reason: None,
        })
    }
}

/// Stable dedup key for an event.
pub fn dedup_key(platform: Platform, external_id: &str) -> String {
    format!("{}:{}", platform.label(), external_id)
}
