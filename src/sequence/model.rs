//! Sequence templates, per-lead execution state, and touches.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channels::ChannelKind;
use crate::error::SequenceError;

// ── Lead ────────────────────────────────────────────────────────────

/// An identity we can reach out to. Channel reachability is a boolean fact
/// recorded here, consulted (never derived) by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin: Option<String>,
    /// At most one active sequence instance.
    pub active_instance: Option<Uuid>,
}

impl Lead {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            email: None,
            phone: None,
            linkedin: None,
            active_instance: None,
        }
    }

    /// Whether the lead is reachable on a channel.
    pub fn reachable(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Email => self.email.is_some(),
            ChannelKind::Sms | ChannelKind::Voice => self.phone.is_some(),
            ChannelKind::Linkedin => self.linkedin.is_some(),
        }
    }

    /// Target address for a channel, if reachable.
    pub fn address(&self, channel: ChannelKind) -> Option<&str> {
        match channel {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Sms | ChannelKind::Voice => self.phone.as_deref(),
            ChannelKind::Linkedin => self.linkedin.as_deref(),
        }
    }
}

// ── Definition ──────────────────────────────────────────────────────

/// Branch precondition on a touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchCondition {
    /// Fire unconditionally.
    Always,
    /// Fire only if the lead has not replied on any channel.
    IfNoResponse,
    /// Fire only if they opened but never replied.
    IfOpenedNoReply,
    /// Fire only if they clicked something.
    IfClicked,
    /// Fire only after a LinkedIn connection was accepted.
    IfConnectionAccepted,
}

impl TouchCondition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::IfNoResponse => "if_no_response",
            Self::IfOpenedNoReply => "if_opened_no_reply",
            Self::IfClicked => "if_clicked",
            Self::IfConnectionAccepted => "if_connection_accepted",
        }
    }
}

/// One step of a sequence template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchSpec {
    /// Days after sequence start this touch becomes due.
    pub day_offset: i64,
    pub channel: ChannelKind,
    pub condition: TouchCondition,
    /// What the message should accomplish; handed to the content generator.
    pub goal: String,
}

/// An ordered, immutable sequence template. Loaded once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub id: String,
    pub name: String,
    pub touches: Vec<TouchSpec>,
}

impl SequenceDefinition {
    /// Parse and validate a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self, SequenceError> {
        let def: Self = serde_json::from_str(json).map_err(|e| SequenceError::InvalidDefinition {
            id: "<unparsed>".into(),
            reason: e.to_string(),
        })?;
        def.validate()?;
        Ok(def)
    }

    /// Structural validation: at least one touch, non-negative and
    /// non-decreasing day offsets.
    pub fn validate(&self) -> Result<(), SequenceError> {
        if self.id.trim().is_empty() {
            return Err(SequenceError::InvalidDefinition {
                id: self.id.clone(),
                reason: "definition id is empty".into(),
            });
        }
        if self.touches.is_empty() {
            return Err(SequenceError::InvalidDefinition {
                id: self.id.clone(),
                reason: "definition has no touches".into(),
            });
        }
        let mut last_offset = 0;
        for (i, touch) in self.touches.iter().enumerate() {
            if touch.day_offset < 0 {
                return Err(SequenceError::InvalidDefinition {
                    id: self.id.clone(),
                    reason: format!("touch {i} has negative day offset"),
                });
            }
            if touch.day_offset < last_offset {
                return Err(SequenceError::InvalidDefinition {
                    id: self.id.clone(),
                    reason: format!(
                        "touch {i} day offset {} is before touch {}'s {}",
                        touch.day_offset,
                        i - 1,
                        last_offset
                    ),
                });
            }
            last_offset = touch.day_offset;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.touches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touches.is_empty()
    }
}

// ── Engagement state ────────────────────────────────────────────────

/// Inbound signal fed back into an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementSignal {
    Opened,
    Clicked,
    Replied,
    Bounced,
    ConnectionAccepted,
}

/// Per-channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub opens: u32,
    pub clicks: u32,
    pub replies: u32,
    pub bounces: u32,
}

/// Accumulated engagement across the life of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementState {
    /// Stable iteration order so serialized state is diffable.
    pub channels: BTreeMap<ChannelKind, ChannelStats>,
    pub connection_accepted: bool,
    pub last_engagement_at: Option<DateTime<Utc>>,
}

impl EngagementState {
    /// Merge one signal into the accumulated state.
    pub fn record(&mut self, channel: ChannelKind, signal: EngagementSignal, at: DateTime<Utc>) {
        let stats = self.channels.entry(channel).or_default();
        match signal {
            EngagementSignal::Opened => stats.opens += 1,
            EngagementSignal::Clicked => stats.clicks += 1,
            EngagementSignal::Replied => stats.replies += 1,
            EngagementSignal::Bounced => stats.bounces += 1,
            EngagementSignal::ConnectionAccepted => self.connection_accepted = true,
        }
        // Bounces are delivery failures, not engagement.
        if signal != EngagementSignal::Bounced {
            self.last_engagement_at = Some(
                self.last_engagement_at
                    .map_or(at, |prev| prev.max(at)),
            );
        }
    }

    pub fn stats(&self, channel: ChannelKind) -> ChannelStats {
        self.channels.get(&channel).copied().unwrap_or_default()
    }

    pub fn total_replies(&self) -> u32 {
        self.channels.values().map(|s| s.replies).sum()
    }

    pub fn total_opens(&self) -> u32 {
        self.channels.values().map(|s| s.opens).sum()
    }

    pub fn total_clicks(&self) -> u32 {
        self.channels.values().map(|s| s.clicks).sum()
    }
}

// ── Instance ────────────────────────────────────────────────────────

/// Execution status of a sequence instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl SequenceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-lead execution state of one sequence definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceInstance {
    pub id: Uuid,
    pub lead_id: String,
    pub definition_id: String,
    /// Index of the next touch to consider.
    pub cursor: usize,
    pub status: SequenceStatus,
    pub pause_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub engagement: EngagementState,
}

impl SequenceInstance {
    pub fn new(lead_id: &str, definition_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id: lead_id.to_string(),
            definition_id: definition_id.to_string(),
            cursor: 0,
            status: SequenceStatus::Active,
            pause_reason: None,
            started_at: now,
            engagement: EngagementState::default(),
        }
    }

    /// When the touch at `index` becomes due.
    pub fn scheduled_for(&self, spec: &TouchSpec) -> DateTime<Utc> {
        self.started_at + Duration::days(spec.day_offset)
    }
}

// ── Touch ───────────────────────────────────────────────────────────

/// Lifecycle of one scheduled/executed touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchStatus {
    Pending,
    Sent,
    Skipped,
    Failed,
}

impl TouchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One scheduled step of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Touch {
    pub instance_id: Uuid,
    /// Zero-based index into the definition.
    pub touch_number: usize,
    pub scheduled_for: DateTime<Utc>,
    pub status: TouchStatus,
    pub channel: ChannelKind,
    /// Set when status is `Skipped` or `Failed`.
    pub skip_reason: Option<String>,
}
