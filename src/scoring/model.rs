//! Scoring input and output types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Input ───────────────────────────────────────────────────────────

/// Raw signal data for one lead, as far as enrichment has gotten.
///
/// Every field is optional: a bundle built from a bare click has nothing but
/// a timestamp, and that must still score without erroring. Missing fields
/// contribute zero to their rules — never an inferred default — so sparse
/// bundles are biased cold, not hot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalBundle {
    /// Text of the comment/reply/message, if the signal carried one.
    pub body_text: Option<String>,
    /// Enriched profile of the person who engaged.
    pub actor: Option<ActorProfile>,
    /// When the signal occurred.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Prior signals from the same actor in the lookback window.
    pub prior_signals: u32,
}

/// Public profile attributes of the engaging actor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActorProfile {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub follower_count: Option<u64>,
    pub location: Option<String>,
}

// ── Output ──────────────────────────────────────────────────────────

/// Scoring categories. `BTreeMap` keys, so ordering must be stable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    EngagementDepth,
    ProfileFit,
    BuyingIntent,
    Recency,
}

impl Category {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EngagementDepth => "engagement_depth",
            Self::ProfileFit => "profile_fit",
            Self::BuyingIntent => "buying_intent",
            Self::Recency => "recency",
        }
    }
}

/// Ordered classification bucket. Derives `Ord` so `tier >= Tier::Warm`
/// reads the way the thresholds do.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Cold,
    Cool,
    Warm,
    Hot,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Cool => "cool",
            Self::Warm => "warm",
            Self::Hot => "hot",
        }
    }

    /// Whether a lead at this tier qualifies for an outreach sequence.
    pub fn qualifies(&self) -> bool {
        *self >= Tier::Warm
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Next-step recommendation derived from the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Reach out now, personally.
    ImmediateOutreach,
    /// Enroll in a multi-touch sequence.
    StartSequence,
    /// Keep on a low-frequency nurture list.
    Nurture,
    /// Watch for further signals, no outreach.
    Monitor,
}

/// Immutable output of the scoring engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Sum of clamped category contributions, clamped to 0–100.
    pub total_score: u8,
    pub tier: Tier,
    /// Per-category points, each independently capped.
    pub breakdown: BTreeMap<Category, u8>,
    pub recommended_action: RecommendedAction,
    /// Estimated conversion probability; monotonic in `total_score`.
    pub estimated_probability: f32,
}
