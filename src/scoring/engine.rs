//! The scoring engine: weighted, independently-capped categories summed and
//! clamped to 0–100, then mapped to a tier and a conversion probability.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ScoringConfig;
use crate::scoring::model::{
    Category, RecommendedAction, ScoreResult, SignalBundle, Tier,
};
use crate::scoring::rules::RuleSet;

/// Pure scoring engine. Construct once, call `score` from anywhere —
/// it holds only immutable configuration and compiled rules.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
    rules: RuleSet,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, rules: RuleSet) -> Self {
        Self { config, rules }
    }

    /// Engine with default cutoffs, caps, and rules.
    pub fn with_defaults() -> Self {
        Self::new(ScoringConfig::default(), RuleSet::default_rules())
    }

    /// Score a signal bundle.
    ///
    /// Never fails: a malformed or entirely empty bundle scores 0 / COLD.
    /// `now` is an explicit input so repeated calls with the same arguments
    /// return the same result.
    pub fn score(&self, bundle: &SignalBundle, now: DateTime<Utc>) -> ScoreResult {
        let mut breakdown = BTreeMap::new();

        let engagement = clamp_to_cap(
            self.rules.engagement_depth(bundle),
            self.config.engagement_cap,
        );
        let profile = clamp_to_cap(
            self.rules.profile_fit(bundle.actor.as_ref()),
            self.config.profile_cap,
        );
        let intent = clamp_to_cap(self.rules.buying_intent(bundle), self.config.intent_cap);
        let recency = clamp_to_cap(
            self.rules.recency_frequency(bundle, now),
            self.config.recency_cap,
        );

        breakdown.insert(Category::EngagementDepth, engagement);
        breakdown.insert(Category::ProfileFit, profile);
        breakdown.insert(Category::BuyingIntent, intent);
        breakdown.insert(Category::Recency, recency);

        let total: u32 =
            u32::from(engagement) + u32::from(profile) + u32::from(intent) + u32::from(recency);
        let total_score = total.min(100) as u8;

        let tier = self.tier_for(total_score);
        let recommended_action = action_for(tier);
        let estimated_probability = self.probability_for(total_score);

        debug!(
            total = total_score,
            tier = %tier,
            engagement,
            profile,
            intent,
            recency,
            "Scored signal bundle"
        );

        ScoreResult {
            total_score,
            tier,
            breakdown,
            recommended_action,
            estimated_probability,
        }
    }

    /// Map a total score to a tier using the configured cutoffs.
    fn tier_for(&self, score: u8) -> Tier {
        if score >= self.config.hot_cutoff {
            Tier::Hot
        } else if score >= self.config.warm_cutoff {
            Tier::Warm
        } else if score >= self.config.cool_cutoff {
            Tier::Cool
        } else {
            Tier::Cold
        }
    }

    /// Map a total score to a probability using the configured bands.
    fn probability_for(&self, score: u8) -> f32 {
        self.config
            .probability_bands
            .iter()
            .find(|(min, _)| score >= *min)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }
}

fn clamp_to_cap(raw: u32, cap: u8) -> u8 {
    raw.min(u32::from(cap)) as u8
}

fn action_for(tier: Tier) -> RecommendedAction {
    match tier {
        Tier::Hot => RecommendedAction::ImmediateOutreach,
        Tier::Warm => RecommendedAction::StartSequence,
        Tier::Cool => RecommendedAction::Nurture,
        Tier::Cold => RecommendedAction::Monitor,
    }
}
