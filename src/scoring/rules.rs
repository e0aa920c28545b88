//! Per-category rule sets — keyword containment, numeric thresholds,
//! recency decay.
//!
//! Each rule set is compiled once and evaluates one category of a
//! `SignalBundle`. Contributions are summed by the engine and clamped to the
//! category cap there, so a bundle matching every intent keyword still tops
//! out at the cap.

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::scoring::model::{ActorProfile, SignalBundle};

/// A single keyword rule with a compiled regex and its point value.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    /// Human-readable pattern description.
    pub pattern: String,
    /// Compiled regex for matching.
    pub regex: Regex,
    /// Points contributed when the rule matches.
    pub points: u8,
}

impl KeywordRule {
    fn new(pattern: &str, regex: &str, points: u8) -> Self {
        Self {
            pattern: pattern.to_string(),
            // Patterns are static and tested; a bad one is a programming error.
            regex: Regex::new(regex).unwrap(),
            points,
        }
    }
}

/// All category rule sets, compiled once.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Buying-intent keywords matched against body text.
    pub intent_rules: Vec<KeywordRule>,
    /// ICP-fit keywords matched against the actor's bio.
    pub fit_rules: Vec<KeywordRule>,
    /// Follower-count bands: `(minimum, points)`, highest band wins.
    pub follower_bands: Vec<(u64, u8)>,
    /// Body word-count bands: `(minimum words, points)`, highest band wins.
    pub depth_bands: Vec<(usize, u8)>,
    /// Recency decay: `(maximum elapsed hours, points)`, first match wins.
    pub recency_bands: Vec<(i64, u8)>,
    /// Points per prior signal from the same actor.
    pub frequency_points: u8,
}

impl RuleSet {
    /// Default rule set.
    pub fn default_rules() -> Self {
        let intent_rules = vec![
            KeywordRule::new("pricing", r"(?i)\b(pricing|price|cost|how much)\b", 10),
            KeywordRule::new("demo/trial", r"(?i)\b(demo|free trial|trial)\b", 10),
            KeywordRule::new("purchase intent", r"(?i)\b(buy|purchase|sign(ing)? up|get started)\b", 10),
            KeywordRule::new("evaluation", r"(?i)\b(looking for|in the market|evaluat(e|ing)|compar(e|ing))\b", 8),
            KeywordRule::new("recommendation ask", r"(?i)\b(recommend|suggestions?|which (one|tool))\b", 6),
            KeywordRule::new("interest", r"(?i)\b(interested|tell me more|more info)\b", 6),
            KeywordRule::new("contact ask", r"(?i)\b(dm me|message me|reach out|send me)\b", 8),
        ];

        let fit_rules = vec![
            KeywordRule::new("decision maker", r"(?i)\b(founder|co-?founder|ceo|owner|president)\b", 10),
            KeywordRule::new("senior title", r"(?i)\b(director|vp|vice president|head of|chief)\b", 8),
            KeywordRule::new("practitioner", r"(?i)\b(manager|lead|principal)\b", 5),
            KeywordRule::new("agency/consultant", r"(?i)\b(agency|consultant|coach)\b", 4),
        ];

        Self {
            intent_rules,
            fit_rules,
            follower_bands: vec![(100_000, 10), (10_000, 8), (1_000, 5), (100, 2)],
            depth_bands: vec![(200, 15), (50, 10), (15, 6), (3, 3)],
            recency_bands: vec![(1, 15), (6, 12), (24, 9), (72, 5), (168, 2)],
            frequency_points: 3,
        }
    }

    // ── Category evaluators ─────────────────────────────────────────
    //
    // Each returns raw (unclamped) points. Missing input → 0.

    /// Engagement depth: how substantive the signal text is.
    pub fn engagement_depth(&self, bundle: &SignalBundle) -> u32 {
        let Some(text) = bundle.body_text.as_deref() else {
            return 0;
        };
        let words = text.split_whitespace().count();
        if words == 0 {
            return 0;
        }

        let mut points: u32 = self
            .depth_bands
            .iter()
            .find(|(min, _)| words >= *min)
            .map(|(_, p)| u32::from(*p))
            .unwrap_or(0);

        // A direct question is a stronger signal than a statement.
        if text.contains('?') {
            points += 5;
        }
        points
    }

    /// Profile/ICP fit from bio keywords and audience size.
    pub fn profile_fit(&self, actor: Option<&ActorProfile>) -> u32 {
        let Some(actor) = actor else {
            return 0;
        };
        let mut points: u32 = 0;

        if let Some(bio) = actor.bio.as_deref() {
            for rule in &self.fit_rules {
                if rule.regex.is_match(bio) {
                    points += u32::from(rule.points);
                }
            }
        }

        if let Some(followers) = actor.follower_count {
            points += self
                .follower_bands
                .iter()
                .find(|(min, _)| followers >= *min)
                .map(|(_, p)| u32::from(*p))
                .unwrap_or(0);
        }

        points
    }

    /// Buying-intent keywords in the body text.
    pub fn buying_intent(&self, bundle: &SignalBundle) -> u32 {
        let Some(text) = bundle.body_text.as_deref() else {
            return 0;
        };
        self.intent_rules
            .iter()
            .filter(|r| r.regex.is_match(text))
            .map(|r| u32::from(r.points))
            .sum()
    }

    /// Recency decay plus repeat-signal frequency.
    ///
    /// `now` is passed in rather than read from the clock so that scoring
    /// stays a pure function of its inputs.
    pub fn recency_frequency(&self, bundle: &SignalBundle, now: DateTime<Utc>) -> u32 {
        let mut points: u32 = 0;

        if let Some(occurred) = bundle.occurred_at {
            let elapsed_hours = now.signed_duration_since(occurred).num_hours().max(0);
            points += self
                .recency_bands
                .iter()
                .find(|(max, _)| elapsed_hours <= *max)
                .map(|(_, p)| u32::from(*p))
                .unwrap_or(0);
        }

        points += bundle.prior_signals * u32::from(self.frequency_points);
        points
    }
}
