//! Escalation policy — a fixed, ordered decision table over engagement
//! state. Same state in, same decision out; no clock reads, no randomness.

use chrono::{DateTime, Duration, Utc};

use crate::channels::ChannelKind;
use crate::config::SequenceConfig;
use crate::sequence::model::SequenceInstance;

/// What to do with an instance given its accumulated engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Keep following the definition as written.
    Stay,
    /// Deliver the next touch over a different channel.
    SwitchChannel {
        to: ChannelKind,
        reason: &'static str,
    },
    /// Stop working this instance.
    Archive { reason: &'static str },
}

/// Ordered rules, first match wins.
///
/// Rules earlier in the order represent stronger signals: an accepted
/// connection outranks open/click patterns, and any positive engagement
/// refreshes the staleness clock so the archive rule cannot fire.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    no_engagement_archive_days: i64,
}

impl EscalationPolicy {
    pub fn new(config: &SequenceConfig) -> Self {
        Self {
            no_engagement_archive_days: config.no_engagement_archive_days,
        }
    }

    /// Evaluate the decision table for one instance.
    pub fn evaluate(&self, instance: &SequenceInstance, now: DateTime<Utc>) -> EscalationDecision {
        let engagement = &instance.engagement;

        // 1. Accepted connection: move the conversation to LinkedIn.
        if engagement.connection_accepted && engagement.total_replies() == 0 {
            return EscalationDecision::SwitchChannel {
                to: ChannelKind::Linkedin,
                reason: "connection accepted",
            };
        }

        // 2. Reads everything, clicks, never replies: email isn't landing.
        let email = engagement.stats(ChannelKind::Email);
        if email.opens >= 2 && email.clicks >= 1 && engagement.total_replies() == 0 {
            return EscalationDecision::SwitchChannel {
                to: ChannelKind::Linkedin,
                reason: "engaged with email but not replying",
            };
        }

        // 3. Nothing at all for too long: stop working the instance.
        let last_activity = engagement.last_engagement_at.unwrap_or(instance.started_at);
        if now - last_activity >= Duration::days(self.no_engagement_archive_days) {
            return EscalationDecision::Archive {
                reason: "no engagement",
            };
        }

        EscalationDecision::Stay
    }
}
