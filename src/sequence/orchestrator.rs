//! Sequence orchestrator — runs instances against their definitions.
//!
//! The cursor only ever moves forward, and only through store CAS
//! operations. Skips advance it directly; sends advance it through
//! `mark_sent` after the touch row flips `Pending → Sent`, so a touch is
//! dispatched at most once even with concurrent tickers.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{ChannelKind, ChannelRegistry};
use crate::config::SequenceConfig;
use crate::content::{ContentGenerator, MessageBrief};
use crate::error::{ConfigError, Error, SequenceError, StoreError};
use crate::sequence::escalation::{EscalationDecision, EscalationPolicy};
use crate::sequence::model::{
    EngagementSignal, EngagementState, Lead, SequenceDefinition, SequenceInstance,
    SequenceStatus, Touch, TouchCondition, TouchSpec, TouchStatus,
};
use crate::store::RecordStore;

/// Drives sequence instances: offers due touches, records sends and
/// engagement, applies the escalation policy.
pub struct SequenceOrchestrator {
    store: Arc<dyn RecordStore>,
    definitions: HashMap<String, SequenceDefinition>,
    config: SequenceConfig,
    policy: EscalationPolicy,
}

impl SequenceOrchestrator {
    /// Build an orchestrator over a validated set of definitions.
    pub fn new(
        store: Arc<dyn RecordStore>,
        definitions: Vec<SequenceDefinition>,
        config: SequenceConfig,
    ) -> Result<Self, SequenceError> {
        let mut map = HashMap::new();
        for def in definitions {
            def.validate()?;
            map.insert(def.id.clone(), def);
        }
        let policy = EscalationPolicy::new(&config);
        Ok(Self {
            store,
            definitions: map,
            config,
            policy,
        })
    }

    pub fn definition(&self, id: &str) -> Result<&SequenceDefinition, SequenceError> {
        self.definitions
            .get(id)
            .ok_or_else(|| SequenceError::UnknownDefinition(id.to_string()))
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start a sequence for a lead. One live instance per lead; a second
    /// start fails with `AlreadyActive`.
    pub async fn start(
        &self,
        lead: &Lead,
        definition_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SequenceInstance, SequenceError> {
        self.definition(definition_id)?;
        let instance = SequenceInstance::new(&lead.id, definition_id, now);

        match self.store.insert_instance(&instance).await {
            Ok(()) => {
                info!(
                    instance_id = %instance.id,
                    lead_id = %lead.id,
                    definition = %definition_id,
                    "Sequence started"
                );
                Ok(instance)
            }
            Err(StoreError::Constraint(_)) => Err(SequenceError::AlreadyActive {
                lead_id: lead.id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Pause an active instance.
    pub async fn pause(&self, id: Uuid, reason: &str) -> Result<(), SequenceError> {
        let moved = self
            .store
            .set_instance_status(id, SequenceStatus::Active, SequenceStatus::Paused, Some(reason))
            .await?;
        if !moved {
            return Err(self.state_error(id, "pause").await);
        }
        info!(instance_id = %id, reason = %reason, "Sequence paused");
        Ok(())
    }

    /// Resume a paused instance.
    pub async fn resume(&self, id: Uuid) -> Result<(), SequenceError> {
        let moved = self
            .store
            .set_instance_status(id, SequenceStatus::Paused, SequenceStatus::Active, None)
            .await?;
        if !moved {
            return Err(self.state_error(id, "resume").await);
        }
        info!(instance_id = %id, "Sequence resumed");
        Ok(())
    }

    // ── Touch scheduling ────────────────────────────────────────────

    /// The next touch that is due and whose condition holds, if any.
    ///
    /// Touches whose condition does not hold are recorded as SKIPPED and
    /// the cursor moves past them immediately, so a single call walks
    /// through any run of non-applicable touches. The returned touch stays
    /// PENDING until `mark_sent`; calling again before then re-offers it.
    pub async fn get_due_touch(
        &self,
        instance_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(Touch, TouchSpec)>, SequenceError> {
        loop {
            let instance = self
                .store
                .get_instance(instance_id)
                .await?
                .ok_or(SequenceError::InstanceNotFound(instance_id))?;
            if instance.status != SequenceStatus::Active {
                return Ok(None);
            }

            let def = self.definition(&instance.definition_id)?;
            let cursor = instance.cursor;
            if cursor >= def.len() {
                self.finish(&instance).await?;
                return Ok(None);
            }

            let spec = &def.touches[cursor];
            let scheduled_for = instance.scheduled_for(spec);
            if now < scheduled_for {
                return Ok(None);
            }

            if !condition_met(spec.condition, &instance.engagement) {
                let skipped = Touch {
                    instance_id,
                    touch_number: cursor,
                    scheduled_for,
                    status: TouchStatus::Skipped,
                    channel: spec.channel,
                    skip_reason: Some(format!("condition {} not met", spec.condition.label())),
                };
                self.store.upsert_touch(&skipped).await?;
                debug!(
                    instance_id = %instance_id,
                    touch = cursor,
                    condition = spec.condition.label(),
                    "Touch skipped"
                );
                if !self.advance(&instance, def, cursor).await? {
                    // Someone else is driving this instance.
                    return Ok(None);
                }
                continue;
            }

            // Condition holds: offer the touch, creating the row if new.
            let touch = match self.store.get_touch(instance_id, cursor).await? {
                Some(t) if t.status == TouchStatus::Pending => t,
                Some(t) if t.status == TouchStatus::Failed => {
                    // Prior dispatch failed; offer it again.
                    let retry = Touch {
                        status: TouchStatus::Pending,
                        skip_reason: None,
                        ..t
                    };
                    self.store.upsert_touch(&retry).await?;
                    retry
                }
                Some(_) => {
                    // Sent or skipped but the cursor never moved (crash
                    // between the two writes). Repair and look again.
                    if !self.advance(&instance, def, cursor).await? {
                        return Ok(None);
                    }
                    continue;
                }
                None => {
                    let touch = Touch {
                        instance_id,
                        touch_number: cursor,
                        scheduled_for,
                        status: TouchStatus::Pending,
                        channel: spec.channel,
                        skip_reason: None,
                    };
                    self.store.upsert_touch(&touch).await?;
                    touch
                }
            };
            return Ok(Some((touch, spec.clone())));
        }
    }

    /// Record a successful send and move the cursor past the touch.
    ///
    /// Idempotent: returns `false` without side effects when the touch was
    /// already sent (a concurrent ticker beat us to it).
    pub async fn mark_sent(
        &self,
        instance_id: Uuid,
        touch_number: usize,
    ) -> Result<bool, SequenceError> {
        if !self.store.mark_touch_sent(instance_id, touch_number).await? {
            debug!(instance_id = %instance_id, touch = touch_number, "Touch already sent");
            return Ok(false);
        }

        let instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or(SequenceError::InstanceNotFound(instance_id))?;
        let def = self.definition(&instance.definition_id)?;
        self.advance(&instance, def, touch_number).await?;
        info!(instance_id = %instance_id, touch = touch_number, "Touch sent");
        Ok(true)
    }

    /// CAS the cursor one step past `from`, completing the instance when
    /// that step runs off the end. Returns `false` on a lost race.
    async fn advance(
        &self,
        instance: &SequenceInstance,
        def: &SequenceDefinition,
        from: usize,
    ) -> Result<bool, SequenceError> {
        let to = from + 1;
        let status = if to >= def.len() {
            SequenceStatus::Completed
        } else {
            SequenceStatus::Active
        };
        let moved = self.store.advance_cursor(instance.id, from, to, status).await?;
        if moved && status == SequenceStatus::Completed {
            self.release_lead(&instance.lead_id, instance.id).await?;
            info!(instance_id = %instance.id, lead_id = %instance.lead_id, "Sequence completed");
        }
        Ok(moved)
    }

    /// Complete an instance whose cursor already sits past the last touch.
    async fn finish(&self, instance: &SequenceInstance) -> Result<(), SequenceError> {
        let moved = self
            .store
            .advance_cursor(
                instance.id,
                instance.cursor,
                instance.cursor,
                SequenceStatus::Completed,
            )
            .await?;
        if moved {
            self.release_lead(&instance.lead_id, instance.id).await?;
            info!(instance_id = %instance.id, "Sequence completed");
        }
        Ok(())
    }

    async fn release_lead(&self, lead_id: &str, instance_id: Uuid) -> Result<(), SequenceError> {
        if let Some(mut lead) = self.store.get_lead(lead_id).await?
            && lead.active_instance == Some(instance_id)
        {
            lead.active_instance = None;
            self.store.upsert_lead(&lead).await?;
        }
        Ok(())
    }

    // ── Engagement feedback ─────────────────────────────────────────

    /// Fold an inbound engagement signal into the instance.
    ///
    /// A reply pauses the sequence: a human takes over the conversation.
    pub async fn record_signal(
        &self,
        instance_id: Uuid,
        channel: ChannelKind,
        signal: EngagementSignal,
        at: DateTime<Utc>,
    ) -> Result<(), SequenceError> {
        let mut instance = self
            .store
            .get_instance(instance_id)
            .await?
            .ok_or(SequenceError::InstanceNotFound(instance_id))?;
        instance.engagement.record(channel, signal, at);
        self.store
            .save_engagement(instance_id, &instance.engagement)
            .await?;
        debug!(
            instance_id = %instance_id,
            channel = %channel,
            signal = ?signal,
            "Engagement recorded"
        );

        if signal == EngagementSignal::Replied {
            // Ignore a lost CAS: already paused or no longer active.
            let _ = self
                .store
                .set_instance_status(
                    instance_id,
                    SequenceStatus::Active,
                    SequenceStatus::Paused,
                    Some("lead replied"),
                )
                .await?;
            info!(instance_id = %instance_id, "Sequence paused on reply");
        }
        Ok(())
    }

    /// Archive active instances the escalation policy has given up on.
    /// Returns the number archived.
    pub async fn sweep_escalations(&self, now: DateTime<Utc>) -> Result<usize, SequenceError> {
        let mut archived = 0;
        for instance in self.store.list_active_instances().await? {
            if let EscalationDecision::Archive { reason } = self.policy.evaluate(&instance, now) {
                let moved = self
                    .store
                    .set_instance_status(
                        instance.id,
                        SequenceStatus::Active,
                        SequenceStatus::Archived,
                        Some(reason),
                    )
                    .await?;
                if moved {
                    self.release_lead(&instance.lead_id, instance.id).await?;
                    info!(instance_id = %instance.id, reason = %reason, "Sequence archived");
                    archived += 1;
                }
            }
        }
        Ok(archived)
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// One pass over all active instances: generate and deliver every due
    /// touch. Per-instance failures are recorded and do not stop the pass.
    /// Returns the number of touches sent.
    pub async fn dispatch_due(
        &self,
        registry: &ChannelRegistry,
        content: &dyn ContentGenerator,
        now: DateTime<Utc>,
    ) -> Result<usize, Error> {
        let mut sent = 0;
        for instance in self.store.list_active_instances().await.map_err(SequenceError::from)? {
            match self
                .dispatch_one(instance.id, registry, content, now)
                .await
            {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(instance_id = %instance.id, error = %e, "Dispatch failed");
                }
            }
        }
        Ok(sent)
    }

    /// Dispatch the due touch of one instance, if there is one.
    async fn dispatch_one(
        &self,
        instance_id: Uuid,
        registry: &ChannelRegistry,
        content: &dyn ContentGenerator,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let Some((touch, spec)) = self.get_due_touch(instance_id, now).await? else {
            return Ok(false);
        };

        // Re-read right before acting: a pause recorded since the claim
        // always wins over dispatch.
        let instance = self
            .store
            .get_instance(instance_id)
            .await
            .map_err(SequenceError::from)?
            .ok_or(SequenceError::InstanceNotFound(instance_id))?;
        if instance.status != SequenceStatus::Active {
            debug!(instance_id = %instance_id, status = %instance.status, "Pause wins over dispatch");
            return Ok(false);
        }

        let def = self.definition(&instance.definition_id)?;

        // Escalation can reroute the touch to a different channel.
        let channel = match self.policy.evaluate(&instance, now) {
            EscalationDecision::SwitchChannel { to, reason } => {
                debug!(instance_id = %instance_id, to = %to, reason = %reason, "Channel escalated");
                to
            }
            EscalationDecision::Archive { .. } => {
                // The next sweep handles it; don't send meanwhile.
                return Ok(false);
            }
            EscalationDecision::Stay => spec.channel,
        };

        let lead = self
            .store
            .get_lead(&instance.lead_id)
            .await
            .map_err(SequenceError::from)?
            .ok_or_else(|| {
                SequenceError::Store(StoreError::NotFound {
                    entity: "lead".into(),
                    id: instance.lead_id.clone(),
                })
            })?;

        let Some(target) = lead.address(channel) else {
            // Unreachable on this channel: skip the touch, keep the sequence.
            let skipped = Touch {
                status: TouchStatus::Skipped,
                skip_reason: Some(format!("lead unreachable on {channel}")),
                channel,
                ..touch
            };
            self.store.upsert_touch(&skipped).await.map_err(SequenceError::from)?;
            self.advance(&instance, def, touch.touch_number).await?;
            warn!(instance_id = %instance_id, channel = %channel, "Touch skipped, unreachable");
            return Ok(false);
        };

        // Persist a reroute before sending, so the stored row always names
        // the channel the touch actually executed on.
        if channel != touch.channel {
            let rerouted = Touch {
                channel,
                ..touch.clone()
            };
            self.store
                .upsert_touch(&rerouted)
                .await
                .map_err(SequenceError::from)?;
        }

        let brief = MessageBrief {
            lead_name: lead.name.clone(),
            channel,
            goal: spec.goal.clone(),
            touch_number: touch.touch_number,
            total_touches: def.len(),
        };

        let delivery = async {
            let message = content.generate(&brief).await?;
            registry.send_via(channel)?.send(target, &message).await?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = delivery {
            // Leave the cursor in place; the next tick retries this touch.
            let failed = Touch {
                status: TouchStatus::Failed,
                skip_reason: Some(e.to_string()),
                channel,
                ..touch
            };
            self.store.upsert_touch(&failed).await.map_err(SequenceError::from)?;
            return Err(e);
        }

        Ok(self.mark_sent(instance_id, touch.touch_number).await?)
    }

    /// Spawn the cron-driven tick loop: dispatch due touches, then sweep
    /// for archivable instances.
    pub fn spawn_tick_task(
        self: Arc<Self>,
        registry: Arc<ChannelRegistry>,
        content: Arc<dyn ContentGenerator>,
    ) -> Result<JoinHandle<()>, ConfigError> {
        let schedule =
            cron::Schedule::from_str(&self.config.tick_schedule).map_err(|e| {
                ConfigError::InvalidCron {
                    expr: self.config.tick_schedule.clone(),
                    message: e.to_string(),
                }
            })?;
        let poll = self.config.tick_poll_interval;

        Ok(tokio::spawn(async move {
            info!(schedule = %self.config.tick_schedule, "Sequence ticker started");
            let mut next = schedule.upcoming(Utc).next();
            loop {
                tokio::time::sleep(poll).await;
                let now = Utc::now();
                let Some(due_at) = next else {
                    warn!("Tick schedule yields no further occurrences");
                    return;
                };
                if now < due_at {
                    continue;
                }

                match self.dispatch_due(registry.as_ref(), content.as_ref(), now).await {
                    Ok(sent) if sent > 0 => info!(sent, "Tick dispatched touches"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Tick dispatch pass failed"),
                }
                if let Err(e) = self.sweep_escalations(now).await {
                    error!(error = %e, "Escalation sweep failed");
                }

                next = schedule.after(&now).next();
            }
        }))
    }

    async fn state_error(&self, id: Uuid, operation: &str) -> SequenceError {
        match self.store.get_instance(id).await {
            Ok(Some(instance)) => SequenceError::InvalidState {
                id,
                status: instance.status.label().to_string(),
                operation: operation.to_string(),
            },
            Ok(None) => SequenceError::InstanceNotFound(id),
            Err(e) => SequenceError::Store(e),
        }
    }
}

/// Whether a touch's branch condition holds for the engagement so far.
fn condition_met(condition: TouchCondition, engagement: &EngagementState) -> bool {
    match condition {
        TouchCondition::Always => true,
        TouchCondition::IfNoResponse => engagement.total_replies() == 0,
        TouchCondition::IfOpenedNoReply => {
            engagement.total_opens() > 0 && engagement.total_replies() == 0
        }
        TouchCondition::IfClicked => engagement.total_clicks() > 0,
        TouchCondition::IfConnectionAccepted => engagement.connection_accepted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelClient, OutboundMessage};
    use crate::error::{ChannelError, ContentError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    fn moderate_six() -> SequenceDefinition {
        SequenceDefinition::from_json(
            r#"{
                "id": "moderate-6",
                "name": "Moderate 6-touch",
                "touches": [
                    {"day_offset": 0, "channel": "email", "condition": "always", "goal": "intro"},
                    {"day_offset": 2, "channel": "email", "condition": "if_no_response", "goal": "value add"},
                    {"day_offset": 4, "channel": "linkedin", "condition": "if_no_response", "goal": "connect"},
                    {"day_offset": 6, "channel": "email", "condition": "if_opened_no_reply", "goal": "case study"},
                    {"day_offset": 8, "channel": "email", "condition": "if_no_response", "goal": "warm breakup"},
                    {"day_offset": 11, "channel": "sms", "condition": "if_no_response", "goal": "final nudge"}
                ]
            }"#,
        )
        .unwrap()
    }

    fn lead() -> Lead {
        Lead {
            id: "lead-1".into(),
            name: Some("Dana".into()),
            email: Some("dana@acme.io".into()),
            phone: Some("+15550100".into()),
            linkedin: Some("in/dana".into()),
            active_instance: None,
        }
    }

    async fn setup() -> (Arc<dyn RecordStore>, SequenceOrchestrator, Lead, DateTime<Utc>) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let orch = SequenceOrchestrator::new(
            Arc::clone(&store),
            vec![moderate_six()],
            SequenceConfig::default(),
        )
        .unwrap();
        let lead = lead();
        store.upsert_lead(&lead).await.unwrap();
        (store, orch, lead, Utc::now())
    }

    struct RecordingClient {
        kind: ChannelKind,
        sends: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl ChannelClient for RecordingClient {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            target: &str,
            message: &OutboundMessage,
        ) -> Result<(), ChannelError> {
            self.sends
                .lock()
                .unwrap()
                .push((target.to_string(), message.body.clone()));
            Ok(())
        }
    }

    struct CannedContent;

    #[async_trait]
    impl ContentGenerator for CannedContent {
        async fn generate(&self, brief: &MessageBrief) -> Result<OutboundMessage, ContentError> {
            Ok(OutboundMessage {
                subject: Some(format!("touch {}", brief.touch_number)),
                body: format!("goal: {}", brief.goal),
            })
        }
    }

    struct FailingContent;

    #[async_trait]
    impl ContentGenerator for FailingContent {
        async fn generate(&self, _brief: &MessageBrief) -> Result<OutboundMessage, ContentError> {
            Err(ContentError::RequestFailed("service down".into()))
        }
    }

    fn registry_with(kinds: &[ChannelKind]) -> (ChannelRegistry, Arc<Mutex<Vec<(String, String)>>>) {
        let sends = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ChannelRegistry::new();
        for &kind in kinds {
            registry.register(Box::new(RecordingClient {
                kind,
                sends: Arc::clone(&sends),
            }));
        }
        (registry, sends)
    }

    #[tokio::test]
    async fn start_rejects_unknown_definition() {
        let (_store, orch, lead, now) = setup().await;
        let err = orch.start(&lead, "does-not-exist", now).await.unwrap_err();
        assert!(matches!(err, SequenceError::UnknownDefinition(_)));
    }

    #[tokio::test]
    async fn second_start_for_same_lead_rejected() {
        let (_store, orch, lead, now) = setup().await;
        orch.start(&lead, "moderate-6", now).await.unwrap();
        let err = orch.start(&lead, "moderate-6", now).await.unwrap_err();
        assert!(matches!(err, SequenceError::AlreadyActive { .. }));
    }

    #[tokio::test]
    async fn first_touch_due_immediately() {
        let (_store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();

        let (touch, spec) = orch.get_due_touch(instance.id, now).await.unwrap().unwrap();
        assert_eq!(touch.touch_number, 0);
        assert_eq!(spec.goal, "intro");

        // Not yet sent: asking again re-offers the same touch.
        let (again, _) = orch.get_due_touch(instance.id, now).await.unwrap().unwrap();
        assert_eq!(again.touch_number, 0);
    }

    #[tokio::test]
    async fn mark_sent_advances_and_is_idempotent() {
        let (_store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        orch.get_due_touch(instance.id, now).await.unwrap().unwrap();

        assert!(orch.mark_sent(instance.id, 0).await.unwrap());
        assert!(!orch.mark_sent(instance.id, 0).await.unwrap());

        // Touch 1 is two days out.
        assert!(orch.get_due_touch(instance.id, now).await.unwrap().is_none());
        let (t1, _) = orch
            .get_due_touch(instance.id, now + Duration::days(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t1.touch_number, 1);
    }

    #[tokio::test]
    async fn reply_skips_conditional_touches_in_one_call() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        orch.get_due_touch(instance.id, now).await.unwrap().unwrap();
        assert!(orch.mark_sent(instance.id, 0).await.unwrap());

        // A reply comes in; the reply-pause is undone by an operator who
        // wants the sequence to keep running.
        orch.record_signal(instance.id, ChannelKind::Email, EngagementSignal::Replied, now)
            .await
            .unwrap();
        orch.resume(instance.id).await.unwrap();

        // Eight days in, every remaining touch is due but each condition
        // requires no reply. One call walks the cursor to the end.
        let due = orch
            .get_due_touch(instance.id, now + Duration::days(8))
            .await
            .unwrap();
        assert!(due.is_none());

        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.cursor, 5);

        let touches = store.list_touches(instance.id).await.unwrap();
        let skipped: Vec<usize> = touches
            .iter()
            .filter(|t| t.status == TouchStatus::Skipped)
            .map(|t| t.touch_number)
            .collect();
        assert_eq!(skipped, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn skipping_the_last_touch_completes_the_instance() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        orch.get_due_touch(instance.id, now).await.unwrap();
        orch.mark_sent(instance.id, 0).await.unwrap();
        orch.record_signal(instance.id, ChannelKind::Email, EngagementSignal::Replied, now)
            .await
            .unwrap();
        orch.resume(instance.id).await.unwrap();

        // Past the last touch's offset, everything left gets skipped.
        let due = orch
            .get_due_touch(instance.id, now + Duration::days(12))
            .await
            .unwrap();
        assert!(due.is_none());

        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SequenceStatus::Completed);

        let stored_lead = store.get_lead("lead-1").await.unwrap().unwrap();
        assert!(stored_lead.active_instance.is_none());

        // The lead can start a fresh sequence now.
        orch.start(&stored_lead, "moderate-6", now).await.unwrap();
    }

    #[tokio::test]
    async fn backlog_of_due_touches_drains_in_cursor_order() {
        let (_store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();

        // Eight days in with no engagement: touches 0-4 are all past due.
        // Draining offers them strictly in cursor order; touch 3 requires an
        // open and gets skipped, touch 5 (day 11) is not yet due.
        let at = now + Duration::days(8);
        let mut offered = Vec::new();
        while let Some((touch, _)) = orch.get_due_touch(instance.id, at).await.unwrap() {
            offered.push(touch.touch_number);
            assert!(orch.mark_sent(instance.id, touch.touch_number).await.unwrap());
        }
        assert_eq!(offered, vec![0, 1, 2, 4]);
    }

    #[tokio::test]
    async fn paused_instance_offers_nothing() {
        let (_store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();

        orch.pause(instance.id, "manual hold").await.unwrap();
        assert!(orch.get_due_touch(instance.id, now).await.unwrap().is_none());

        orch.resume(instance.id).await.unwrap();
        assert!(orch.get_due_touch(instance.id, now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reply_pauses_the_sequence() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();

        orch.record_signal(instance.id, ChannelKind::Email, EngagementSignal::Replied, now)
            .await
            .unwrap();

        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SequenceStatus::Paused);
        assert_eq!(stored.pause_reason.as_deref(), Some("lead replied"));
        assert_eq!(stored.engagement.total_replies(), 1);
    }

    #[tokio::test]
    async fn pause_on_a_completed_instance_is_an_error() {
        let (_store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        orch.record_signal(instance.id, ChannelKind::Email, EngagementSignal::Replied, now)
            .await
            .unwrap();

        // Already paused by the reply.
        let err = orch.pause(instance.id, "again").await.unwrap_err();
        assert!(matches!(err, SequenceError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn dispatch_sends_generates_and_advances() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        let (registry, sends) = registry_with(&[ChannelKind::Email]);

        let sent = orch.dispatch_due(&registry, &CannedContent, now).await.unwrap();
        assert_eq!(sent, 1);

        let delivered = sends.lock().unwrap().clone();
        assert_eq!(delivered, vec![("dana@acme.io".into(), "goal: intro".into())]);

        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.cursor, 1);
        let touch = store.get_touch(instance.id, 0).await.unwrap().unwrap();
        assert_eq!(touch.status, TouchStatus::Sent);

        // Same tick again: nothing else is due.
        let sent = orch.dispatch_due(&registry, &CannedContent, now).await.unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn content_failure_leaves_touch_retryable() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        let (registry, sends) = registry_with(&[ChannelKind::Email]);

        let sent = orch.dispatch_due(&registry, &FailingContent, now).await.unwrap();
        assert_eq!(sent, 0);
        assert!(sends.lock().unwrap().is_empty());

        let touch = store.get_touch(instance.id, 0).await.unwrap().unwrap();
        assert_eq!(touch.status, TouchStatus::Failed);
        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.cursor, 0);

        // Next tick, with content back up, the same touch goes out.
        let sent = orch.dispatch_due(&registry, &CannedContent, now).await.unwrap();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn escalation_reroutes_channel_at_dispatch() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();
        let (registry, sends) = registry_with(&[ChannelKind::Email, ChannelKind::Linkedin]);

        // Two opens and a click, no reply: policy switches to LinkedIn.
        for signal in [
            EngagementSignal::Opened,
            EngagementSignal::Opened,
            EngagementSignal::Clicked,
        ] {
            orch.record_signal(instance.id, ChannelKind::Email, signal, now)
                .await
                .unwrap();
        }

        let sent = orch.dispatch_due(&registry, &CannedContent, now).await.unwrap();
        assert_eq!(sent, 1);
        let delivered = sends.lock().unwrap().clone();
        assert_eq!(delivered[0].0, "in/dana");

        // The stored row records the channel the touch actually went out on,
        // not the definition's original one.
        let touch = store.get_touch(instance.id, 0).await.unwrap().unwrap();
        assert_eq!(touch.status, TouchStatus::Sent);
        assert_eq!(touch.channel, ChannelKind::Linkedin);
    }

    #[tokio::test]
    async fn unreachable_channel_skips_the_touch() {
        let (store, orch, _l, now) = setup().await;
        let mut bare = Lead::new("lead-2");
        bare.linkedin = Some("in/pat".into());
        store.upsert_lead(&bare).await.unwrap();
        let instance = orch.start(&bare, "moderate-6", now).await.unwrap();
        let (registry, sends) = registry_with(&[ChannelKind::Email, ChannelKind::Linkedin]);

        // Touch 0 is email; the lead has no email address.
        let sent = orch.dispatch_due(&registry, &CannedContent, now).await.unwrap();
        assert_eq!(sent, 0);
        assert!(sends.lock().unwrap().is_empty());

        let touch = store.get_touch(instance.id, 0).await.unwrap().unwrap();
        assert_eq!(touch.status, TouchStatus::Skipped);
        assert!(touch.skip_reason.unwrap().contains("unreachable"));
        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.cursor, 1);
    }

    #[tokio::test]
    async fn stale_instances_get_archived_by_the_sweep() {
        let (store, orch, lead, now) = setup().await;
        let instance = orch.start(&lead, "moderate-6", now).await.unwrap();

        assert_eq!(orch.sweep_escalations(now).await.unwrap(), 0);
        let archived = orch
            .sweep_escalations(now + Duration::days(21))
            .await
            .unwrap();
        assert_eq!(archived, 1);

        let stored = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SequenceStatus::Archived);
        let stored_lead = store.get_lead("lead-1").await.unwrap().unwrap();
        assert!(stored_lead.active_instance.is_none());
    }
}
