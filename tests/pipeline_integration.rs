//! End-to-end pipeline: ingest → score → claim → qualify → sequence → dispatch.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadflow::channels::{
    ChannelClient, ChannelKind, ChannelRegistry, OutboundMessage,
};
use leadflow::config::{QueueConfig, SequenceConfig};
use leadflow::content::{ContentGenerator, MessageBrief};
use leadflow::error::{ChannelError, ContentError, Error};
use leadflow::intake::{
    EngagementEvent, EventHandler, EventOutcome, EventStatus, IntakeQueue, IntakeWorker, Platform,
};
use leadflow::scoring::{ActorProfile, ScoringEngine, SignalBundle};
use leadflow::sequence::{
    EngagementSignal, Lead, SequenceDefinition, SequenceOrchestrator, SequenceStatus, TouchStatus,
};
use leadflow::store::{MemoryStore, RecordStore};

struct RecordingClient {
    kind: ChannelKind,
    sends: Arc<Mutex<Vec<(ChannelKind, String, String)>>>,
}

#[async_trait]
impl ChannelClient for RecordingClient {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, target: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        self.sends
            .lock()
            .unwrap()
            .push((self.kind, target.to_string(), message.body.clone()));
        Ok(())
    }
}

struct CannedContent;

#[async_trait]
impl ContentGenerator for CannedContent {
    async fn generate(&self, brief: &MessageBrief) -> Result<OutboundMessage, ContentError> {
        Ok(OutboundMessage {
            subject: Some(format!("touch {}", brief.touch_number)),
            body: format!(
                "hi {}, goal: {}",
                brief.lead_name.as_deref().unwrap_or("there"),
                brief.goal
            ),
        })
    }
}

/// Triage that scores each event and starts a sequence for qualified leads.
struct QualifyingTriage {
    engine: ScoringEngine,
    store: Arc<dyn RecordStore>,
    orchestrator: Arc<SequenceOrchestrator>,
}

#[async_trait]
impl EventHandler for QualifyingTriage {
    async fn handle(&self, event: &EngagementEvent) -> Result<EventOutcome, Error> {
        let bundle = SignalBundle {
            body_text: event.body_text.clone(),
            actor: event.actor.clone(),
            occurred_at: Some(event.received_at),
            prior_signals: 0,
        };
        let result = self.engine.score(&bundle, event.received_at);

        if !result.tier.qualifies() {
            return Ok(EventOutcome::Skipped {
                reason: format!("score {} below threshold", result.total_score),
            });
        }

        // Qualified: create the lead and put them into the outreach sequence.
        let name = event
            .actor
            .as_ref()
            .and_then(|a| a.name.clone())
            .unwrap_or_else(|| event.id.clone());
        let mut lead = Lead::new(&event.id);
        lead.name = Some(name.clone());
        lead.email = Some(format!("{}@example.test", name.to_lowercase()));
        self.store
            .upsert_lead(&lead)
            .await
            .map_err(leadflow::error::SequenceError::from)?;

        self.orchestrator
            .start(&lead, "outreach-3", event.received_at)
            .await?;

        Ok(EventOutcome::Escalated {
            reason: format!("score {}, sequence started", result.total_score),
        })
    }
}

fn outreach_three() -> SequenceDefinition {
    SequenceDefinition::from_json(
        r#"{
            "id": "outreach-3",
            "name": "Short outreach",
            "touches": [
                {"day_offset": 0, "channel": "email", "condition": "always", "goal": "intro"},
                {"day_offset": 2, "channel": "email", "condition": "if_no_response", "goal": "follow up"},
                {"day_offset": 5, "channel": "linkedin", "condition": "if_no_response", "goal": "connect"}
            ]
        }"#,
    )
    .unwrap()
}

struct Pipeline {
    store: Arc<dyn RecordStore>,
    queue: Arc<IntakeQueue>,
    worker: IntakeWorker,
    orchestrator: Arc<SequenceOrchestrator>,
    registry: ChannelRegistry,
    sends: Arc<Mutex<Vec<(ChannelKind, String, String)>>>,
}

fn pipeline() -> Pipeline {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let queue = Arc::new(IntakeQueue::new(
        Arc::clone(&store),
        QueueConfig {
            item_delay: Duration::from_millis(0),
            batch_delay: Duration::from_millis(0),
            ..Default::default()
        },
    ));
    let orchestrator = Arc::new(
        SequenceOrchestrator::new(
            Arc::clone(&store),
            vec![outreach_three()],
            SequenceConfig::default(),
        )
        .unwrap(),
    );
    let triage = Arc::new(QualifyingTriage {
        engine: ScoringEngine::with_defaults(),
        store: Arc::clone(&store),
        orchestrator: Arc::clone(&orchestrator),
    });
    let worker = IntakeWorker::new(Arc::clone(&queue), triage);

    let sends = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ChannelRegistry::new();
    for kind in [ChannelKind::Email, ChannelKind::Linkedin] {
        registry.register(Box::new(RecordingClient {
            kind,
            sends: Arc::clone(&sends),
        }));
    }

    Pipeline {
        store,
        queue,
        worker,
        orchestrator,
        registry,
        sends,
    }
}

fn hot_actor() -> ActorProfile {
    ActorProfile {
        name: Some("Dana".into()),
        bio: Some("Founder & CEO of a 40-person agency".into()),
        follower_count: Some(25_000),
        location: Some("Austin".into()),
    }
}

#[tokio::test]
async fn hot_signal_flows_from_ingest_to_first_touch() {
    let p = pipeline();
    let now = Utc::now();

    // A rich, high-intent comment and a throwaway one arrive together.
    p.queue
        .enqueue(
            Platform::Instagram,
            "c_100",
            Some(
                "This is exactly what we need — what's the pricing for a team \
                 of 20? Can we book a demo this week? We're evaluating tools \
                 right now and I'd love a recommendation."
                    .into(),
            ),
            Some(hot_actor()),
            now,
        )
        .await
        .unwrap();
    p.queue
        .enqueue(Platform::Instagram, "c_101", Some("nice".into()), None, now)
        .await
        .unwrap();

    // The worker drains the batch: the hot signal qualifies and enters the
    // sequence, the throwaway is skipped.
    let processed = p.worker.run_batch().await.unwrap();
    assert_eq!(processed, 2);

    let hot = p.store.get_event("instagram:c_100").await.unwrap().unwrap();
    assert_eq!(hot.status, EventStatus::Escalated);
    assert!(hot.status_reason.unwrap().contains("sequence started"));

    let cold = p.store.get_event("instagram:c_101").await.unwrap().unwrap();
    assert_eq!(cold.status, EventStatus::Skipped);

    let lead = p.store.get_lead("instagram:c_100").await.unwrap().unwrap();
    let instance_id = lead.active_instance.unwrap();

    // First tick: touch 0 is due immediately and goes out over email.
    let sent = p
        .orchestrator
        .dispatch_due(&p.registry, &CannedContent, now)
        .await
        .unwrap();
    assert_eq!(sent, 1);

    let delivered = p.sends.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, ChannelKind::Email);
    assert_eq!(delivered[0].1, "dana@example.test");
    assert!(delivered[0].2.contains("goal: intro"));

    let touch = p.store.get_touch(instance_id, 0).await.unwrap().unwrap();
    assert_eq!(touch.status, TouchStatus::Sent);

    // Same tick again sends nothing more.
    let sent = p
        .orchestrator
        .dispatch_due(&p.registry, &CannedContent, now)
        .await
        .unwrap();
    assert_eq!(sent, 0);
}

#[tokio::test]
async fn reply_pauses_and_conditional_touches_stop() {
    let p = pipeline();
    let now = Utc::now();

    p.queue
        .enqueue(
            Platform::Linkedin,
            "urn:1",
            Some("We'd like to purchase — send pricing and a demo slot?".into()),
            Some(hot_actor()),
            now,
        )
        .await
        .unwrap();
    p.worker.run_batch().await.unwrap();

    let lead = p.store.get_lead("linkedin:urn:1").await.unwrap().unwrap();
    let instance_id = lead.active_instance.unwrap();

    p.orchestrator
        .dispatch_due(&p.registry, &CannedContent, now)
        .await
        .unwrap();

    // The lead replies: the sequence pauses and later ticks send nothing,
    // even when later touches are past due.
    p.orchestrator
        .record_signal(instance_id, ChannelKind::Email, EngagementSignal::Replied, now)
        .await
        .unwrap();

    let instance = p.store.get_instance(instance_id).await.unwrap().unwrap();
    assert_eq!(instance.status, SequenceStatus::Paused);

    let sent = p
        .orchestrator
        .dispatch_due(&p.registry, &CannedContent, now + chrono::Duration::days(6))
        .await
        .unwrap();
    assert_eq!(sent, 0);
    assert_eq!(p.sends.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_ingest_never_double_processes() {
    let p = pipeline();
    let now = Utc::now();

    for _ in 0..3 {
        p.queue
            .enqueue(
                Platform::Web,
                "form-7",
                Some("pricing for enterprise? happy to demo".into()),
                Some(hot_actor()),
                now,
            )
            .await
            .unwrap();
    }

    assert_eq!(p.queue.depth().await.unwrap(), 1);
    let processed = p.worker.run_batch().await.unwrap();
    assert_eq!(processed, 1);

    // Exactly one sequence instance exists for the lead.
    let lead = p.store.get_lead("web:form-7").await.unwrap().unwrap();
    assert!(lead.active_instance.is_some());
    assert_eq!(p.store.list_active_instances().await.unwrap().len(), 1);
}

#[tokio::test]
async fn silent_instance_gets_archived() {
    let p = pipeline();
    let now = Utc::now();

    p.queue
        .enqueue(
            Platform::X,
            "t_9",
            Some("interested in buying, what's the cost and trial terms?".into()),
            Some(hot_actor()),
            now,
        )
        .await
        .unwrap();
    p.worker.run_batch().await.unwrap();

    let lead = p.store.get_lead("x:t_9").await.unwrap().unwrap();
    let instance_id = lead.active_instance.unwrap();

    // Three weeks with no engagement at all.
    let archived = p
        .orchestrator
        .sweep_escalations(now + chrono::Duration::days(21))
        .await
        .unwrap();
    assert_eq!(archived, 1);

    let instance = p.store.get_instance(instance_id).await.unwrap().unwrap();
    assert_eq!(instance.status, SequenceStatus::Archived);
    let lead = p.store.get_lead("x:t_9").await.unwrap().unwrap();
    assert!(lead.active_instance.is_none());
}
