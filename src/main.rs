use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use leadflow::channels::{ChannelRegistry, SmtpEmailClient};
use leadflow::config::{ContentConfig, QueueConfig, SequenceConfig, SmtpConfig, StoreConfig};
use leadflow::content::HttpContentGenerator;
use leadflow::error::Error;
use leadflow::intake::{EngagementEvent, EventHandler, EventOutcome, IntakeQueue, IntakeWorker};
use leadflow::scoring::{ScoringEngine, SignalBundle};
use leadflow::sequence::{SequenceDefinition, SequenceOrchestrator};
use leadflow::store::{LibSqlStore, MemoryStore, RecordStore};

/// Default triage: score the event and route it by tier.
///
/// Qualified leads go to a human for the first contact decision; the rest
/// are recorded and skipped.
struct ScoringTriage {
    engine: ScoringEngine,
}

#[async_trait]
impl EventHandler for ScoringTriage {
    async fn handle(&self, event: &EngagementEvent) -> Result<EventOutcome, Error> {
        let bundle = SignalBundle {
            body_text: event.body_text.clone(),
            actor: event.actor.clone(),
            occurred_at: Some(event.received_at),
            prior_signals: 0,
        };
        let result = self.engine.score(&bundle, Utc::now());

        if result.tier.qualifies() {
            Ok(EventOutcome::Escalated {
                reason: format!(
                    "{:?} lead, score {}: {:?}",
                    result.tier, result.total_score, result.recommended_action
                ),
            })
        } else {
            Ok(EventOutcome::Skipped {
                reason: format!("{:?} lead, score {}", result.tier, result.total_score),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    eprintln!("📬 Leadflow v{}", env!("CARGO_PKG_VERSION"));

    // ── Store ────────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = match StoreConfig::from_env() {
        StoreConfig::Local(path) => {
            eprintln!("   Store: {}", path.display());
            Arc::new(LibSqlStore::new_local(&path).await?)
        }
        StoreConfig::Memory => {
            eprintln!("   Store: in-memory (set LEADFLOW_DB_PATH to persist)");
            Arc::new(MemoryStore::new())
        }
    };

    // ── Intake ───────────────────────────────────────────────────────────
    let queue_config = QueueConfig::default();
    eprintln!(
        "   Intake: batches of {}, {} retries",
        queue_config.batch_size, queue_config.max_retries
    );
    let queue = Arc::new(IntakeQueue::new(Arc::clone(&store), queue_config));
    let triage = Arc::new(ScoringTriage {
        engine: ScoringEngine::with_defaults(),
    });
    let worker = Arc::new(IntakeWorker::new(Arc::clone(&queue), triage));
    let _worker_handle = Arc::clone(&worker).spawn();
    let _sweep_handle = worker.spawn_retry_sweep();

    // ── Sequences ────────────────────────────────────────────────────────
    let mut definitions = Vec::new();
    if let Ok(dir) = std::env::var("LEADFLOW_SEQUENCES_DIR") {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let json = std::fs::read_to_string(&path)?;
                let def = SequenceDefinition::from_json(&json)?;
                eprintln!("   Sequence: {} ({} touches)", def.id, def.len());
                definitions.push(def);
            }
        }
    }
    if definitions.is_empty() {
        eprintln!("   Sequences: none loaded (set LEADFLOW_SEQUENCES_DIR)");
    }

    let sequence_config = SequenceConfig::default();
    sequence_config.validate()?;
    let orchestrator = Arc::new(SequenceOrchestrator::new(
        Arc::clone(&store),
        definitions,
        sequence_config.clone(),
    )?);

    // ── Channels ─────────────────────────────────────────────────────────
    let mut registry = ChannelRegistry::new();
    if let Some(smtp_config) = SmtpConfig::from_env() {
        eprintln!(
            "   Email: enabled (SMTP: {}, from: {})",
            smtp_config.host, smtp_config.from_address
        );
        registry.register(Box::new(SmtpEmailClient::new(smtp_config)?));
    } else {
        eprintln!("   Email: disabled (set LEADFLOW_SMTP_HOST)");
    }
    let registry = Arc::new(registry);

    // ── Ticker ───────────────────────────────────────────────────────────
    // Without a content generator there is nothing to put in a touch, so
    // the dispatch ticker stays off.
    if let Some(content_config) = ContentConfig::from_env() {
        eprintln!("   Content: {}", content_config.endpoint);
        eprintln!("   Ticker: {}", sequence_config.tick_schedule);
        let content = Arc::new(HttpContentGenerator::new(content_config)?);
        let _tick_handle = Arc::clone(&orchestrator).spawn_tick_task(registry, content)?;
    } else {
        eprintln!("   Content: disabled (set LEADFLOW_CONTENT_ENDPOINT), ticker off");
    }

    eprintln!();
    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down");
    Ok(())
}
