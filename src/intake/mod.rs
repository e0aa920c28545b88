//! Intake queue — durable, deduplicated buffer between signal ingestion
//! and processing.

pub mod event;
pub mod queue;
pub mod worker;

pub use event::{EngagementEvent, EventOutcome, EventStatus, Platform};
pub use queue::IntakeQueue;
pub use worker::{EventHandler, IntakeWorker};
