//! Sequence orchestration — multi-touch outreach driven by templates,
//! engagement feedback, and an escalation policy.

pub mod escalation;
pub mod model;
pub mod orchestrator;

pub use escalation::{EscalationDecision, EscalationPolicy};
pub use model::{
    EngagementSignal, EngagementState, Lead, SequenceDefinition, SequenceInstance,
    SequenceStatus, Touch, TouchCondition, TouchSpec, TouchStatus,
};
pub use orchestrator::SequenceOrchestrator;
