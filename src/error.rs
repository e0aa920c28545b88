//! Error types for leadflow.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Content error: {0}")]
    Content(#[from] ContentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Intake queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Event {id} not found")]
    NotFound { id: String },

    #[error("Event {id} is {current}, cannot transition to {target}")]
    InvalidTransition {
        id: String,
        current: String,
        target: String,
    },

    #[error("Event {id} rejected at ingestion: {reason}")]
    MalformedEvent { id: String, reason: String },

    #[error("Handler for event {id} timed out after {timeout:?}")]
    HandlerTimeout { id: String, timeout: Duration },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Sequence orchestration errors.
#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("Sequence definition {0} not found")]
    UnknownDefinition(String),

    #[error("Invalid sequence definition {id}: {reason}")]
    InvalidDefinition { id: String, reason: String },

    #[error("Sequence instance {0} not found")]
    InstanceNotFound(Uuid),

    #[error("Instance {id} is {status}, cannot {operation}")]
    InvalidState {
        id: Uuid,
        status: String,
        operation: String,
    },

    #[error("Lead {lead_id} already has an active sequence instance")]
    AlreadyActive { lead_id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Channel delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {channel} send to {target} failed: {reason}")]
    SendFailed {
        channel: String,
        target: String,
        reason: String,
    },

    #[error("Invalid target address '{target}' for channel {channel}")]
    InvalidTarget { channel: String, target: String },

    #[error("No client registered for channel {0}")]
    NotRegistered(String),
}

/// Content generator errors.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Content generation request failed: {0}")]
    RequestFailed(String),

    #[error("Content generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response from content generator: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
