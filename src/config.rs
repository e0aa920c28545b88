//! Configuration types.
//!
//! Everything is an explicit struct passed into constructors. There is no
//! process-wide mutable state: two pipelines with different configs can run
//! side by side in one process.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

// ── Scoring ─────────────────────────────────────────────────────────

/// Tier cutoffs and category caps for the scoring engine.
///
/// Cutoffs are configuration, not algorithm: changing them never changes
/// how category points are computed, only how the total maps to a tier.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Minimum total score for the HOT tier.
    pub hot_cutoff: u8,
    /// Minimum total score for the WARM tier.
    pub warm_cutoff: u8,
    /// Minimum total score for the COOL tier.
    pub cool_cutoff: u8,
    /// Cap on engagement-depth category points.
    pub engagement_cap: u8,
    /// Cap on profile-fit category points.
    pub profile_cap: u8,
    /// Cap on buying-intent category points.
    pub intent_cap: u8,
    /// Cap on recency/frequency category points.
    pub recency_cap: u8,
    /// Score → estimated conversion probability bands, as
    /// `(minimum score, probability)` in descending score order.
    pub probability_bands: Vec<(u8, f32)>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            hot_cutoff: 75,
            warm_cutoff: 60,
            cool_cutoff: 40,
            engagement_cap: 30,
            profile_cap: 25,
            intent_cap: 30,
            recency_cap: 15,
            probability_bands: vec![
                (90, 0.45),
                (75, 0.35),
                (60, 0.22),
                (40, 0.12),
                (0, 0.04),
            ],
        }
    }
}

// ── Intake queue ────────────────────────────────────────────────────

/// Intake queue and batch worker configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum items claimed per batch.
    pub batch_size: usize,
    /// Delay between individual items within a batch (politeness to
    /// downstream channel APIs).
    pub item_delay: Duration,
    /// Delay between batches (coarse rate limiting).
    pub batch_delay: Duration,
    /// Per-item handler timeout.
    pub handler_timeout: Duration,
    /// Maximum automatic retries before an item stays FAILED.
    pub max_retries: u32,
    /// Base delay between retry sweeps; doubles per consecutive empty sweep.
    pub sweep_backoff_base: Duration,
    /// Upper bound on the sweep backoff.
    pub sweep_backoff_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            item_delay: Duration::from_secs(2),
            batch_delay: Duration::from_secs(30),
            handler_timeout: Duration::from_secs(60),
            max_retries: 3,
            sweep_backoff_base: Duration::from_secs(30),
            sweep_backoff_max: Duration::from_secs(600),
        }
    }
}

// ── Sequence orchestrator ───────────────────────────────────────────

/// Sequence orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Cron expression driving the due-touch tick.
    pub tick_schedule: String,
    /// Interval at which the ticker checks the cron schedule.
    pub tick_poll_interval: Duration,
    /// Days without any engagement before an instance is archived.
    pub no_engagement_archive_days: i64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            // Every 15 minutes.
            tick_schedule: "0 */15 * * * *".to_string(),
            tick_poll_interval: Duration::from_secs(60),
            no_engagement_archive_days: 21,
        }
    }
}

impl SequenceConfig {
    /// Validate the tick cron expression.
    pub fn validate(&self) -> Result<(), ConfigError> {
        cron::Schedule::from_str(&self.tick_schedule).map_err(|e| ConfigError::InvalidCron {
            expr: self.tick_schedule.clone(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Record store backend selection.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// In-process memory store (tests, single-process runs).
    Memory,
    /// Local libSQL database file.
    Local(PathBuf),
}

impl StoreConfig {
    /// Build from `LEADFLOW_DB_PATH`; unset means in-memory.
    pub fn from_env() -> Self {
        match std::env::var("LEADFLOW_DB_PATH") {
            Ok(path) if !path.is_empty() => Self::Local(PathBuf::from(path)),
            _ => Self::Memory,
        }
    }
}

// ── SMTP channel ────────────────────────────────────────────────────

/// SMTP configuration for the email channel client.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build config from environment variables.
    /// Returns `None` if `LEADFLOW_SMTP_HOST` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("LEADFLOW_SMTP_HOST").ok()?;

        let port: u16 = std::env::var("LEADFLOW_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("LEADFLOW_SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("LEADFLOW_SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("LEADFLOW_SMTP_FROM").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

// ── Content generator ───────────────────────────────────────────────

/// HTTP content generator configuration.
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Endpoint that accepts a JSON brief and returns message text.
    pub endpoint: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Optional bearer token.
    pub api_key: Option<SecretString>,
}

impl ContentConfig {
    /// Build config from environment variables.
    /// Returns `None` if `LEADFLOW_CONTENT_ENDPOINT` is not set.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LEADFLOW_CONTENT_ENDPOINT").ok()?;

        let timeout_secs: u64 = std::env::var("LEADFLOW_CONTENT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let api_key = std::env::var("LEADFLOW_CONTENT_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        Some(Self {
            endpoint,
            timeout: Duration::from_secs(timeout_secs),
            api_key,
        })
    }
}
