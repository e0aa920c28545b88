//! Message content generation.
//!
//! The orchestrator hands a `MessageBrief` to a generator and gets back a
//! rendered `OutboundMessage`. The HTTP implementation posts the brief to
//! an external service; tests substitute a canned generator.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::channels::{ChannelKind, OutboundMessage};
use crate::config::ContentConfig;
use crate::error::ContentError;

/// Everything the generator needs to write one touch.
#[derive(Debug, Clone, Serialize)]
pub struct MessageBrief {
    pub lead_name: Option<String>,
    pub channel: ChannelKind,
    /// What this touch should accomplish, from the sequence definition.
    pub goal: String,
    /// Zero-based position in the sequence, for tone calibration.
    pub touch_number: usize,
    pub total_touches: usize,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, brief: &MessageBrief) -> Result<OutboundMessage, ContentError>;
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    subject: Option<String>,
    body: String,
}

/// Content generator backed by an HTTP endpoint.
pub struct HttpContentGenerator {
    config: ContentConfig,
    client: reqwest::Client,
}

impl HttpContentGenerator {
    pub fn new(config: ContentConfig) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ContentError::RequestFailed(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ContentGenerator for HttpContentGenerator {
    async fn generate(&self, brief: &MessageBrief) -> Result<OutboundMessage, ContentError> {
        let mut request = self.client.post(&self.config.endpoint).json(brief);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ContentError::Timeout(self.config.timeout)
            } else {
                ContentError::RequestFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ContentError::RequestFailed(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let parsed: ContentResponse = response
            .json()
            .await
            .map_err(|e| ContentError::InvalidResponse(e.to_string()))?;

        if parsed.body.trim().is_empty() {
            return Err(ContentError::InvalidResponse("empty body".into()));
        }

        Ok(OutboundMessage {
            subject: parsed.subject,
            body: parsed.body,
        })
    }
}
