//! Channel clients — pure delivery I/O, no business logic.
//!
//! A client takes a rendered message and a target address and reports
//! success or failure. Whether a channel is reachable for a lead is a fact
//! the orchestrator reads off the `Lead`, never something a client derives.

pub mod email;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

pub use email::SmtpEmailClient;

/// Outreach channels, ordered roughly by friction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Linkedin,
    Voice,
}

impl ChannelKind {
    /// Short label for logging and store columns.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Linkedin => "linkedin",
            Self::Voice => "voice",
        }
    }

    /// Parse a store column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "linkedin" => Some(Self::Linkedin),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A rendered outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Subject line (email) — other channels ignore it.
    pub subject: Option<String>,
    pub body: String,
}

/// Delivery client for one channel.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Deliver a message to a target address on this channel.
    async fn send(&self, target: &str, message: &OutboundMessage) -> Result<(), ChannelError>;
}

/// Registry of channel clients keyed by kind.
#[derive(Default)]
pub struct ChannelRegistry {
    clients: Vec<Box<dyn ChannelClient>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Box<dyn ChannelClient>) {
        self.clients.push(client);
    }

    /// Look up the client for a channel, if one is registered.
    pub fn get(&self, kind: ChannelKind) -> Option<&dyn ChannelClient> {
        self.clients
            .iter()
            .find(|c| c.kind() == kind)
            .map(|c| c.as_ref())
    }

    pub fn send_via(
        &self,
        kind: ChannelKind,
    ) -> Result<&dyn ChannelClient, ChannelError> {
        self.get(kind)
            .ok_or_else(|| ChannelError::NotRegistered(kind.label().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullClient(ChannelKind);

    #[async_trait]
    impl ChannelClient for NullClient {
        fn kind(&self) -> ChannelKind {
            self.0
        }

        async fn send(
            &self,
            _target: &str,
            _message: &OutboundMessage,
        ) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[test]
    fn channel_kind_label_roundtrip() {
        for kind in [
            ChannelKind::Email,
            ChannelKind::Sms,
            ChannelKind::Linkedin,
            ChannelKind::Voice,
        ] {
            assert_eq!(ChannelKind::parse(kind.label()), Some(kind));
        }
        assert_eq!(ChannelKind::parse("carrier-pigeon"), None);
    }

    #[test]
    fn registry_lookup() {
        let mut registry = ChannelRegistry::new();
        registry.register(Box::new(NullClient(ChannelKind::Email)));

        assert!(registry.get(ChannelKind::Email).is_some());
        assert!(registry.get(ChannelKind::Sms).is_none());
        assert!(matches!(
            registry.send_via(ChannelKind::Voice),
            Err(ChannelError::NotRegistered(_))
        ));
    }
}
