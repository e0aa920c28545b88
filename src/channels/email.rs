//! Email channel client — SMTP via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use tracing::info;

use crate::channels::{ChannelClient, ChannelKind, OutboundMessage};
use crate::config::SmtpConfig;
use crate::error::ChannelError;

/// SMTP-backed email client.
pub struct SmtpEmailClient {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailClient {
    /// Build a client from SMTP configuration.
    pub fn new(config: SmtpConfig) -> Result<Self, ChannelError> {
        let from: Mailbox =
            config
                .from_address
                .parse()
                .map_err(|_| ChannelError::InvalidTarget {
                    channel: "email".into(),
                    target: config.from_address.clone(),
                })?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| ChannelError::SendFailed {
                channel: "email".into(),
                target: config.host.clone(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport,
            from,
        })
    }
}

#[async_trait]
impl ChannelClient for SmtpEmailClient {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, target: &str, message: &OutboundMessage) -> Result<(), ChannelError> {
        let to: Mailbox = target.parse().map_err(|_| ChannelError::InvalidTarget {
            channel: "email".into(),
            target: target.to_string(),
        })?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.as_deref().unwrap_or(""))
            .body(message.body.clone())
            .map_err(|e| ChannelError::SendFailed {
                channel: "email".into(),
                target: target.to_string(),
                reason: format!("Failed to build email: {e}"),
            })?;

        self.transport
            .send(email)
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: "email".into(),
                target: target.to_string(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        info!(target, host = %self.config.host, "Email sent");
        Ok(())
    }
}
