use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use speakup_types::Redacted;

/// The mail transport rejected or never received the message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Outbound notification contract. The activation flow only needs the one
/// message; delivery itself belongs to whatever sits behind the trait.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification_email(
        &self,
        to: &str,
        name: &str,
        verification_url: &Redacted<String>,
    ) -> Result<(), TransportError>;
}

/// Logs the message instead of sending it. Used when no mail relay is
/// configured, e.g. local development.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification_email(
        &self,
        to: &str,
        name: &str,
        verification_url: &Redacted<String>,
    ) -> Result<(), TransportError> {
        info!(
            to,
            name,
            url = ?verification_url,
            "Verification email (log only, no relay configured)"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct MailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    template: &'a str,
    name: &'a str,
    verification_url: &'a str,
}

/// Hands the message to an HTTP mail relay as JSON. Any transport failure or
/// non-2xx reply is a `TransportError`.
pub struct WebhookNotifier {
    client: reqwest::Client,
    relay_url: String,
}

impl WebhookNotifier {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url: relay_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_verification_email(
        &self,
        to: &str,
        name: &str,
        verification_url: &Redacted<String>,
    ) -> Result<(), TransportError> {
        let body = MailRequest {
            to,
            subject: "Verify your email address",
            template: "verify-email",
            name,
            verification_url: verification_url.expose(),
        };

        let response = self
            .client
            .post(&self.relay_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("Mail relay unreachable: {}", e);
                TransportError(format!("mail relay unreachable: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Mail relay rejected verification email for {}: {}", to, status);
            return Err(TransportError(format!("mail relay returned {}", status)));
        }

        info!("Verification email queued for {}", to);
        Ok(())
    }
}
