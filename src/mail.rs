//! Confirmation-mail sink. Delivery is fire-and-forget: the signup flow logs
//! a failure and carries on, it never surfaces to the caller.

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_confirmation(
        &self,
        email: &str,
        username: &str,
        code: &str,
    ) -> Result<(), MailError>;
}

/// Dev default: the code goes to the application log instead of a mailbox.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_confirmation(
        &self,
        email: &str,
        username: &str,
        code: &str,
    ) -> Result<(), MailError> {
        info!("confirmation code for {username} <{email}>: {code}");
        Ok(())
    }
}

const DEFAULT_SENDER: &str = "no-reply@revu.local";
const CONFIRMATION_SUBJECT: &str = "revu confirmation code";

/// Hands the message to an HTTP mail relay as JSON. Which relay is an
/// operator concern; anything that accepts {from, to, subject, body} works.
pub struct WebhookMailer {
    client: reqwest::Client,
    url: String,
    sender: String,
}

impl WebhookMailer {
    pub fn new(url: String) -> Self {
        let sender = std::env::var("MAIL_SENDER").unwrap_or_else(|_| DEFAULT_SENDER.into());
        Self {
            client: reqwest::Client::new(),
            url,
            sender,
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send_confirmation(
        &self,
        email: &str,
        _username: &str,
        code: &str,
    ) -> Result<(), MailError> {
        let payload = serde_json::json!({
            "from": self.sender,
            "to": email,
            "subject": CONFIRMATION_SUBJECT,
            "body": code,
        });
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| MailError::Delivery(e.to_string()))?;
        Ok(())
    }
}

/// Webhook relay when `MAIL_WEBHOOK_URL` is set, log sink otherwise.
pub fn build_mailer() -> Arc<dyn Mailer> {
    match std::env::var("MAIL_WEBHOOK_URL") {
        Ok(url) => {
            info!("confirmation mail via webhook relay at {url}");
            Arc::new(WebhookMailer::new(url))
        }
        Err(_) => {
            info!("no MAIL_WEBHOOK_URL set; confirmation codes go to the log");
            Arc::new(LogMailer)
        }
    }
}
