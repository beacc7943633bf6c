//! Completion notification.
//!
//! A sweep ends with exactly one summary message. Delivery is best
//! effort: failures are logged and never propagated.

use crate::config::NotifyConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from delivering a notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed.
    #[error("http error: {0}")]
    Http(String),

    /// Connection to the webhook failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Webhook answered with a non-success status.
    #[error("webhook rejected message: {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            NotifyError::ConnectionFailed(e.to_string())
        } else {
            NotifyError::Http(e.to_string())
        }
    }
}

/// Trait for summary sinks.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`, logging (not returning) any failure.
    async fn notify(&self, text: &str);
}

/// Notifier used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, text: &str) {
        info!(message = %text, "no webhook configured, summary not sent");
    }
}

/// Chat-webhook message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    /// Sender name.
    pub username: String,
    /// Sender icon.
    pub icon_emoji: String,
    /// Message text.
    pub text: String,
}

/// Posts the summary to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    username: String,
    icon_emoji: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    pub fn new(url: &str, config: &NotifyConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.to_string(),
            username: config.username.clone(),
            icon_emoji: config.icon_emoji.clone(),
            http,
        }
    }

    /// Build the message body for `text`.
    pub fn payload(&self, text: &str) -> WebhookPayload {
        WebhookPayload {
            username: self.username.clone(),
            icon_emoji: self.icon_emoji.clone(),
            text: text.to_string(),
        }
    }

    /// Post `text`, returning delivery errors.
    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .json(&self.payload(text))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) {
        match self.send(text).await {
            Ok(()) => info!("summary sent to webhook"),
            Err(e) => warn!(error = %e, "failed to send summary"),
        }
    }
}

/// Pick the webhook notifier when a URL is known, the no-op one otherwise.
pub fn from_config(url: Option<String>, config: &NotifyConfig) -> Box<dyn Notifier> {
    match url {
        Some(url) => Box::new(WebhookNotifier::new(&url, config)),
        None => Box::new(NoopNotifier),
    }
}

/// Notifier that records every message (for testing).
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message received so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}
