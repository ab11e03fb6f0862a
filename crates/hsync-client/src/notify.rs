//! Failure notifications, at most one per category per calendar day.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use hsync_core::NotificationCategory;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REFRESH_URL: &str = "https://console.harmonic.ai";

/// Reports an upstream failure. Implementations swallow their own delivery errors.
#[async_trait]
pub trait FailureNotifier: Send + Sync {
    async fn notify(&self, category: NotificationCategory, detail: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub target: String,
    pub text: String,
    /// Delivery de-duplication key understood by the receiving channel.
    pub unique_by: String,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, message: &ChannelMessage) -> anyhow::Result<()>;
}

type DayFn = dyn Fn() -> NaiveDate + Send + Sync;

pub struct DailyNotifier {
    channel: Arc<dyn MessageChannel>,
    target: String,
    today: Box<DayFn>,
    delivered: Mutex<HashSet<String>>,
}

impl DailyNotifier {
    pub fn new(channel: Arc<dyn MessageChannel>, target: impl Into<String>) -> Self {
        Self::with_day_source(channel, target, || Local::now().date_naive())
    }

    pub fn with_day_source(
        channel: Arc<dyn MessageChannel>,
        target: impl Into<String>,
        today: impl Fn() -> NaiveDate + Send + Sync + 'static,
    ) -> Self {
        Self {
            channel,
            target: target.into(),
            today: Box::new(today),
            delivered: Mutex::new(HashSet::new()),
        }
    }

    fn message_text(category: NotificationCategory, detail: &str) -> String {
        match category {
            NotificationCategory::AuthFailure => format!(
                "Harmonic API authentication failed. The Bearer token may need to be refreshed.\n\nRefresh at: {REFRESH_URL}\n\nError: {detail}"
            ),
            NotificationCategory::ApiError => {
                format!("Harmonic API error: GraphQL Error\n\nDetails: {detail}")
            }
        }
    }
}

#[async_trait]
impl FailureNotifier for DailyNotifier {
    async fn notify(&self, category: NotificationCategory, detail: &str) {
        let unique_by = category.unique_key((self.today)());
        let mut delivered = self.delivered.lock().await;
        if delivered.contains(&unique_by) {
            debug!(%unique_by, "notification already sent today");
            return;
        }

        let message = ChannelMessage {
            target: self.target.clone(),
            text: Self::message_text(category, detail),
            unique_by: unique_by.clone(),
        };
        match self.channel.send(&message).await {
            Ok(()) => {
                info!(%unique_by, "failure notification sent");
                delivered.insert(unique_by);
            }
            Err(err) => warn!(%unique_by, error = %err, "failed to send failure notification"),
        }
    }
}

/// Posts messages as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl MessageChannel for WebhookChannel {
    async fn send(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .with_context(|| format!("posting notification to {}", self.url))?
            .error_for_status()
            .context("notification webhook rejected the message")?;
        Ok(())
    }
}

/// Writes messages to the log when no delivery channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl MessageChannel for LogChannel {
    async fn send(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        warn!(unique_by = %message.unique_by, text = %message.text, "failure notification (no channel configured)");
        Ok(())
    }
}

/// Keeps delivered messages in memory.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    messages: StdMutex<Vec<ChannelMessage>>,
}

impl MemoryChannel {
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn send(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}
