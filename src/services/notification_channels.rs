//! Delivery channels for persisted notifications
//!
//! The record is already stored before dispatch; channels only push it
//! outward. Each failure is isolated to its channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::entities::notifications;
use crate::error::{PipelineError, Result};
use crate::models::notification::Preferences;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Push,
    InApp,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Push => "push",
            ChannelKind::InApp => "in_app",
            ChannelKind::Webhook => "webhook",
        }
    }

    pub fn enabled_in(&self, preferences: &Preferences) -> bool {
        match self {
            ChannelKind::Email => preferences.channels.email,
            ChannelKind::Push => preferences.channels.push,
            ChannelKind::InApp => preferences.channels.in_app,
            ChannelKind::Webhook => preferences.channels.webhook,
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Unconfigured channels are skipped by the dispatcher
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, notification: &notifications::Model, preferences: &Preferences) -> Result<()>;
}

fn outbound_payload(notification: &notifications::Model) -> serde_json::Value {
    json!({
        "id": notification.id,
        "user_id": notification.user_id,
        "type": notification.notification_type,
        "title": notification.title,
        "message": notification.message,
        "priority": notification.priority,
        "data": notification.data,
        "created_at": notification.created_at,
    })
}

async fn post_json(client: &Client, url: &str, body: &serde_json::Value, what: &str) -> Result<()> {
    let response = client.post(url).json(body).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        return Err(PipelineError::Delivery(format!("{} delivery failed with {}", what, status)));
    }
    Ok(())
}

/// Fans persisted notifications out to live in-app subscribers
#[derive(Clone)]
pub struct InAppChannel {
    sender: broadcast::Sender<notifications::Model>,
}

impl InAppChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<notifications::Model> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn send(&self, notification: &notifications::Model, _preferences: &Preferences) -> Result<()> {
        // No live subscriber is not a failure
        let receivers = self.sender.send(notification.clone()).unwrap_or(0);
        debug!(notification_id = %notification.id, receivers = receivers, "In-app notification broadcast");
        Ok(())
    }
}

/// POSTs to the user's own webhook URL
#[derive(Clone)]
pub struct WebhookChannel {
    client: Client,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, notification: &notifications::Model, preferences: &Preferences) -> Result<()> {
        let url = preferences.webhook_url.as_deref().ok_or_else(|| {
            PipelineError::BadConfig(format!(
                "webhook enabled for user {} without a url",
                notification.user_id
            ))
        })?;
        post_json(&self.client, url, &outbound_payload(notification), "webhook").await
    }
}

/// Email or push delivered through an external relay service
#[derive(Clone)]
pub struct RelayChannel {
    kind: ChannelKind,
    client: Client,
    relay_url: Option<String>,
}

impl RelayChannel {
    pub fn new(kind: ChannelKind, relay_url: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            kind,
            client: Client::builder().timeout(timeout).build()?,
            relay_url,
        })
    }
}

#[async_trait]
impl NotificationChannel for RelayChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn is_configured(&self) -> bool {
        self.relay_url.is_some()
    }

    async fn send(&self, notification: &notifications::Model, _preferences: &Preferences) -> Result<()> {
        let url = self.relay_url.as_deref().ok_or_else(|| {
            PipelineError::BadConfig(format!("{} relay url not configured", self.kind.as_str()))
        })?;
        let mut body = outbound_payload(notification);
        body["channel"] = json!(self.kind.as_str());
        post_json(&self.client, url, &body, self.kind.as_str()).await
    }
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<ChannelKind>,
    pub failed: Vec<ChannelKind>,
    pub skipped: Vec<ChannelKind>,
}

#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl ChannelDispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }

    /// Sends through every channel the user enabled. Failures are logged
    /// and never stop the remaining channels.
    pub async fn dispatch(&self, notification: &notifications::Model, preferences: &Preferences) -> DispatchReport {
        let mut report = DispatchReport::default();

        for channel in &self.channels {
            let kind = channel.kind();
            if !kind.enabled_in(preferences) || !channel.is_configured() {
                report.skipped.push(kind);
                continue;
            }

            match channel.send(notification, preferences).await {
                Ok(()) => report.delivered.push(kind),
                Err(e) => {
                    warn!(
                        notification_id = %notification.id,
                        user_id = %notification.user_id,
                        channel = kind.as_str(),
                        error = %e,
                        "Channel dispatch failed"
                    );
                    report.failed.push(kind);
                }
            }
        }

        report
    }
}
