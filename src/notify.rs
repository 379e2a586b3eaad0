//! Delivers notifications to Slack, either through an incoming
//! webhook or through a relay function.

use crate::conf::NotifySettings;
use crate::service::Notifier;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use envy::from_env;
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tracing::{info, warn};

/// The JSON body delivered for a message, both to the webhook and to
/// the relay function.
pub fn payload(message: &str) -> Value {
    json!({ "text": message })
}

/// Notifies through a Slack incoming webhook.
pub struct Webhook {
    url: String,
    http: reqwest::Client,
}

impl Webhook {
    pub fn new(url: String) -> Self {
        Webhook {
            url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for Webhook {
    async fn send(&self, message: &str) {
        info!(text = message, "Sending notification to webhook");
        match self
            .http
            .post(&self.url)
            .json(&payload(message))
            .send()
            .await
        {
            Ok(response) => info!("Slack response: {}", response.status()),
            Err(e) => warn!("Error sending Slack notification: {:?}", e),
        }
    }
}

/// Notifies by invoking a relay Lambda function, which is in charge
/// of delivering the message.
pub struct Relay {
    function_name: String,
    client: aws_sdk_lambda::Client,
}

impl Relay {
    pub fn new(function_name: String, client: aws_sdk_lambda::Client) -> Self {
        Relay {
            function_name,
            client,
        }
    }
}

#[async_trait]
impl Notifier for Relay {
    async fn send(&self, message: &str) {
        info!(text = message, function = %self.function_name, "Sending notification to relay");
        let body = payload(message).to_string();
        let result = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(body.into_bytes()))
            .send()
            .await;
        match result {
            Ok(response) => {
                if let Some(error) = response.function_error() {
                    warn!("Notification relay failed: {}", error);
                }
            }
            Err(e) => warn!("Error invoking notification relay: {:?}", e),
        }
    }
}

/// Only logs notifications. Used when no delivery target is
/// configured.
pub struct LogOnly;

#[async_trait]
impl Notifier for LogOnly {
    async fn send(&self, message: &str) {
        info!(text = message, "Notification (not delivered)");
    }
}

/// Where notifications are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Webhook(String),
    Relay(String),
    LogOnly,
}

impl Target {
    /// Decide the target from the settings. A webhook wins over a
    /// relay function, and empty values count as unset.
    pub fn from_settings(settings: &NotifySettings) -> Self {
        match (&settings.slack_webhook_url, &settings.slack_alert_name) {
            (Some(url), _) if !url.is_empty() => Target::Webhook(url.clone()),
            (_, Some(name)) if !name.is_empty() => Target::Relay(name.clone()),
            _ => Target::LogOnly,
        }
    }
}

/// Pick a notifier according to the settings. The lambda client is
/// only used when notifications go through a relay function.
pub fn from_settings(
    settings: &NotifySettings,
    lambda: &aws_sdk_lambda::Client,
) -> Box<dyn Notifier> {
    match Target::from_settings(settings) {
        Target::Webhook(url) => Box::new(Webhook::new(url)),
        Target::Relay(name) => Box::new(Relay::new(name, lambda.clone())),
        Target::LogOnly => {
            warn!("No notification target configured; notifications will only be logged");
            Box::new(LogOnly)
        }
    }
}

/// Global notifier instance.
static CURRENT: OnceCell<Box<dyn Notifier>> = OnceCell::new();

/// Initialize the global notifier from the environment.
pub fn init(lambda: &aws_sdk_lambda::Client) -> Result<()> {
    let settings: NotifySettings = from_env()?;
    CURRENT
        .set(from_settings(&settings, lambda))
        .map_err(|_| anyhow!("notify::CURRENT was already initialized"))
}

/// Get the current notifier, or panic if it hasn't been initialized.
pub fn current() -> &'static dyn Notifier {
    CURRENT.get().expect("notifier is not initialized").as_ref()
}
