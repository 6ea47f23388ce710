// Notification dispatch. One outbound call per send, never retried here:
// a dropped alert is logged, a duplicate alert is spam.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    config::LineConfig,
    error::{describe_chain, MonitorError},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub destination: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub succeeded: bool,
    // False when the send was refused before reaching the channel
    pub attempted: bool,
    pub error_detail: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered() -> Self {
        Self {
            succeeded: true,
            attempted: true,
            error_detail: None,
        }
    }

    pub fn failed(err: &MonitorError) -> Self {
        Self {
            succeeded: false,
            attempted: !err.is_configuration(),
            error_detail: Some(err.to_string()),
        }
    }
}

pub fn availability_message(site_name: &str, date: NaiveDate, url: &str) -> String {
    format!(
        "🏕️ {}の{}に空きが出ました！\n今すぐ予約しましょう！\n予約ページ: {}",
        date.format("%Y-%m-%d"),
        site_name,
        url
    )
}

pub fn error_message(cause: &str) -> String {
    format!("⚠️ 監視システムでエラーが発生しました: {cause}")
}

// The messaging provider seam
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn deliver(&self, message: &NotificationMessage) -> Result<(), MonitorError>;
}

// LINE Messaging API push endpoint
pub struct LinePushChannel {
    client: Client,
    access_token: Option<String>,
    endpoint: String,
}

impl LinePushChannel {
    pub fn new(config: &LineConfig) -> Self {
        Self {
            client: Client::new(),
            access_token: config.access_token.clone(),
            endpoint: format!("{}/v2/bot/message/push", config.api_base.trim_end_matches('/')),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NotificationChannel for LinePushChannel {
    async fn deliver(&self, message: &NotificationMessage) -> Result<(), MonitorError> {
        let token = self
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                MonitorError::Configuration("LINE channel access token is not set".to_string())
            })?;

        let payload = json!({
            "to": message.destination,
            "messages": [{ "type": "text", "text": message.body }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MonitorError::Dispatch(format!("LINE push failed: {}", describe_chain(&e))))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let detail = response.text().await.unwrap_or_default();
        Err(MonitorError::Dispatch(format!(
            "LINE push rejected with {status}: {}",
            detail.trim()
        )))
    }
}

pub struct NotificationDispatcher<C> {
    channel: C,
    timeout: Duration,
}

impl<C: NotificationChannel> NotificationDispatcher<C> {
    pub fn new(channel: C, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    // Never returns an error: every failure is folded into the outcome
    pub async fn send(&self, destination: Option<&str>, body: &str) -> DispatchOutcome {
        let destination = match destination.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => d,
            None => {
                let err =
                    MonitorError::Configuration("messaging destination is not set".to_string());
                warn!(error = %err, "notification not sent");
                return DispatchOutcome::failed(&err);
            }
        };

        let message = NotificationMessage {
            destination: destination.to_string(),
            body: body.to_string(),
        };

        let result = match tokio::time::timeout(self.timeout, self.channel.deliver(&message)).await
        {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Dispatch(format!(
                "messaging channel did not answer within {}ms",
                self.timeout.as_millis()
            ))),
        };

        match result {
            Ok(()) => {
                info!(destination = %message.destination, "notification sent");
                DispatchOutcome::delivered()
            }
            Err(err) => {
                warn!(error = %err, "notification failed");
                DispatchOutcome::failed(&err)
            }
        }
    }
}
