//! Delivery gateways.
//!
//! A gateway makes exactly one delivery attempt for a notification and
//! reports success or failure. Retrying is the dispatcher's job, never the
//! gateway's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use courier_common::config::AppConfig;
use courier_common::types::NotificationRecord;

/// Why a delivery attempt did not succeed. Every variant is retryable.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway task aborted: {0}")]
    Aborted(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        DeliveryError::Transport(e.to_string())
    }
}

/// Capability to attempt a single delivery.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Attempt to deliver `record` once.
    async fn deliver(&self, record: &NotificationRecord) -> Result<(), DeliveryError>;
}

/// Gateway that succeeds or fails at random, for demos and local runs.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    failure_rate: f64,
    latency: Duration,
}

impl SimulatedGateway {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl DeliveryGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn deliver(&self, record: &NotificationRecord) -> Result<(), DeliveryError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if rand::random::<f64>() < self.failure_rate {
            return Err(DeliveryError::Rejected(format!(
                "simulated {} failure",
                record.channel_type
            )));
        }

        tracing::debug!(
            notification_id = %record.id,
            channel = %record.channel_type,
            user_id = %record.user_id,
            "Simulated delivery succeeded"
        );
        Ok(())
    }
}

/// Gateway that forwards each notification as JSON to an HTTP endpoint.
///
/// A 2xx response is a successful delivery; anything else is a failure.
#[derive(Debug, Clone)]
pub struct WebhookGateway {
    client: reqwest::Client,
    url: String,
}

impl WebhookGateway {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryGateway for WebhookGateway {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, record: &NotificationRecord) -> Result<(), DeliveryError> {
        let response = self.client.post(&self.url).json(record).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected(format!(
            "webhook responded with {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )))
    }
}

/// Build the configured gateway: webhook when a URL is set, simulated otherwise.
pub fn build_gateway(config: &AppConfig) -> Arc<dyn DeliveryGateway> {
    match &config.delivery_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Using webhook delivery gateway");
            Arc::new(WebhookGateway::new(url.clone()))
        }
        None => {
            tracing::info!(
                failure_rate = config.failure_simulation_rate,
                latency_ms = config.simulated_latency_ms,
                "Using simulated delivery gateway"
            );
            Arc::new(
                SimulatedGateway::new(config.failure_simulation_rate)
                    .with_latency(Duration::from_millis(config.simulated_latency_ms)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::types::{ChannelType, NewNotification};

    fn record() -> NotificationRecord {
        NotificationRecord::new(NewNotification {
            user_id: "1".to_string(),
            channel_type: ChannelType::Email,
            subject: Some("Hi".to_string()),
            body: "hello".to_string(),
        })
    }

    #[tokio::test]
    async fn test_simulated_rate_zero_always_succeeds() {
        let gateway = SimulatedGateway::new(0.0);
        for _ in 0..50 {
            assert!(gateway.deliver(&record()).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_simulated_rate_one_always_fails() {
        let gateway = SimulatedGateway::new(1.0);
        for _ in 0..50 {
            assert!(matches!(
                gateway.deliver(&record()).await,
                Err(DeliveryError::Rejected(_))
            ));
        }
    }

    #[test]
    fn test_build_gateway_selection() {
        let simulated = build_gateway(&AppConfig::default());
        assert_eq!(simulated.name(), "simulated");

        let config = AppConfig {
            delivery_webhook_url: Some("http://127.0.0.1:9/hook".to_string()),
            ..AppConfig::default()
        };
        assert_eq!(build_gateway(&config).name(), "webhook");
    }
}
