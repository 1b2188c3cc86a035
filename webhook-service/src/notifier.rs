use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Request to email an order confirmation, sent once the order is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub order_id: String,
    pub event_id: String,
    pub event_name: String,
    pub email: String,
    pub full_name: String,
    pub ticket_ids: Vec<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<()>;
}

pub struct KafkaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn send_confirmation(&self, confirmation: &Confirmation) -> Result<()> {
        let json = serde_json::to_string(confirmation)?;
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&confirmation.order_id);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send confirmation: {}", e))?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds or the attempts are used up, sleeping with
    /// exponential backoff in between. Returns the last error.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    warn!("Attempt {} of {} failed: {}", attempt, self.max_attempts, e);
                    tokio::time::sleep(backoff).await;
                    backoff *= self.multiplier;
                    attempt += 1;
                }
            }
        }
    }
}
