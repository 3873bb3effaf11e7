use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::outbox::OutboxEventRow;
use crate::store::{Store, StoreError};

pub const DEFAULT_CHANNEL: &str = "jd-intake.outbox";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEventRow) -> Result<(), PublishError>;
}

/// Publishes each event as JSON on a Redis pub/sub channel.
pub struct RedisPublisher {
    conn: MultiplexedConnection,
    channel: String,
}

impl RedisPublisher {
    pub async fn connect(client: &redis::Client, channel: &str) -> Result<Self, PublishError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: &OutboxEventRow) -> Result<(), PublishError> {
        let message = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(&self.channel, message).await?;
        debug!(
            "Published outbox #{} ({}) to {} receivers",
            event.id, event.event_type, receivers
        );
        Ok(())
    }
}

/// Polls undispatched outbox rows in id order and hands them to a publisher.
///
/// Delivery is at-least-once: a crash between publish and mark replays the batch tail.
pub struct OutboxRelay {
    store: Arc<dyn Store>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: usize,
    poll_interval: Duration,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn EventPublisher>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// One pass. Stops at the first publish failure so later events never overtake it.
    pub async fn relay_once(&self) -> Result<usize, StoreError> {
        let pending = self.store.fetch_pending_outbox(self.batch_size).await?;
        let mut published = Vec::with_capacity(pending.len());

        for event in &pending {
            match self.publisher.publish(event).await {
                Ok(()) => published.push(event.id),
                Err(e) => {
                    warn!("Outbox #{} not published, retrying next pass: {}", event.id, e);
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.store.mark_outbox_dispatched(&published).await?;
        }
        Ok(published.len())
    }

    pub async fn run(self) {
        info!(
            "Outbox relay started (batch {}, every {:?})",
            self.batch_size, self.poll_interval
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            match self.relay_once().await {
                Ok(0) => {}
                Ok(n) => info!("Relayed {n} outbox events"),
                Err(e) => warn!("Outbox relay pass failed: {e}"),
            }
        }
    }
}
