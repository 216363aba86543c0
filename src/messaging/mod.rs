//! Queue and blob-storage plumbing shared by the sweeper and the flusher.

pub mod blob;
pub mod broker;
pub mod claim_check;
pub mod dlq;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub use blob::{BlobError, BlobStore, InMemoryBlobStore, LocalBlobStore};
pub use broker::{InMemoryBroker, InMemoryConsumer};
pub use claim_check::{ClaimCheck, ClaimCheckConfig, ClaimCheckMessage, OutboundMessage};
pub use dlq::{dlq_topic, DeadLetter};

const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue full for topic {0}")]
    QueueFull(String),

    #[error("Topic {0} is not subscribed by this consumer")]
    NotSubscribed(String),

    #[error("Broker closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
}

/// A message handed out by a consumer, positioned by partition and offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub value: Vec<u8>,
    pub headers: Vec<Header>,
}

impl Message {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, record: Record) -> Result<(), QueueError>;
}

/// A consumer-group member. Offsets are only advanced by [`Consumer::commit`].
#[async_trait]
pub trait Consumer: Send {
    /// Next message, or `None` once `timeout` elapses without one.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, QueueError>;

    async fn commit(&mut self, message: &Message) -> Result<(), QueueError>;
}

/// Produces `record`, sleeping and retrying for as long as the queue reports
/// itself full. Any other error is logged and returned.
pub async fn produce_with_backoff(
    producer: &dyn Producer,
    record: Record,
    shutdown: &CancellationToken,
) -> Result<(), QueueError> {
    loop {
        match producer.produce(record.clone()).await {
            Ok(()) => return Ok(()),
            Err(QueueError::QueueFull(topic)) => {
                if shutdown.is_cancelled() {
                    return Err(QueueError::QueueFull(topic));
                }
                debug!("Topic {} is full, retrying {}", topic, record.key);
                tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
            }
            Err(e) => {
                error!("Failed to produce {} to {}: {}", record.key, record.topic, e);
                return Err(e);
            }
        }
    }
}
