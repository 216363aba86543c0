use super::{produce_with_backoff, Header, Message, Producer, QueueError, Record};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const ERROR_HEADER: &str = "error";
pub const TIMESTAMP_HEADER: &str = "timestamp";

pub fn dlq_topic(topic: &str) -> String {
    format!("dlq-{}", topic)
}

/// Parks messages a consumer gave up on, so one poison message never stalls
/// the partition behind it.
#[derive(Clone)]
pub struct DeadLetter {
    producer: Arc<dyn Producer>,
    shutdown: CancellationToken,
}

impl DeadLetter {
    pub fn new(producer: Arc<dyn Producer>, shutdown: CancellationToken) -> Self {
        Self { producer, shutdown }
    }

    /// Republishes `message` verbatim to `dlq-<topic>`, tagged with the error
    /// and the time it was given up on.
    pub async fn send(&self, message: &Message, error: &str) -> Result<(), QueueError> {
        warn!(
            "Sending {} (partition {}, offset {}) to {}: {}",
            message.key,
            message.partition,
            message.offset,
            dlq_topic(&message.topic),
            error
        );

        let mut headers = message.headers.clone();
        headers.push(Header::new(ERROR_HEADER, error));
        headers.push(Header::new(TIMESTAMP_HEADER, Utc::now().to_rfc3339()));

        let record = Record {
            topic: dlq_topic(&message.topic),
            key: message.key.clone(),
            value: message.value.clone(),
            headers,
        };
        produce_with_backoff(self.producer.as_ref(), record, &self.shutdown).await
    }
}
