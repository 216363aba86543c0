//! Size-aware publishing.
//!
//! Payloads above the configured threshold are parked in blob storage and the
//! queue only carries a pointer to them. The pointer travels under a key that
//! contains [`CLAIM_CHECK_MARKER`], which is how consumers tell the two shapes
//! apart.

use super::{produce_with_backoff, BlobStore, Header, Message, Producer, QueueError, Record};
use crate::retry::{retry_until_cancelled, RetryError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const CLAIM_CHECK_MARKER: &str = "CLAIM_CHECK_";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to encode claim-check pointer: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Publish cancelled during shutdown")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Malformed claim-check pointer: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Claim-check resolution cancelled during shutdown")]
    Cancelled,
}

/// Pointer published in place of an oversized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCheckMessage {
    pub object_path: String,
}

#[derive(Debug, Clone)]
pub struct ClaimCheckConfig {
    pub threshold_bytes: usize,
    /// Delay between blob storage attempts.
    pub retry_delay: Duration,
}

/// One logical message before the claim-check decision is made.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    /// e.g. `NEW_BLOCK_`; the claim-check marker is inserted after it.
    pub key_prefix: String,
    /// Identity suffix of the key, e.g. the block height.
    pub id: String,
    /// Where the payload is stored if it is too large.
    pub object_path: String,
    pub payload: Vec<u8>,
    pub headers: Vec<Header>,
}

pub fn message_key(prefix: &str, id: &str) -> String {
    format!("{}{}", prefix, id)
}

pub fn claim_check_key(prefix: &str, id: &str) -> String {
    format!("{}{}{}", prefix, CLAIM_CHECK_MARKER, id)
}

pub fn is_claim_check_key(key: &str) -> bool {
    key.contains(CLAIM_CHECK_MARKER)
}

pub struct ClaimCheck {
    producer: Arc<dyn Producer>,
    blobs: Arc<dyn BlobStore>,
    config: ClaimCheckConfig,
    shutdown: CancellationToken,
}

impl ClaimCheck {
    pub fn new(
        producer: Arc<dyn Producer>,
        blobs: Arc<dyn BlobStore>,
        config: ClaimCheckConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            producer,
            blobs,
            config,
            shutdown,
        }
    }

    pub fn config(&self) -> &ClaimCheckConfig {
        &self.config
    }

    pub fn producer(&self) -> Arc<dyn Producer> {
        self.producer.clone()
    }

    /// Publishes `message`, storing the payload out of band first when it is
    /// larger than the threshold. The upload is retried until it succeeds so
    /// an oversized payload is never dropped on a storage hiccup.
    pub async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let record = if message.payload.len() > self.config.threshold_bytes {
            let path = message.object_path.as_str();
            let payload = message.payload.as_slice();

            retry_until_cancelled(
                &self.shutdown,
                self.config.retry_delay,
                "claim-check upload",
                || self.blobs.put(path, payload),
            )
            .await
            .map_err(|_| PublishError::Cancelled)?;

            debug!(
                "Claim-checked {} bytes for {} at {}",
                message.payload.len(),
                message.id,
                message.object_path
            );

            let pointer = ClaimCheckMessage {
                object_path: message.object_path.clone(),
            };
            Record {
                topic: message.topic,
                key: claim_check_key(&message.key_prefix, &message.id),
                value: serde_json::to_vec(&pointer)?,
                headers: message.headers,
            }
        } else {
            Record {
                topic: message.topic,
                key: message_key(&message.key_prefix, &message.id),
                value: message.payload,
                headers: message.headers,
            }
        };

        produce_with_backoff(self.producer.as_ref(), record, &self.shutdown).await?;
        Ok(())
    }

    /// The original payload of a consumed message, fetched from blob storage
    /// when the message is a claim-check pointer.
    pub async fn resolve(&self, message: &Message) -> Result<Vec<u8>, ResolveError> {
        if !is_claim_check_key(&message.key) {
            return Ok(message.value.clone());
        }

        let pointer: ClaimCheckMessage = serde_json::from_slice(&message.value)?;
        let path = pointer.object_path.as_str();

        retry_until_cancelled(
            &self.shutdown,
            self.config.retry_delay,
            "claim-check download",
            || self.blobs.get(path),
        )
        .await
        .map_err(|e| match e {
            RetryError::Cancelled | RetryError::Permanent(_) => ResolveError::Cancelled,
        })
    }
}
