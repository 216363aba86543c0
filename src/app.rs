//! Wires the sweeper and the flusher around one broker and claim-check store.

use crate::blockchain::client::ChainReader;
use crate::blockchain::hub::Hub;
use crate::cache::ProposerCache;
use crate::config::Config;
use crate::flusher::decoder::JsonTxDecoder;
use crate::flusher::{FlushError, Flusher, FlusherConfig};
use crate::messaging::{BlobStore, ClaimCheck, ClaimCheckConfig, DeadLetter, InMemoryBroker};
use crate::sweeper::{SweepError, Sweeper, SweeperConfig};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PROPOSER_CACHE_CAPACITY: u64 = 1_000;

#[derive(Error, Debug)]
pub enum StartError {
    #[error("Failed to start sweeper: {0}")]
    Sweeper(#[from] SweepError),

    #[error("Failed to start flusher: {0}")]
    Flusher(#[from] FlushError),
}

/// Both pipeline stages, started and ready to run.
pub struct Ingest<C> {
    sweeper: Sweeper<C>,
    flusher: Flusher<C>,
    broker: Arc<InMemoryBroker>,
    consumer_group: String,
    block_topic: String,
    shutdown: CancellationToken,
}

impl<C: ChainReader + 'static> Ingest<C> {
    pub async fn start(
        config: &Config,
        hub: Arc<Hub<C>>,
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        shutdown: CancellationToken,
    ) -> Result<Self, StartError> {
        let broker = Arc::new(InMemoryBroker::new(
            config.queue_capacity,
            config.queue_partitions,
        ));
        let claim_check = Arc::new(ClaimCheck::new(
            broker.clone(),
            blobs,
            ClaimCheckConfig {
                threshold_bytes: config.claim_check_threshold_bytes,
                retry_delay: config.retry_delay,
            },
            shutdown.clone(),
        ));

        let sweeper = Sweeper::new(
            hub.clone(),
            &pool,
            claim_check.clone(),
            ProposerCache::new(PROPOSER_CACHE_CAPACITY, config.validator_cache_ttl),
            SweeperConfig::from(config),
        )
        .await?;

        let flusher = Flusher::new(
            hub,
            pool,
            claim_check,
            DeadLetter::new(broker.clone(), shutdown.clone()),
            Arc::new(JsonTxDecoder),
            FlusherConfig::from(config),
            shutdown.clone(),
        )
        .await?;

        Ok(Self {
            sweeper,
            flusher,
            broker,
            consumer_group: config.consumer_group.clone(),
            block_topic: config.block_topic.clone(),
            shutdown,
        })
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    /// Runs both stages until shutdown and waits for them to drain.
    pub async fn run(self) {
        let Self {
            mut sweeper,
            mut flusher,
            broker,
            consumer_group,
            block_topic,
            shutdown,
        } = self;

        let mut consumer = broker.subscribe(&consumer_group, &[block_topic.as_str()]);
        info!(
            "Consuming {} as group {}, sweeping from height {}",
            block_topic,
            consumer_group,
            sweeper.cursor() + 1
        );

        let sweeping = tokio::spawn(async move { sweeper.run(shutdown).await });
        let flushing = tokio::spawn(async move { flusher.run(&mut consumer).await });

        let (swept, flushed) = tokio::join!(sweeping, flushing);
        if let Err(e) = swept {
            error!("Sweeper task failed: {}", e);
        }
        if let Err(e) = flushed {
            error!("Flusher task failed: {}", e);
        }
    }
}
