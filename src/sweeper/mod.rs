//! The producer stage: walks the chain height by height and publishes every
//! block onto the block topic.

pub mod worker_pool;

use crate::blockchain::client::{ChainReader, ClientError, RpcClient};
use crate::blockchain::hub::Hub;
use crate::cache::ProposerCache;
use crate::config::Config;
use crate::db::block::resume_height;
use crate::db::DbError;
use crate::messaging::claim_check::{ClaimCheck, OutboundMessage, PublishError};
use crate::messaging::Header;
use crate::models::{BlockMessage, BLOCK_KEY_PREFIX, HEIGHT_HEADER};
use crate::retry::retry_until_cancelled;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use worker_pool::WorkerPool;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Failed to encode block {height}: {source}")]
    Encode {
        height: i64,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub topic: String,
    pub num_workers: usize,
    /// Rebalance the hub on heights divisible by this; 0 disables it.
    pub rebalance_interval: i64,
    /// First height to sweep when nothing is stored yet.
    pub start_height: i64,
    /// Delay between attempts to fetch a block.
    pub fetch_retry_delay: Duration,
    pub db_timeout: Duration,
}

impl From<&Config> for SweeperConfig {
    fn from(config: &Config) -> Self {
        Self {
            topic: config.block_topic.clone(),
            num_workers: config.num_workers,
            rebalance_interval: config.rebalance_interval,
            start_height: config.start_height,
            fetch_retry_delay: Duration::from_secs(1),
            db_timeout: config.db_timeout,
        }
    }
}

pub struct Sweeper<C = RpcClient> {
    hub: Arc<Hub<C>>,
    claim_check: Arc<ClaimCheck>,
    proposers: ProposerCache,
    config: SweeperConfig,
    /// Last height handed to a worker.
    cursor: i64,
}

impl<C: ChainReader + 'static> Sweeper<C> {
    /// Rebalances the hub and seeds the cursor from the top of the unbroken
    /// run of stored blocks, so heights lost with the in-memory queue are
    /// swept again. Fails when no RPC endpoint answers.
    pub async fn new(
        hub: Arc<Hub<C>>,
        pool: &SqlitePool,
        claim_check: Arc<ClaimCheck>,
        proposers: ProposerCache,
        config: SweeperConfig,
    ) -> Result<Self, SweepError> {
        hub.rebalance().await?;

        let cursor = resume_height(pool, config.start_height, config.db_timeout).await?;
        info!("Sweeper resuming after height {}", cursor);

        Ok(Self {
            hub,
            claim_check,
            proposers,
            config,
            cursor,
        })
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Sweeps until `shutdown` fires, then waits for in-flight blocks.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut pool = WorkerPool::new(self.config.num_workers);
        info!("Sweeper started with {} workers", pool.size());

        while let Some(permit) = pool.acquire(&shutdown).await {
            self.cursor += 1;
            let height = self.cursor;

            if self.config.rebalance_interval > 0 && height % self.config.rebalance_interval == 0 {
                if let Err(e) = self.hub.rebalance().await {
                    warn!("Rebalance at height {} failed: {}", height, e);
                }
            }

            let unit = SweepUnit {
                hub: self.hub.clone(),
                claim_check: self.claim_check.clone(),
                proposers: self.proposers.clone(),
                topic: self.config.topic.clone(),
                retry_delay: self.config.fetch_retry_delay,
                shutdown: shutdown.clone(),
            };
            pool.spawn(permit, async move {
                match unit.sweep(height).await {
                    Ok(true) => debug!("Published block {}", height),
                    Ok(false) => debug!("Block {} abandoned on shutdown", height),
                    Err(e) => error!("Failed to publish block {}: {}", height, e),
                }
            });
        }

        info!("Sweeper stopping, {} blocks in flight", pool.in_flight());
        pool.drain().await;
        info!("Sweeper stopped after height {}", self.cursor);
    }
}

struct SweepUnit<C> {
    hub: Arc<Hub<C>>,
    claim_check: Arc<ClaimCheck>,
    proposers: ProposerCache,
    topic: String,
    retry_delay: Duration,
    shutdown: CancellationToken,
}

impl<C: ChainReader + 'static> SweepUnit<C> {
    /// Fetches and publishes one block. `Ok(false)` means shutdown came
    /// first and nothing was published.
    async fn sweep(self, height: i64) -> Result<bool, SweepError> {
        let hub = self.hub.as_ref();
        let fetched = retry_until_cancelled(
            &self.shutdown,
            self.retry_delay,
            &format!("fetch block {}", height),
            || hub.block(height),
        )
        .await;
        let Ok(block) = fetched else {
            return Ok(false);
        };

        let operator = self
            .proposers
            .operator_for(hub, &block.block.header.proposer_address)
            .await;
        let message = BlockMessage::from_block(&block, operator);
        let payload =
            serde_json::to_vec(&message).map_err(|source| SweepError::Encode { height, source })?;

        let published = self
            .claim_check
            .publish(OutboundMessage {
                topic: self.topic,
                key_prefix: BLOCK_KEY_PREFIX.to_string(),
                id: height.to_string(),
                object_path: height.to_string(),
                payload,
                headers: vec![Header::new(HEIGHT_HEADER, height.to_string())],
            })
            .await;

        match published {
            Ok(()) => Ok(true),
            Err(PublishError::Cancelled) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
