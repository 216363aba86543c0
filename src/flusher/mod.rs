//! The consumer stage: turns published blocks into rows.
//!
//! Messages are handled strictly one at a time and the offset is committed
//! only once a block is stored or dead-lettered. Block rows and vote rows are
//! written in two separate database transactions, each retried on its own
//! until it commits or fails with a non-retryable error.

pub mod accounts;
pub mod decoder;
pub mod processor;
pub mod votes;

use crate::blockchain::client::{ChainReader, ClientError, RpcClient};
use crate::blockchain::hub::Hub;
use crate::blockchain::queries::bonded_validators;
use crate::cache::ValidatorRelations;
use crate::config::Config;
use crate::db::account::insert_accounts;
use crate::db::block::insert_block;
use crate::db::transaction::{insert_account_transactions, insert_transactions};
use crate::db::validator::{
    insert_commit_signatures, insert_historical_powers, load_validators, refresh_vote_counts,
    upsert_validators,
};
use crate::db::DbError;
use crate::messaging::claim_check::{ClaimCheck, OutboundMessage, PublishError, ResolveError};
use crate::messaging::{Consumer, DeadLetter, Header, Message};
use crate::models::{
    Account, BlockMessage, TxResultMessage, Validator, HEIGHT_HEADER, TX_HASH_HEADER,
    TX_KEY_PREFIX,
};
use crate::retry::{retry_while, RetryError};
use crate::validation::{consensus_address, convert_prefix, validate_account_address};
use accounts::AddressExtractor;
use decoder::{DecodeError, TxDecoder};
use processor::build_rows;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use votes::{derive_votes, referenced_consensus_addresses};

#[derive(Error, Debug)]
pub enum FlushError {
    #[error("Non-retryable: {0}")]
    NonRetryable(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Invalid flusher configuration: {0}")]
    InvalidConfig(String),
}

impl FlushError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FlushError::NonRetryable(_) | FlushError::InvalidConfig(_) => false,
            FlushError::Database(e) => e.is_retryable(),
            FlushError::Client(e) => e.is_retryable(),
        }
    }
}

impl From<DecodeError> for FlushError {
    fn from(err: DecodeError) -> Self {
        FlushError::NonRetryable(err.to_string())
    }
}

impl From<sqlx::Error> for FlushError {
    fn from(err: sqlx::Error) -> Self {
        FlushError::Database(DbError::Sqlx(err))
    }
}

#[derive(Debug, Clone)]
pub struct FlusherConfig {
    pub tx_topic: String,
    pub bech32_prefix: String,
    /// Rebalance the hub on heights divisible by this; 0 disables it.
    pub rebalance_interval: i64,
    pub retry_delay: Duration,
    pub db_timeout: Duration,
    /// Vote tallies cover this many trailing heights.
    pub vote_count_window: i64,
    pub poll_timeout: Duration,
}

impl From<&Config> for FlusherConfig {
    fn from(config: &Config) -> Self {
        Self {
            tx_topic: config.tx_topic.clone(),
            bech32_prefix: config.bech32_prefix.clone(),
            rebalance_interval: config.rebalance_interval,
            retry_delay: config.retry_delay,
            db_timeout: config.db_timeout,
            vote_count_window: config.vote_count_window,
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// How handling one message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stored,
    DeadLettered,
    /// Shutdown interrupted the message; its offset must not be committed.
    Cancelled,
}

pub struct Flusher<C = RpcClient> {
    hub: Arc<Hub<C>>,
    pool: SqlitePool,
    claim_check: Arc<ClaimCheck>,
    dlq: DeadLetter,
    decoder: Arc<dyn TxDecoder>,
    extractor: AddressExtractor,
    validators: ValidatorRelations,
    config: FlusherConfig,
    shutdown: CancellationToken,
}

impl<C: ChainReader + 'static> Flusher<C> {
    /// Rebalances the hub and loads known validators. Fails when no RPC
    /// endpoint answers.
    pub async fn new(
        hub: Arc<Hub<C>>,
        pool: SqlitePool,
        claim_check: Arc<ClaimCheck>,
        dlq: DeadLetter,
        decoder: Arc<dyn TxDecoder>,
        config: FlusherConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, FlushError> {
        hub.rebalance().await?;

        let extractor = AddressExtractor::new(&config.bech32_prefix)
            .map_err(|e| FlushError::InvalidConfig(e.to_string()))?;
        let known = load_validators(&pool, config.db_timeout).await?;
        info!("Flusher starting with {} known validators", known.len());

        Ok(Self {
            hub,
            pool,
            claim_check,
            dlq,
            decoder,
            extractor,
            validators: ValidatorRelations::from_validators(known),
            config,
            shutdown,
        })
    }

    pub fn validators(&self) -> &ValidatorRelations {
        &self.validators
    }

    /// Consumes until shutdown. Each message is committed after it is
    /// stored or dead-lettered.
    pub async fn run<K: Consumer + ?Sized>(&mut self, consumer: &mut K) {
        info!("Flusher started");

        loop {
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = consumer.poll(self.config.poll_timeout) => polled,
            };

            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to poll block messages: {}", e);
                    tokio::time::sleep(self.config.retry_delay).await;
                    continue;
                }
            };

            match self.handle(&message).await {
                Outcome::Cancelled => break,
                Outcome::Stored | Outcome::DeadLettered => {
                    if let Err(e) = consumer.commit(&message).await {
                        error!("Failed to commit offset {}: {}", message.offset, e);
                    }
                }
            }
        }

        info!("Flusher stopped");
    }

    /// Processes one consumed message to a terminal decision.
    pub async fn handle(&mut self, message: &Message) -> Outcome {
        let payload = match self.claim_check.resolve(message).await {
            Ok(payload) => payload,
            Err(ResolveError::Cancelled) => return Outcome::Cancelled,
            Err(e @ ResolveError::Malformed(_)) => {
                return self.dead_letter(message, &e.to_string()).await
            }
        };

        let block: BlockMessage = match serde_json::from_slice(&payload) {
            Ok(block) => block,
            Err(e) => {
                return self
                    .dead_letter(message, &format!("Malformed block message: {}", e))
                    .await
            }
        };

        if self.config.rebalance_interval > 0 && block.height % self.config.rebalance_interval == 0
        {
            if let Err(e) = self.hub.rebalance().await {
                warn!("Rebalance at height {} failed: {}", block.height, e);
            }
        }

        let this = &*self;
        let block = &block;
        let stored = retry_while(
            &this.shutdown,
            this.config.retry_delay,
            &format!("flush block {}", block.height),
            move || this.process_block(block),
            FlushError::is_retryable,
        )
        .await;
        let results = match stored {
            Ok(results) => results,
            Err(RetryError::Cancelled) => return Outcome::Cancelled,
            Err(RetryError::Permanent(e)) => return self.dead_letter(message, &e.to_string()).await,
        };

        let this = &*self;
        let voted = retry_while(
            &this.shutdown,
            this.config.retry_delay,
            &format!("flush votes {}", block.height),
            move || this.process_votes(block),
            FlushError::is_retryable,
        )
        .await;
        match voted {
            Ok(Some(refreshed)) => self.validators = refreshed,
            Ok(None) => {}
            Err(RetryError::Cancelled) => return Outcome::Cancelled,
            Err(RetryError::Permanent(e)) => return self.dead_letter(message, &e.to_string()).await,
        }

        if let Err(PublishError::Cancelled) = self.publish_results(results).await {
            return Outcome::Cancelled;
        }

        debug!("Flushed block {}", block.height);
        Outcome::Stored
    }

    /// Stores the block, its transactions and their accounts in one database
    /// transaction. Returns the per-transaction results to publish.
    pub async fn process_block(
        &self,
        block: &BlockMessage,
    ) -> Result<Vec<TxResultMessage>, FlushError> {
        let timeout = self.config.db_timeout;
        let mut tx = self.pool.begin().await?;

        insert_block(&mut tx, block, timeout).await?;

        let results = self.hub.block_results(block.height).await?;
        let rows = build_rows(block, &results, self.decoder.as_ref(), &self.extractor)?;

        insert_accounts(&mut tx, &rows.accounts, timeout).await?;
        insert_transactions(&mut tx, &rows.transactions, timeout).await?;
        insert_account_transactions(&mut tx, &rows.account_transactions, timeout).await?;

        tx.commit().await?;
        debug!(
            "Stored block {} with {} transactions",
            block.height,
            rows.transactions.len()
        );

        Ok(rows.results)
    }

    /// Stores the commit votes of `block` and refreshes vote tallies. When an
    /// unknown consensus address shows up the bonded set is reloaded inside
    /// the same database transaction; the reloaded relations are returned
    /// for the caller to adopt after the commit.
    pub async fn process_votes(
        &self,
        block: &BlockMessage,
    ) -> Result<Option<ValidatorRelations>, FlushError> {
        if block.last_commit.is_none() {
            debug!("Block {} carries no last commit, skipping votes", block.height);
            return Ok(None);
        }

        let timeout = self.config.db_timeout;
        let mut tx = self.pool.begin().await?;

        let unknown = self
            .validators
            .unknown(referenced_consensus_addresses(block));
        let refreshed = if unknown.is_empty() {
            None
        } else {
            info!(
                "Block {} references {} unknown validators, reloading bonded set",
                block.height,
                unknown.len()
            );
            Some(self.reload_validators(&mut tx, block.height).await?)
        };
        let relations = refreshed.as_ref().unwrap_or(&self.validators);

        let votes = derive_votes(block, relations);
        insert_commit_signatures(&mut tx, &votes, timeout).await?;

        let touched: Vec<String> = votes.iter().map(|v| v.validator_address.clone()).collect();
        let from_height = block.height - self.config.vote_count_window;
        refresh_vote_counts(&mut tx, &touched, from_height, timeout).await?;

        tx.commit().await?;
        Ok(refreshed)
    }

    async fn reload_validators(
        &self,
        conn: &mut SqliteConnection,
        height: i64,
    ) -> Result<ValidatorRelations, FlushError> {
        let prefix = &self.config.bech32_prefix;
        let bonded = bonded_validators(self.hub.as_ref()).await?;

        let mut accounts = Vec::with_capacity(bonded.len());
        let mut validators = Vec::with_capacity(bonded.len());

        for validator in bonded {
            let consensus = match consensus_address(&validator.consensus_pubkey) {
                Ok(address) => address,
                Err(e) => {
                    warn!("Skipping validator {}: {}", validator.operator_address, e);
                    continue;
                }
            };
            let account = match convert_prefix(&validator.operator_address, prefix)
                .and_then(|address| {
                    validate_account_address(&address, prefix).map(|vm| (address, vm))
                }) {
                Ok((address, vm_address)) => Account {
                    address,
                    vm_address,
                },
                Err(e) => {
                    warn!("Skipping validator {}: {}", validator.operator_address, e);
                    continue;
                }
            };

            validators.push(Validator {
                operator_address: validator.operator_address,
                account_id: account.address.clone(),
                consensus_address: consensus,
                moniker: validator.description.moniker,
                voting_power: validator.voting_power,
                jailed: validator.jailed,
            });
            accounts.push(account);
        }

        insert_accounts(conn, &accounts, self.config.db_timeout).await?;
        upsert_validators(conn, &validators, self.config.db_timeout).await?;
        insert_historical_powers(conn, &validators, height, self.config.db_timeout).await?;

        // Validators that left the bonded set stay resolvable for old
        // signatures.
        let retired: Vec<Validator> = self
            .validators
            .validators()
            .filter(|known| {
                !validators
                    .iter()
                    .any(|v| v.operator_address == known.operator_address)
            })
            .cloned()
            .collect();

        Ok(ValidatorRelations::from_validators(
            retired.into_iter().chain(validators),
        ))
    }

    async fn publish_results(&self, results: Vec<TxResultMessage>) -> Result<(), PublishError> {
        for result in results {
            let payload = match serde_json::to_vec(&result) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to encode result of {}: {}", result.hash, e);
                    continue;
                }
            };

            let message = OutboundMessage {
                topic: self.config.tx_topic.clone(),
                key_prefix: TX_KEY_PREFIX.to_string(),
                id: result.hash.clone(),
                object_path: format!("{}/{}", result.hash, result.height),
                payload,
                headers: vec![
                    Header::new(HEIGHT_HEADER, result.height.to_string()),
                    Header::new(TX_HASH_HEADER, result.hash.clone()),
                ],
            };

            match self.claim_check.publish(message).await {
                Ok(()) => {}
                Err(PublishError::Cancelled) => return Err(PublishError::Cancelled),
                Err(e) => error!("Failed to publish result of {}: {}", result.hash, e),
            }
        }
        Ok(())
    }

    async fn dead_letter(&self, message: &Message, reason: &str) -> Outcome {
        if let Err(e) = self.dlq.send(message, reason).await {
            error!("Failed to dead-letter offset {}: {}", message.offset, e);
        }
        Outcome::DeadLettered
    }
}
