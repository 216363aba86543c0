//! Proposer consensus address to operator address lookups for the sweeper.

use crate::blockchain::client::ChainReader;
use crate::blockchain::queries::bonded_validators;
use crate::validation::consensus_address;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ProposerCache {
    cache: Cache<String, String>,
    refresh: Arc<Mutex<()>>,
}

impl ProposerCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            refresh: Arc::new(Mutex::new(())),
        }
    }

    pub async fn insert(&self, consensus: &str, operator: &str) {
        self.cache
            .insert(consensus.to_uppercase(), operator.to_string())
            .await;
    }

    /// Operator address for `consensus`, reloading the bonded set on a miss.
    /// Returns `None` when the validator is unknown or the reload fails.
    pub async fn operator_for<R>(&self, reader: &R, consensus: &str) -> Option<String>
    where
        R: ChainReader + ?Sized,
    {
        let key = consensus.to_uppercase();
        if let Some(operator) = self.cache.get(&key).await {
            return Some(operator);
        }

        // One reload at a time; whoever waited re-checks first.
        let _guard = self.refresh.lock().await;
        if let Some(operator) = self.cache.get(&key).await {
            return Some(operator);
        }

        match bonded_validators(reader).await {
            Ok(validators) => {
                for validator in validators {
                    match consensus_address(&validator.consensus_pubkey) {
                        Ok(address) => self.cache.insert(address, validator.operator_address).await,
                        Err(e) => debug!("Skipping {}: {}", validator.operator_address, e),
                    }
                }
            }
            Err(e) => warn!("Failed to reload bonded validators: {}", e),
        }

        self.cache.get(&key).await
    }
}
