// Configuration for the ingestion pipeline:
// - RPC endpoints and their REST gateways (JSON list or comma separated URLs)
// - Database connection string and per-call timeout
// - Queue topics, consumer group and claim-check threshold
// - Sweeper/flusher tuning (workers, rebalance interval, start height)

use crate::blockchain::client::Endpoint;
use dotenv::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("RPC_ENDPOINTS must list at least one endpoint")]
    MissingEndpoints,

    #[error("RPC_ENDPOINTS must give at least one endpoint a REST gateway URL")]
    MissingRestEndpoint,

    #[error("Invalid RPC_ENDPOINTS value: {0}")]
    InvalidEndpoints(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_timeout: Duration,
    pub rpc_endpoints: Vec<Endpoint>,
    pub rpc_timeout: Duration,
    pub rpc_rate_limit: Option<u32>,
    pub block_topic: String,
    pub tx_topic: String,
    pub consumer_group: String,
    pub claim_check_threshold_bytes: usize,
    pub blob_root: PathBuf,
    pub queue_capacity: usize,
    pub queue_partitions: usize,
    pub num_workers: usize,
    pub rebalance_interval: i64,
    pub start_height: i64,
    pub bech32_prefix: String,
    pub retry_delay: Duration,
    pub vote_count_window: i64,
    pub validator_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let rpc_endpoints = parse_endpoints(&env::var("RPC_ENDPOINTS").unwrap_or_default())?;

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:indexer.db".to_string());
        let db_timeout = Duration::from_secs(parse_var("DB_TIMEOUT_SECS", 30)?);
        let rpc_timeout = Duration::from_secs(parse_var("RPC_TIMEOUT_SECS", 10)?);
        let rpc_rate_limit = env::var("RPC_RATE_LIMIT")
            .map(|v| v.parse().ok())
            .unwrap_or(None);
        let block_topic = env::var("BLOCK_TOPIC").unwrap_or_else(|_| "blocks".to_string());
        let tx_topic = env::var("TX_TOPIC").unwrap_or_else(|_| "transactions".to_string());
        let consumer_group =
            env::var("CONSUMER_GROUP").unwrap_or_else(|_| "flusher".to_string());
        let blob_root = env::var("BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("claim-check"));
        let bech32_prefix = env::var("BECH32_PREFIX").unwrap_or_else(|_| "init".to_string());

        Ok(Self {
            database_url,
            db_timeout,
            rpc_endpoints,
            rpc_timeout,
            rpc_rate_limit,
            block_topic,
            tx_topic,
            consumer_group,
            // Most brokers reject messages above 1 MiB by default
            claim_check_threshold_bytes: parse_var("CLAIM_CHECK_THRESHOLD_BYTES", 1_000_000)?,
            blob_root,
            queue_capacity: parse_var("QUEUE_CAPACITY", 10_000)?,
            queue_partitions: parse_var("QUEUE_PARTITIONS", 1)?,
            num_workers: parse_var("NUM_WORKERS", num_cpus::get())?,
            rebalance_interval: parse_var("REBALANCE_INTERVAL", 100)?,
            start_height: parse_var("START_HEIGHT", 1)?,
            bech32_prefix,
            retry_delay: Duration::from_millis(parse_var("RETRY_DELAY_MS", 1_000)?),
            vote_count_window: parse_var("VOTE_COUNT_WINDOW", 10_000)?,
            validator_cache_ttl: Duration::from_secs(parse_var("VALIDATOR_CACHE_TTL_SECS", 600)?),
        })
    }
}

/// Accepts either a JSON array of `{"url": ..., "rest_url": ..., "headers": {...}}`
/// objects or a comma separated list of `rpc_url|rest_url` entries, where the
/// REST half is optional.
pub fn parse_endpoints(raw: &str) -> Result<Vec<Endpoint>, ConfigError> {
    let raw = raw.trim();
    let endpoints: Vec<Endpoint> = if raw.starts_with('[') {
        serde_json::from_str(raw)?
    } else {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('|') {
                Some((rpc, rest)) if !rest.trim().is_empty() => {
                    Endpoint::new(rpc.trim()).with_rest(rest.trim())
                }
                Some((rpc, _)) => Endpoint::new(rpc.trim()),
                None => Endpoint::new(entry),
            })
            .collect()
    };

    if endpoints.is_empty() {
        return Err(ConfigError::MissingEndpoints);
    }
    if endpoints.iter().all(|e| e.rest_url.is_none()) {
        return Err(ConfigError::MissingRestEndpoint);
    }
    Ok(endpoints)
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}
