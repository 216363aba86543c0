//! Shared fixtures: a scriptable in-process chain and builders for the
//! payloads it serves.

use crate::blockchain::client::{ChainReader, ClientError};
use crate::blockchain::hub::Hub;
use crate::blockchain::models::{
    BlockResponse, BlockResultsResponse, BondedValidator, ConsensusPubkey, RestResponse,
    StatusResponse, TxResult, ValidatorsResponse,
};
use crate::blockchain::queries::BONDED_VALIDATORS_PATH;
use crate::flusher::decoder::JsonTxDecoder;
use crate::flusher::{Flusher, FlusherConfig};
use crate::messaging::{ClaimCheck, ClaimCheckConfig, DeadLetter, InMemoryBlobStore, InMemoryBroker};
use crate::validation::{bytes_to_bech32, consensus_address, ED25519_PUBKEY_TYPE};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const PREFIX: &str = "init";
pub const BLOCK_TOPIC: &str = "blocks";
pub const TX_TOPIC: &str = "transactions";

#[derive(Default)]
struct ChainState {
    /// `None` makes `status` fail.
    status_height: Option<i64>,
    blocks: HashMap<i64, BlockResponse>,
    block_results: HashMap<i64, BlockResultsResponse>,
    bonded: Vec<BondedValidator>,
    /// `(address, voting power)` of the CometBFT validator set.
    powers: Vec<(String, i64)>,
    /// REST answers for paths other than the bonded set.
    queries: HashMap<String, Value>,
    /// HTTP status the bonded set query is rejected with.
    bonded_status: Option<u16>,
    /// Reported instead of the real height by block reads.
    lag_to: Option<i64>,
    fail_reads: bool,
    delay: Option<Duration>,
    block_calls: usize,
    bonded_calls: usize,
}

/// A chain node served from memory. Clones share state, so a test can keep a
/// handle after giving one to a hub.
#[derive(Clone)]
pub struct FakeChain {
    name: String,
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn new(name: &str, status_height: i64) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(ChainState {
                status_height: Some(status_height),
                ..Default::default()
            })),
        }
    }

    /// A node that never answers.
    pub fn down(name: &str) -> Self {
        let chain = Self::new(name, 0);
        chain.with(|s| {
            s.status_height = None;
            s.fail_reads = true;
        });
        chain
    }

    fn with<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_status(&self, height: Option<i64>) {
        self.with(|s| s.status_height = height);
    }

    pub fn set_failing(&self, failing: bool) {
        self.with(|s| s.fail_reads = failing);
    }

    pub fn set_lag(&self, height: Option<i64>) {
        self.with(|s| s.lag_to = height);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.with(|s| s.delay = Some(delay));
    }

    pub fn add_block(&self, block: BlockResponse, results: BlockResultsResponse) {
        let height = block.block.header.height;
        self.with(|s| {
            s.blocks.insert(height, block);
            s.block_results.insert(height, results);
        });
    }

    pub fn set_bonded(&self, validators: Vec<BondedValidator>) {
        self.with(|s| s.bonded = validators);
    }

    pub fn set_powers(&self, powers: Vec<(String, i64)>) {
        self.with(|s| s.powers = powers);
    }

    pub fn reject_bonded(&self, status: u16) {
        self.with(|s| s.bonded_status = Some(status));
    }

    pub fn set_query(&self, path: &str, value: Value) {
        self.with(|s| s.queries.insert(path.to_string(), value));
    }

    pub fn block_calls(&self) -> usize {
        self.with(|s| s.block_calls)
    }

    pub fn bonded_calls(&self) -> usize {
        self.with(|s| s.bonded_calls)
    }

    async fn pause(&self) {
        if let Some(delay) = self.with(|s| s.delay) {
            tokio::time::sleep(delay).await;
        }
    }

    fn unavailable(&self, what: &str) -> ClientError {
        ClientError::Rpc {
            code: -32603,
            message: format!("{} unavailable on {}", what, self.name),
            data: String::new(),
        }
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.pause().await;
        let height = self
            .with(|s| s.status_height)
            .ok_or_else(|| self.unavailable("status"))?;
        Ok(serde_json::from_value(json!({
            "node_info": { "network": "testnet-1", "moniker": self.name },
            "sync_info": { "latest_block_height": height.to_string() },
        }))?)
    }

    async fn block(&self, height: i64) -> Result<BlockResponse, ClientError> {
        self.pause().await;
        let (block, lag) = self.with(|s| {
            s.block_calls += 1;
            if s.fail_reads {
                return (None, None);
            }
            (s.blocks.get(&height).cloned(), s.lag_to)
        });
        let mut block = block.ok_or_else(|| self.unavailable("block"))?;
        if let Some(lag) = lag {
            block.block.header.height = lag;
        }
        Ok(block)
    }

    async fn block_results(&self, height: i64) -> Result<BlockResultsResponse, ClientError> {
        self.pause().await;
        let (results, lag) = self.with(|s| {
            if s.fail_reads {
                return (None, None);
            }
            (s.block_results.get(&height).cloned(), s.lag_to)
        });
        let mut results = results.ok_or_else(|| self.unavailable("block_results"))?;
        if let Some(lag) = lag {
            results.height = lag;
        }
        Ok(results)
    }

    async fn validators(
        &self,
        height: i64,
        page: u32,
        per_page: u32,
    ) -> Result<ValidatorsResponse, ClientError> {
        let powers = self.with(|s| s.powers.clone());
        let start = (page.saturating_sub(1) * per_page) as usize;
        let validators: Vec<Value> = powers
            .iter()
            .skip(start)
            .take(per_page as usize)
            .map(|(address, power)| {
                json!({ "address": address, "voting_power": power.to_string(), "proposer_priority": "0" })
            })
            .collect();

        Ok(serde_json::from_value(json!({
            "block_height": height.to_string(),
            "count": validators.len().to_string(),
            "total": powers.len().to_string(),
            "validators": validators,
        }))?)
    }

    async fn rest_get(
        &self,
        path: &str,
        _query: &[(String, String)],
    ) -> Result<RestResponse, ClientError> {
        self.pause().await;
        let (answer, rejected, height, failing) = self.with(|s| {
            let (answer, rejected) = if path == BONDED_VALIDATORS_PATH {
                s.bonded_calls += 1;
                (
                    Some(json!({ "validators": s.bonded, "pagination": { "next_key": null } })),
                    s.bonded_status,
                )
            } else {
                (s.queries.get(path).cloned(), None)
            };
            (answer, rejected, s.status_height.unwrap_or_default(), s.fail_reads)
        });
        if failing {
            return Err(self.unavailable(path));
        }
        if let Some(status) = rejected {
            return Err(ClientError::Query {
                path: path.to_string(),
                status,
                message: "rejected".to_string(),
            });
        }
        let body = answer.ok_or_else(|| ClientError::Query {
            path: path.to_string(),
            status: 404,
            message: format!("unknown path {}", path),
        })?;

        Ok(RestResponse { height, body })
    }
}

pub fn hub_of(chains: &[FakeChain]) -> Arc<Hub<FakeChain>> {
    Arc::new(Hub::new(chains.to_vec(), Duration::from_millis(500)))
}

/// Bech32 account whose 20 bytes are all `seed`.
pub fn account_address(seed: u8) -> String {
    bytes_to_bech32(PREFIX, &[seed; 20]).unwrap()
}

pub fn operator_address(seed: u8) -> String {
    bytes_to_bech32("initvaloper", &[seed; 20]).unwrap()
}

pub fn consensus_pubkey(seed: u8) -> ConsensusPubkey {
    ConsensusPubkey {
        type_url: ED25519_PUBKEY_TYPE.to_string(),
        key: STANDARD.encode([seed; 32]),
    }
}

pub fn consensus_of(seed: u8) -> String {
    consensus_address(&consensus_pubkey(seed)).unwrap()
}

pub fn bonded_validator(seed: u8, voting_power: i64) -> BondedValidator {
    serde_json::from_value(json!({
        "operator_address": operator_address(seed),
        "consensus_pubkey": consensus_pubkey(seed),
        "description": { "moniker": format!("validator-{}", seed) },
        "voting_power": voting_power.to_string(),
        "jailed": false,
        "status": "BOND_STATUS_BONDED",
    }))
    .unwrap()
}

/// A JSON transaction signed by `signer` carrying `messages`.
pub fn raw_tx(signer: &str, messages: Vec<Value>) -> String {
    let messages: Vec<Value> = messages
        .into_iter()
        .map(|mut m| {
            m["sender"] = json!(signer);
            m
        })
        .collect();
    let tx = json!({
        "body": { "messages": messages, "memo": "test" },
        "auth_info": {
            "fee": { "amount": [{ "denom": "uinit", "amount": "1500" }], "gas_limit": "200000" },
        },
    });
    STANDARD.encode(serde_json::to_vec(&tx).unwrap())
}

pub fn send_msg(to: &str) -> Value {
    json!({
        "@type": "/cosmos.bank.v1beta1.MsgSend",
        "to_address": to,
        "amount": [{ "denom": "uinit", "amount": "10" }],
    })
}

/// Signature entry: `(consensus address, block_id_flag)`.
pub fn block_response(
    height: i64,
    proposer: &str,
    txs: Vec<String>,
    signatures: Option<Vec<(String, u8)>>,
) -> BlockResponse {
    let last_commit = signatures.map(|sigs| {
        let entries: Vec<Value> = sigs
            .into_iter()
            .map(|(address, flag)| {
                let signature = if flag == 1 { Value::Null } else { json!("c2ln") };
                json!({
                    "block_id_flag": flag,
                    "validator_address": address,
                    "timestamp": "2024-01-01T00:00:00Z",
                    "signature": signature,
                })
            })
            .collect();
        json!({ "height": (height - 1).to_string(), "round": 0, "signatures": entries })
    });

    serde_json::from_value(json!({
        "block_id": { "hash": format!("{:064X}", height) },
        "block": {
            "header": {
                "chain_id": "testnet-1",
                "height": height.to_string(),
                "time": "2024-01-01T00:00:00Z",
                "proposer_address": proposer,
            },
            "data": { "txs": txs },
            "last_commit": last_commit,
        },
    }))
    .unwrap()
}

pub fn tx_result(events: Value) -> TxResult {
    serde_json::from_value(json!({
        "code": 0,
        "log": "",
        "gas_wanted": "200000",
        "gas_used": "120000",
        "events": events,
    }))
    .unwrap()
}

pub fn block_results(height: i64, results: Vec<TxResult>) -> BlockResultsResponse {
    serde_json::from_value(json!({
        "height": height.to_string(),
        "txs_results": results,
    }))
    .unwrap()
}

pub struct Pipeline {
    pub pool: SqlitePool,
    pub broker: Arc<InMemoryBroker>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub claim_check: Arc<ClaimCheck>,
    pub shutdown: CancellationToken,
}

impl Pipeline {
    pub async fn new(threshold_bytes: usize) -> Self {
        Self::with_capacity(threshold_bytes, 1_000).await
    }

    pub async fn with_capacity(threshold_bytes: usize, queue_capacity: usize) -> Self {
        let pool = crate::db::connection::in_memory().await.unwrap();
        let broker = Arc::new(InMemoryBroker::new(queue_capacity, 1));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let shutdown = CancellationToken::new();
        let claim_check = Arc::new(ClaimCheck::new(
            broker.clone(),
            blobs.clone(),
            ClaimCheckConfig {
                threshold_bytes,
                retry_delay: Duration::from_millis(10),
            },
            shutdown.clone(),
        ));

        Self {
            pool,
            broker,
            blobs,
            claim_check,
            shutdown,
        }
    }

    pub fn flusher_config(&self) -> FlusherConfig {
        FlusherConfig {
            tx_topic: TX_TOPIC.to_string(),
            bech32_prefix: PREFIX.to_string(),
            rebalance_interval: 0,
            retry_delay: Duration::from_millis(10),
            db_timeout: Duration::from_secs(5),
            vote_count_window: 1_000,
            poll_timeout: Duration::from_millis(50),
        }
    }

    pub async fn flusher(&self, hub: Arc<Hub<FakeChain>>) -> Flusher<FakeChain> {
        Flusher::new(
            hub,
            self.pool.clone(),
            self.claim_check.clone(),
            DeadLetter::new(self.broker.clone(), self.shutdown.clone()),
            Arc::new(JsonTxDecoder),
            self.flusher_config(),
            self.shutdown.clone(),
        )
        .await
        .unwrap()
    }
}
