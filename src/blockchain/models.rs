//! CometBFT JSON-RPC and REST gateway response types.
//!
//! Heights and gas amounts are JSON strings on the wire; they are parsed into
//! integers here so the rest of the crate never sees the string form.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Responses that report the chain height they were served at.
pub trait Heighted {
    fn height(&self) -> i64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub moniker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncInfo {
    #[serde(deserialize_with = "de_i64")]
    pub latest_block_height: i64,
    #[serde(default)]
    pub latest_block_hash: String,
    #[serde(default)]
    pub latest_block_time: String,
    #[serde(default)]
    pub catching_up: bool,
}

impl Heighted for StatusResponse {
    fn height(&self) -> i64 {
        self.sync_info.latest_block_height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    pub block_id: BlockId,
    pub block: Block,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockId {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    #[serde(default)]
    pub data: BlockData,
    #[serde(default)]
    pub last_commit: Option<Commit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub chain_id: String,
    #[serde(deserialize_with = "de_i64")]
    pub height: i64,
    pub time: String,
    pub proposer_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockData {
    /// Base64 encoded raw transactions.
    #[serde(default, deserialize_with = "de_null_vec")]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    #[serde(deserialize_with = "de_i64")]
    pub height: i64,
    #[serde(default)]
    pub round: i64,
    #[serde(default, deserialize_with = "de_null_vec")]
    pub signatures: Vec<CommitSig>,
}

pub const BLOCK_ID_FLAG_ABSENT: u8 = 1;
pub const BLOCK_ID_FLAG_COMMIT: u8 = 2;
pub const BLOCK_ID_FLAG_NIL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSig {
    pub block_id_flag: u8,
    /// Uppercase hex consensus address; empty for absent validators.
    #[serde(default)]
    pub validator_address: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub signature: Option<String>,
}

impl Heighted for BlockResponse {
    fn height(&self) -> i64 {
        self.block.header.height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResultsResponse {
    #[serde(deserialize_with = "de_i64")]
    pub height: i64,
    #[serde(default, deserialize_with = "de_null_vec")]
    pub txs_results: Vec<TxResult>,
    #[serde(default, deserialize_with = "de_null_vec")]
    pub finalize_block_events: Vec<Event>,
}

impl Heighted for BlockResultsResponse {
    fn height(&self) -> i64 {
        self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub log: String,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub gas_wanted: i64,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub gas_used: i64,
    #[serde(default, deserialize_with = "de_null_vec")]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "de_null_vec")]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub index: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorsResponse {
    #[serde(deserialize_with = "de_i64")]
    pub block_height: i64,
    #[serde(default, deserialize_with = "de_null_vec")]
    pub validators: Vec<ValidatorPower>,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub count: i64,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub total: i64,
}

impl Heighted for ValidatorsResponse {
    fn height(&self) -> i64 {
        self.block_height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorPower {
    pub address: String,
    #[serde(deserialize_with = "de_i64")]
    pub voting_power: i64,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub proposer_priority: i64,
}

/// A JSON body served by the node's REST gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    /// From the `x-cosmos-block-height` header, 0 when the gateway omits it.
    pub height: i64,
    pub body: Value,
}

impl Heighted for RestResponse {
    fn height(&self) -> i64 {
        self.height
    }
}

/// A bonded validator as reported by the staking module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondedValidator {
    pub operator_address: String,
    pub consensus_pubkey: ConsensusPubkey,
    #[serde(default)]
    pub description: ValidatorDescription,
    #[serde(default, deserialize_with = "de_i64_or_zero")]
    pub voting_power: i64,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPubkey {
    #[serde(rename = "@type", default)]
    pub type_url: String,
    /// Base64 encoded public key bytes.
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorDescription {
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BondedValidatorsPage {
    #[serde(default, deserialize_with = "de_null_vec")]
    pub validators: Vec<BondedValidator>,
    #[serde(default)]
    pub pagination: Option<PageResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub next_key: Option<String>,
}

fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("integer out of range: {}", n))),
        other => Err(serde::de::Error::custom(format!("expected integer, got {}", other))),
    }
}

fn de_i64_or_zero<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("integer out of range: {}", n))),
        other => Err(serde::de::Error::custom(format!("expected integer, got {}", other))),
    }
}

fn de_null_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
