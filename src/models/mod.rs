// Queue payloads published between the stages and the rows the flusher
// writes.

use crate::blockchain::models::{BlockResponse, Commit, TxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BLOCK_KEY_PREFIX: &str = "NEW_BLOCK_";
pub const TX_KEY_PREFIX: &str = "NEW_TRANSACTION_";
pub const HEIGHT_HEADER: &str = "height";
pub const TX_HASH_HEADER: &str = "tx_hash";

/// What the sweeper publishes for every block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub height: i64,
    pub hash: String,
    pub proposer_consensus_address: String,
    #[serde(default)]
    pub proposer_operator_address: Option<String>,
    pub timestamp: String,
    /// Missing in messages produced before votes were tracked.
    #[serde(default)]
    pub last_commit: Option<Commit>,
    /// Base64 raw transactions in block order.
    #[serde(default)]
    pub txs: Vec<String>,
}

impl BlockMessage {
    pub fn from_block(response: &BlockResponse, proposer_operator_address: Option<String>) -> Self {
        let header = &response.block.header;
        Self {
            height: header.height,
            hash: response.block_id.hash.clone(),
            proposer_consensus_address: header.proposer_address.clone(),
            proposer_operator_address,
            timestamp: header.time.clone(),
            last_commit: response.block.last_commit.clone(),
            txs: response.block.data.txs.clone(),
        }
    }
}

/// What the flusher publishes for every transaction once its block is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResultMessage {
    pub hash: String,
    pub height: i64,
    pub index: i64,
    /// Base64 raw transaction.
    pub tx: String,
    pub result: TxResult,
}

/// Category flags derived from a transaction's message types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxFlags {
    pub is_send: bool,
    pub is_ibc: bool,
    pub is_move_publish: bool,
    pub is_move_upgrade: bool,
    pub is_move_execute: bool,
    pub is_move_script: bool,
    pub is_nft_mint: bool,
    pub is_nft_burn: bool,
    pub is_nft_transfer: bool,
    pub is_opinit: bool,
    pub is_instantiate: bool,
    pub is_migrate: bool,
    pub is_update_admin: bool,
    pub is_clear_admin: bool,
    pub is_store_code: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// `HASH/height`, unique across the table.
    pub id: String,
    pub hash: String,
    pub block_height: i64,
    pub block_index: i64,
    pub gas_used: i64,
    pub gas_limit: i64,
    pub gas_fee: String,
    pub success: bool,
    pub err_msg: Option<String>,
    pub sender: String,
    pub memo: String,
    /// Decoded messages as a JSON array.
    pub messages: String,
    pub flags: TxFlags,
}

pub fn transaction_id(hash: &str, height: i64) -> String {
    format!("{}/{}", hash, height)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub account_id: String,
    pub transaction_id: String,
    pub block_height: i64,
    pub is_signer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub vm_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub operator_address: String,
    pub account_id: String,
    pub consensus_address: String,
    pub moniker: String,
    pub voting_power: i64,
    pub jailed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Propose,
    Vote,
    Absent,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Propose => "PROPOSE",
            Vote::Vote => "VOTE",
            Vote::Absent => "ABSENT",
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vote {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROPOSE" => Ok(Vote::Propose),
            "VOTE" => Ok(Vote::Vote),
            "ABSENT" => Ok(Vote::Absent),
            other => Err(format!("unknown vote kind {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorCommitSignature {
    pub validator_address: String,
    pub block_height: i64,
    pub vote: Vote,
}
