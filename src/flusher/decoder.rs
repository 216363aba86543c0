//! Transaction decoding and classification.
//!
//! The wire format of a transaction belongs to the chain, so decoding sits
//! behind [`TxDecoder`]. [`decode_guarded`] is the single place a decoder is
//! invoked and turns a panic inside it into an ordinary [`DecodeError`].

use crate::models::TxFlags;
use serde::Deserialize;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Message fields that name the account authorizing a message, in the order
/// they are tried.
const SIGNER_FIELDS: &[&str] = &[
    "sender",
    "from_address",
    "signer",
    "creator",
    "authority",
    "delegator_address",
    "admin",
    "owner",
];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Transaction is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Malformed transaction: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Transaction has no signer")]
    MissingSigner,

    #[error("Transaction decoder panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTx {
    pub signer: String,
    pub memo: String,
    /// Fee coins joined as `<amount><denom>`, comma separated.
    pub fee: String,
    pub gas_limit: i64,
    pub messages: Vec<Value>,
}

impl DecodedTx {
    pub fn message_types(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().filter_map(message_type)
    }
}

pub trait TxDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx, DecodeError>;
}

/// Decodes the amino-JSON transaction encoding:
/// `{"body": {"messages": [...], "memo": ...}, "auth_info": {"fee": ...}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTxDecoder;

#[derive(Deserialize)]
struct JsonTx {
    body: JsonTxBody,
    #[serde(default)]
    auth_info: JsonAuthInfo,
}

#[derive(Deserialize)]
struct JsonTxBody {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    memo: String,
}

#[derive(Deserialize, Default)]
struct JsonAuthInfo {
    #[serde(default)]
    fee: JsonFee,
}

#[derive(Deserialize, Default)]
struct JsonFee {
    #[serde(default)]
    amount: Vec<Coin>,
    #[serde(default)]
    gas_limit: Value,
    #[serde(default)]
    payer: String,
}

#[derive(Deserialize)]
struct Coin {
    denom: String,
    amount: String,
}

impl TxDecoder for JsonTxDecoder {
    fn decode(&self, raw: &[u8]) -> Result<DecodedTx, DecodeError> {
        let tx: JsonTx = serde_json::from_slice(raw)?;

        let gas_limit = match &tx.auth_info.fee.gas_limit {
            Value::Null => 0,
            Value::Number(n) => n.as_i64().ok_or_else(|| DecodeError::InvalidField {
                field: "gas_limit",
                value: n.to_string(),
            })?,
            Value::String(s) => s.parse().map_err(|_| DecodeError::InvalidField {
                field: "gas_limit",
                value: s.clone(),
            })?,
            other => {
                return Err(DecodeError::InvalidField {
                    field: "gas_limit",
                    value: other.to_string(),
                })
            }
        };

        let fee = tx
            .auth_info
            .fee
            .amount
            .iter()
            .map(|coin| format!("{}{}", coin.amount, coin.denom))
            .collect::<Vec<_>>()
            .join(",");

        let signer = tx
            .body
            .messages
            .first()
            .and_then(message_signer)
            .or_else(|| Some(tx.auth_info.fee.payer.clone()).filter(|p| !p.is_empty()))
            .ok_or(DecodeError::MissingSigner)?;

        Ok(DecodedTx {
            signer,
            memo: tx.body.memo,
            fee,
            gas_limit,
            messages: tx.body.messages,
        })
    }
}

/// Runs `decoder` and converts a panic into [`DecodeError::Panicked`].
pub fn decode_guarded(decoder: &dyn TxDecoder, raw: &[u8]) -> Result<DecodedTx, DecodeError> {
    match catch_unwind(AssertUnwindSafe(|| decoder.decode(raw))) {
        Ok(result) => result,
        Err(payload) => Err(DecodeError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn message_type(message: &Value) -> Option<&str> {
    message.get("@type").and_then(Value::as_str)
}

fn message_signer(message: &Value) -> Option<String> {
    SIGNER_FIELDS
        .iter()
        .filter_map(|field| message.get(*field).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Derives the category flags of a transaction from its messages.
pub fn classify(messages: &[Value]) -> TxFlags {
    let mut flags = TxFlags::default();

    for message in messages {
        let Some(type_url) = message_type(message) else {
            continue;
        };

        match type_url {
            "/cosmos.bank.v1beta1.MsgSend" | "/cosmos.bank.v1beta1.MsgMultiSend" => {
                flags.is_send = true
            }
            "/initia.move.v1.MsgPublish" => flags.is_move_publish = true,
            "/initia.move.v1.MsgGovPublish" => flags.is_move_upgrade = true,
            "/initia.move.v1.MsgExecute"
            | "/initia.move.v1.MsgExecuteJSON"
            | "/initia.move.v1.MsgGovExecute"
            | "/initia.move.v1.MsgGovExecuteJSON" => {
                flags.is_move_execute = true;
                classify_nft(message, &mut flags);
            }
            "/initia.move.v1.MsgScript"
            | "/initia.move.v1.MsgScriptJSON"
            | "/initia.move.v1.MsgGovScript"
            | "/initia.move.v1.MsgGovScriptJSON" => flags.is_move_script = true,
            "/cosmwasm.wasm.v1.MsgInstantiateContract"
            | "/cosmwasm.wasm.v1.MsgInstantiateContract2" => flags.is_instantiate = true,
            "/cosmwasm.wasm.v1.MsgMigrateContract" => flags.is_migrate = true,
            "/cosmwasm.wasm.v1.MsgUpdateAdmin" => flags.is_update_admin = true,
            "/cosmwasm.wasm.v1.MsgClearAdmin" => flags.is_clear_admin = true,
            "/cosmwasm.wasm.v1.MsgStoreCode" => flags.is_store_code = true,
            url if url.starts_with("/ibc.") => flags.is_ibc = true,
            url if url.starts_with("/opinit.") => flags.is_opinit = true,
            _ => {}
        }
    }

    flags
}

// NFT operations are Move entry functions on an nft module.
fn classify_nft(message: &Value, flags: &mut TxFlags) {
    let module = message
        .get("module_name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !module.contains("nft") {
        return;
    }

    match message.get("function_name").and_then(Value::as_str) {
        Some("mint") => flags.is_nft_mint = true,
        Some("burn") => flags.is_nft_burn = true,
        Some("transfer") => flags.is_nft_transfer = true,
        _ => {}
    }
}
