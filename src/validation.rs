use crate::blockchain::models::ConsensusPubkey;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bech32::{Bech32, Hrp};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ED25519_PUBKEY_TYPE: &str = "/cosmos.crypto.ed25519.PubKey";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid bech32 address: {0}")]
    InvalidBech32(String),

    #[error("Address {address} has prefix {found}, expected {expected}")]
    WrongPrefix {
        address: String,
        found: String,
        expected: String,
    },

    #[error("Invalid hex address: {0}")]
    InvalidHex(String),

    #[error("Unsupported address length {len} for {address}")]
    InvalidLength { address: String, len: usize },

    #[error("Unsupported consensus key type {0}")]
    UnsupportedKeyType(String),

    #[error("Invalid consensus key: {0}")]
    InvalidKey(String),
}

/// Decodes a bech32 address and checks its human readable prefix.
pub fn bech32_to_bytes(address: &str, expected_prefix: &str) -> Result<Vec<u8>, ValidationError> {
    let (hrp, data) =
        bech32::decode(address).map_err(|_| ValidationError::InvalidBech32(address.to_string()))?;

    let found = hrp.to_string();
    if found != expected_prefix {
        return Err(ValidationError::WrongPrefix {
            address: address.to_string(),
            found,
            expected: expected_prefix.to_string(),
        });
    }
    Ok(data)
}

pub fn bytes_to_bech32(prefix: &str, bytes: &[u8]) -> Result<String, ValidationError> {
    let hrp = Hrp::parse(prefix).map_err(|_| ValidationError::InvalidBech32(prefix.to_string()))?;
    bech32::encode::<Bech32>(hrp, bytes)
        .map_err(|_| ValidationError::InvalidBech32(hex::encode(bytes)))
}

/// Re-encodes an address under another prefix, e.g. a validator operator
/// address into the matching account address.
pub fn convert_prefix(address: &str, to_prefix: &str) -> Result<String, ValidationError> {
    let (_, data) =
        bech32::decode(address).map_err(|_| ValidationError::InvalidBech32(address.to_string()))?;
    bytes_to_bech32(to_prefix, &data)
}

/// Account bytes of a `0x` hex address. Accepts 20-byte addresses and
/// 32-byte addresses whose first 12 bytes are zero.
pub fn hex_to_account_bytes(address: &str) -> Result<Vec<u8>, ValidationError> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    let bytes = hex::decode(digits).map_err(|_| ValidationError::InvalidHex(address.to_string()))?;

    match bytes.len() {
        20 => Ok(bytes),
        32 if bytes[..12].iter().all(|b| *b == 0) => Ok(bytes[12..].to_vec()),
        len => Err(ValidationError::InvalidLength {
            address: address.to_string(),
            len,
        }),
    }
}

/// The Move VM form of an account: `0x` followed by the account bytes
/// left-padded to 32 bytes.
pub fn vm_address(account_bytes: &[u8]) -> String {
    let mut padded = vec![0u8; 32usize.saturating_sub(account_bytes.len())];
    padded.extend_from_slice(account_bytes);
    format!("0x{}", hex::encode(padded))
}

/// Validates a bech32 account address and returns its VM address.
pub fn validate_account_address(address: &str, prefix: &str) -> Result<String, ValidationError> {
    let bytes = bech32_to_bytes(address, prefix)?;
    match bytes.len() {
        20 | 32 => Ok(vm_address(&bytes)),
        len => Err(ValidationError::InvalidLength {
            address: address.to_string(),
            len,
        }),
    }
}

/// Uppercase hex consensus address of an ed25519 validator key: the first 20
/// bytes of the key's SHA-256.
pub fn consensus_address(pubkey: &ConsensusPubkey) -> Result<String, ValidationError> {
    if !pubkey.type_url.is_empty() && pubkey.type_url != ED25519_PUBKEY_TYPE {
        return Err(ValidationError::UnsupportedKeyType(pubkey.type_url.clone()));
    }

    let key = STANDARD
        .decode(pubkey.key.as_bytes())
        .map_err(|e| ValidationError::InvalidKey(e.to_string()))?;
    if key.len() != 32 {
        return Err(ValidationError::InvalidKey(format!(
            "ed25519 key must be 32 bytes, got {}",
            key.len()
        )));
    }

    let digest = Sha256::digest(&key);
    Ok(hex::encode_upper(&digest[..20]))
}
