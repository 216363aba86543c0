//! Finds the accounts a transaction touches.

use crate::blockchain::models::Event;
use crate::models::{Account, AccountTransaction};
use crate::validation::{bytes_to_bech32, hex_to_account_bytes, validate_account_address, ValidationError};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

const BECH32_CHARSET: &str = "[02-9ac-hj-np-z]";

/// Greps event attribute values for bech32 and hex account addresses.
pub struct AddressExtractor {
    prefix: String,
    bech32: Regex,
    hex: Regex,
}

impl AddressExtractor {
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        // 20-byte accounts encode to 38 data+checksum characters, 32-byte
        // ones to 58.
        let bech32 = Regex::new(&format!(
            r"\b{}1{cs}{{38}}(?:{cs}{{20}})?\b",
            regex::escape(prefix),
            cs = BECH32_CHARSET
        ))?;
        let hex = Regex::new(r"\b0x(?:[0-9a-fA-F]{64}|[0-9a-fA-F]{40})\b")?;

        Ok(Self {
            prefix: prefix.to_string(),
            bech32,
            hex,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Validated bech32 account for a signer address.
    pub fn account(&self, address: &str) -> Result<Account, ValidationError> {
        let vm_address = validate_account_address(address, &self.prefix)?;
        Ok(Account {
            address: address.to_string(),
            vm_address,
        })
    }

    /// Every account mentioned in `text`. Hex addresses are converted to the
    /// bech32 form; candidates that fail validation are skipped.
    pub fn scan(&self, text: &str) -> Vec<Account> {
        let mut accounts = Vec::new();

        for found in self.bech32.find_iter(text) {
            match self.account(found.as_str()) {
                Ok(account) => accounts.push(account),
                Err(e) => debug!("Ignoring {}: {}", found.as_str(), e),
            }
        }

        for found in self.hex.find_iter(text) {
            let converted = hex_to_account_bytes(found.as_str())
                .and_then(|bytes| bytes_to_bech32(&self.prefix, &bytes))
                .and_then(|address| self.account(&address));
            match converted {
                Ok(account) => accounts.push(account),
                Err(e) => debug!("Ignoring {}: {}", found.as_str(), e),
            }
        }

        accounts
    }

    pub fn scan_events(&self, events: &[Event]) -> Vec<Account> {
        events
            .iter()
            .flat_map(|event| event.attributes.iter())
            .flat_map(|attribute| self.scan(&attribute.value))
            .collect()
    }
}

/// One row per account, the signer first and flagged. An account that is
/// both signer and mentioned keeps `is_signer = true`.
pub fn account_transactions(
    signer: &Account,
    mentioned: &[Account],
    transaction_id: &str,
    block_height: i64,
) -> Vec<AccountTransaction> {
    let mut involved: BTreeMap<&str, bool> = BTreeMap::new();
    involved.insert(signer.address.as_str(), true);
    for account in mentioned {
        involved.entry(account.address.as_str()).or_insert(false);
    }

    involved
        .into_iter()
        .map(|(account_id, is_signer)| AccountTransaction {
            account_id: account_id.to_string(),
            transaction_id: transaction_id.to_string(),
            block_height,
            is_signer,
        })
        .collect()
}
