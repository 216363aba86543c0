use crate::blockchain::models::BlockResultsResponse;
use crate::flusher::accounts::{account_transactions, AddressExtractor};
use crate::flusher::decoder::{classify, decode_guarded, DecodeError, TxDecoder};
use crate::flusher::FlushError;
use crate::models::{
    transaction_id, Account, AccountTransaction, BlockMessage, Transaction, TxResultMessage,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Everything one block contributes to the transaction tables.
#[derive(Debug, Default)]
pub struct BlockRows {
    pub transactions: Vec<Transaction>,
    pub accounts: Vec<Account>,
    pub account_transactions: Vec<AccountTransaction>,
    pub results: Vec<TxResultMessage>,
}

/// Uppercase hex SHA-256 of the raw transaction bytes.
pub fn tx_hash(raw: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(raw))
}

/// Decodes every transaction of `block` against its execution results.
/// Any malformed transaction fails the whole block as non-retryable.
pub fn build_rows(
    block: &BlockMessage,
    results: &BlockResultsResponse,
    decoder: &dyn TxDecoder,
    extractor: &AddressExtractor,
) -> Result<BlockRows, FlushError> {
    if block.txs.len() != results.txs_results.len() {
        return Err(FlushError::NonRetryable(format!(
            "block {} has {} transactions but {} results",
            block.height,
            block.txs.len(),
            results.txs_results.len()
        )));
    }

    let mut rows = BlockRows::default();

    for (index, (encoded, result)) in block.txs.iter().zip(&results.txs_results).enumerate() {
        let raw = STANDARD
            .decode(encoded.as_bytes())
            .map_err(DecodeError::from)?;
        let hash = tx_hash(&raw);
        let decoded = decode_guarded(decoder, &raw)?;

        let signer = extractor.account(&decoded.signer).map_err(|e| {
            FlushError::NonRetryable(format!("transaction {} signer: {}", hash, e))
        })?;
        let mentioned = extractor.scan_events(&result.events);

        let id = transaction_id(&hash, block.height);
        let gas_limit = if decoded.gas_limit > 0 {
            decoded.gas_limit
        } else {
            result.gas_wanted
        };
        let success = result.code == 0;
        let messages = serde_json::to_string(&decoded.messages).map_err(DecodeError::from)?;

        rows.account_transactions.extend(account_transactions(
            &signer,
            &mentioned,
            &id,
            block.height,
        ));

        rows.transactions.push(Transaction {
            id,
            hash: hash.clone(),
            block_height: block.height,
            block_index: index as i64,
            gas_used: result.gas_used,
            gas_limit,
            gas_fee: decoded.fee.clone(),
            success,
            err_msg: (!success).then(|| result.log.clone()),
            sender: signer.address.clone(),
            memo: decoded.memo.clone(),
            messages,
            flags: classify(&decoded.messages),
        });

        rows.accounts.push(signer);
        rows.accounts.extend(mentioned);

        rows.results.push(TxResultMessage {
            hash,
            height: block.height,
            index: index as i64,
            tx: encoded.clone(),
            result: result.clone(),
        });
    }

    Ok(rows)
}
