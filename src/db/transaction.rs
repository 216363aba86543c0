use crate::db::helpers::{bulk_insert, DbError, OnConflict, SqlValue};
use crate::models::{AccountTransaction, Transaction};
use sqlx::SqliteConnection;
use std::time::Duration;

const TRANSACTION_COLUMNS: &[&str] = &[
    "id",
    "hash",
    "block_height",
    "block_index",
    "gas_used",
    "gas_limit",
    "gas_fee",
    "err_msg",
    "success",
    "sender",
    "memo",
    "messages",
    "is_send",
    "is_ibc",
    "is_move_publish",
    "is_move_upgrade",
    "is_move_execute",
    "is_move_script",
    "is_nft_mint",
    "is_nft_burn",
    "is_nft_transfer",
    "is_opinit",
    "is_instantiate",
    "is_migrate",
    "is_update_admin",
    "is_clear_admin",
    "is_store_code",
];

fn transaction_row(tx: &Transaction) -> Vec<SqlValue> {
    let flags = &tx.flags;
    vec![
        tx.id.as_str().into(),
        tx.hash.as_str().into(),
        tx.block_height.into(),
        tx.block_index.into(),
        tx.gas_used.into(),
        tx.gas_limit.into(),
        tx.gas_fee.as_str().into(),
        tx.err_msg.clone().into(),
        tx.success.into(),
        tx.sender.as_str().into(),
        tx.memo.as_str().into(),
        tx.messages.as_str().into(),
        flags.is_send.into(),
        flags.is_ibc.into(),
        flags.is_move_publish.into(),
        flags.is_move_upgrade.into(),
        flags.is_move_execute.into(),
        flags.is_move_script.into(),
        flags.is_nft_mint.into(),
        flags.is_nft_burn.into(),
        flags.is_nft_transfer.into(),
        flags.is_opinit.into(),
        flags.is_instantiate.into(),
        flags.is_migrate.into(),
        flags.is_update_admin.into(),
        flags.is_clear_admin.into(),
        flags.is_store_code.into(),
    ]
}

/// Inserts transactions keyed by `HASH/height`; redelivered ones are skipped.
pub async fn insert_transactions(
    conn: &mut SqliteConnection,
    transactions: &[Transaction],
    timeout: Duration,
) -> Result<u64, DbError> {
    bulk_insert(
        conn,
        "transactions",
        TRANSACTION_COLUMNS,
        transactions.iter().map(transaction_row).collect(),
        OnConflict::DoNothing,
        timeout,
    )
    .await
}

pub async fn insert_account_transactions(
    conn: &mut SqliteConnection,
    relations: &[AccountTransaction],
    timeout: Duration,
) -> Result<u64, DbError> {
    bulk_insert(
        conn,
        "account_transactions",
        &["account_id", "transaction_id", "block_height", "is_signer"],
        relations
            .iter()
            .map(|r| -> Vec<SqlValue> {
                vec![
                    r.account_id.as_str().into(),
                    r.transaction_id.as_str().into(),
                    r.block_height.into(),
                    r.is_signer.into(),
                ]
            })
            .collect(),
        OnConflict::DoNothing,
        timeout,
    )
    .await
}
