use crate::db::helpers::{bulk_insert, with_timeout, DbError, OnConflict, SqlValue};
use crate::models::BlockMessage;
use sqlx::{Executor, Sqlite, SqliteConnection};
use std::time::Duration;

/// Inserts the block row; a block that is already stored is left untouched.
pub async fn insert_block(
    conn: &mut SqliteConnection,
    block: &BlockMessage,
    timeout: Duration,
) -> Result<u64, DbError> {
    let proposer = block
        .proposer_operator_address
        .clone()
        .unwrap_or_else(|| block.proposer_consensus_address.clone());

    bulk_insert(
        conn,
        "blocks",
        &["height", "hash", "proposer", "timestamp"],
        vec![vec![
            SqlValue::from(block.height),
            SqlValue::from(block.hash.as_str()),
            SqlValue::from(proposer),
            SqlValue::from(block.timestamp.as_str()),
        ]],
        OnConflict::DoNothing,
        timeout,
    )
    .await
}

/// Top of the unbroken run of stored heights starting at `start_height`,
/// or `start_height - 1` when `start_height` itself is missing. Heights
/// stored above a gap do not count.
pub async fn resume_height<'e, E>(
    executor: E,
    start_height: i64,
    timeout: Duration,
) -> Result<i64, DbError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let top = with_timeout(
        "blocks resume height",
        timeout,
        sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT MIN(b.height) FROM blocks b
            WHERE b.height >= ?1
              AND EXISTS (SELECT 1 FROM blocks WHERE height = ?1)
              AND NOT EXISTS (SELECT 1 FROM blocks n WHERE n.height = b.height + 1)
            "#,
        )
        .bind(start_height)
        .fetch_one(executor),
    )
    .await?;

    Ok(top.unwrap_or(start_height - 1))
}
