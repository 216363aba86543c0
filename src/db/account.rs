use crate::db::helpers::{bulk_insert, DbError, OnConflict, SqlValue};
use crate::models::Account;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::time::Duration;

/// Creates any account (and its VM address) that does not exist yet.
/// Existing rows are never modified.
pub async fn insert_accounts(
    conn: &mut SqliteConnection,
    accounts: &[Account],
    timeout: Duration,
) -> Result<(), DbError> {
    if accounts.is_empty() {
        return Ok(());
    }

    let unique: BTreeMap<&str, &str> = accounts
        .iter()
        .map(|a| (a.address.as_str(), a.vm_address.as_str()))
        .collect();

    let mut vm_addresses: Vec<&str> = unique.values().copied().collect();
    vm_addresses.sort_unstable();
    vm_addresses.dedup();

    bulk_insert(
        conn,
        "vm_addresses",
        &["vm_address"],
        vm_addresses
            .into_iter()
            .map(|vm| vec![SqlValue::from(vm)])
            .collect(),
        OnConflict::DoNothing,
        timeout,
    )
    .await?;

    bulk_insert(
        conn,
        "accounts",
        &["address", "vm_address_id"],
        unique
            .into_iter()
            .map(|(address, vm)| vec![SqlValue::from(address), SqlValue::from(vm)])
            .collect(),
        OnConflict::DoNothing,
        timeout,
    )
    .await?;

    Ok(())
}
