//! Module and resource lookups served by the node's REST gateway.
//!
//! These go through [`ChainReader::rest_get`], so they work against any
//! reader, the hub included.

use crate::blockchain::client::{ChainReader, ClientError};
use crate::blockchain::models::{BondedValidator, BondedValidatorsPage, ValidatorPower};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

pub const BONDED_VALIDATORS_PATH: &str = "/initia/mstaking/v1/validators";

const VALIDATORS_PER_PAGE: u32 = 100;
const BONDED_PAGE_LIMIT: u32 = 100;

pub fn move_resource_path(address: &str) -> String {
    format!("/initia/move/v1/accounts/{}/resources/by_struct_tag", address)
}

pub fn move_module_path(address: &str, module_name: &str) -> String {
    format!("/initia/move/v1/accounts/{}/modules/{}", address, module_name)
}

pub async fn query_json<R, Resp>(
    reader: &R,
    path: &str,
    query: &[(String, String)],
) -> Result<Resp, ClientError>
where
    R: ChainReader + ?Sized,
    Resp: DeserializeOwned,
{
    let response = reader.rest_get(path, query).await?;
    Ok(serde_json::from_value(response.body)?)
}

/// Every validator in the CometBFT set at `height`, across all pages.
pub async fn all_validators<R>(reader: &R, height: i64) -> Result<Vec<ValidatorPower>, ClientError>
where
    R: ChainReader + ?Sized,
{
    let mut validators = Vec::new();
    let mut page = 1;

    loop {
        let response = reader.validators(height, page, VALIDATORS_PER_PAGE).await?;
        let received = response.validators.len();
        validators.extend(response.validators);

        if received == 0 || validators.len() as i64 >= response.total {
            break;
        }
        page += 1;
    }

    Ok(validators)
}

/// The staking module's bonded validator set at the latest height.
pub async fn bonded_validators<R>(reader: &R) -> Result<Vec<BondedValidator>, ClientError>
where
    R: ChainReader + ?Sized,
{
    let mut validators = Vec::new();
    let mut next_key: Option<String> = None;

    loop {
        let mut query = vec![
            ("status".to_string(), "BOND_STATUS_BONDED".to_string()),
            ("pagination.limit".to_string(), BONDED_PAGE_LIMIT.to_string()),
        ];
        if let Some(key) = &next_key {
            query.push(("pagination.key".to_string(), key.clone()));
        }

        let page: BondedValidatorsPage = query_json(reader, BONDED_VALIDATORS_PATH, &query).await?;
        validators.extend(page.validators);

        next_key = page
            .pagination
            .and_then(|p| p.next_key)
            .filter(|key| !key.is_empty());
        if next_key.is_none() {
            break;
        }
    }

    debug!("Fetched {} bonded validators", validators.len());
    Ok(validators)
}

/// A Move resource stored under `address`, e.g. `0x1::coin::CoinStore`.
pub async fn move_resource<R>(reader: &R, address: &str, struct_tag: &str) -> Result<Value, ClientError>
where
    R: ChainReader + ?Sized,
{
    query_json(
        reader,
        &move_resource_path(address),
        &[("struct_tag".to_string(), struct_tag.to_string())],
    )
    .await
}

/// A published Move module's metadata and ABI.
pub async fn move_module<R>(reader: &R, address: &str, module_name: &str) -> Result<Value, ClientError>
where
    R: ChainReader + ?Sized,
{
    query_json(reader, &move_module_path(address, module_name), &[]).await
}
