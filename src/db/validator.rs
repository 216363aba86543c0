use crate::db::helpers::{bulk_insert, with_timeout, DbError, OnConflict, SqlValue};
use crate::models::{Validator, ValidatorCommitSignature};
use sqlx::{Executor, QueryBuilder, Row, Sqlite, SqliteConnection};
use std::time::Duration;

/// Inserts new validators and refreshes the mutable fields of known ones.
pub async fn upsert_validators(
    conn: &mut SqliteConnection,
    validators: &[Validator],
    timeout: Duration,
) -> Result<u64, DbError> {
    bulk_insert(
        conn,
        "validators",
        &[
            "operator_address",
            "account_id",
            "consensus_address",
            "moniker",
            "voting_power",
            "jailed",
        ],
        validators
            .iter()
            .map(|v| -> Vec<SqlValue> {
                vec![
                    v.operator_address.as_str().into(),
                    v.account_id.as_str().into(),
                    v.consensus_address.as_str().into(),
                    v.moniker.as_str().into(),
                    v.voting_power.into(),
                    v.jailed.into(),
                ]
            })
            .collect(),
        OnConflict::DoUpdate {
            target: &["operator_address"],
            set: "consensus_address = excluded.consensus_address, \
                  moniker = excluded.moniker, \
                  voting_power = excluded.voting_power, \
                  jailed = excluded.jailed",
        },
        timeout,
    )
    .await
}

pub async fn load_validators<'e, E>(executor: E, timeout: Duration) -> Result<Vec<Validator>, DbError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = with_timeout(
        "load validators",
        timeout,
        sqlx::query(
            "SELECT operator_address, account_id, consensus_address, moniker, voting_power, jailed
             FROM validators",
        )
        .fetch_all(executor),
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| Validator {
            operator_address: row.get("operator_address"),
            account_id: row.get("account_id"),
            consensus_address: row.get("consensus_address"),
            moniker: row.get("moniker"),
            voting_power: row.get("voting_power"),
            jailed: row.get("jailed"),
        })
        .collect())
}

/// Stores votes. A PROPOSE replaces an earlier VOTE or ABSENT for the same
/// validator and height; nothing ever replaces a PROPOSE.
pub async fn insert_commit_signatures(
    conn: &mut SqliteConnection,
    signatures: &[ValidatorCommitSignature],
    timeout: Duration,
) -> Result<u64, DbError> {
    bulk_insert(
        conn,
        "validator_commit_signatures",
        &["validator_address", "block_height", "vote"],
        signatures
            .iter()
            .map(|s| -> Vec<SqlValue> {
                vec![
                    s.validator_address.as_str().into(),
                    s.block_height.into(),
                    s.vote.as_str().into(),
                ]
            })
            .collect(),
        OnConflict::DoUpdate {
            target: &["validator_address", "block_height"],
            set: "vote = excluded.vote WHERE excluded.vote = 'PROPOSE'",
        },
        timeout,
    )
    .await
}

pub async fn insert_historical_powers(
    conn: &mut SqliteConnection,
    validators: &[Validator],
    height: i64,
    timeout: Duration,
) -> Result<u64, DbError> {
    bulk_insert(
        conn,
        "validator_historical_powers",
        &["validator_address", "height", "voting_power"],
        validators
            .iter()
            .map(|v| -> Vec<SqlValue> {
                vec![
                    v.operator_address.as_str().into(),
                    height.into(),
                    v.voting_power.into(),
                ]
            })
            .collect(),
        OnConflict::DoNothing,
        timeout,
    )
    .await
}

/// Recomputes vote tallies of `validators` over heights above `from_height`.
/// Derived purely from stored signatures, so running it twice is harmless.
pub async fn refresh_vote_counts(
    conn: &mut SqliteConnection,
    validators: &[String],
    from_height: i64,
    timeout: Duration,
) -> Result<u64, DbError> {
    if validators.is_empty() {
        return Ok(0);
    }

    let mut query = QueryBuilder::<Sqlite>::new(
        "INSERT INTO validator_vote_counts \
         (validator_address, propose_count, vote_count, absent_count, last_height) \
         SELECT validator_address, \
                SUM(vote = 'PROPOSE'), SUM(vote = 'VOTE'), SUM(vote = 'ABSENT'), \
                MAX(block_height) \
         FROM validator_commit_signatures WHERE block_height > ",
    );
    query.push_bind(from_height);
    query.push(" AND validator_address IN (");
    let mut separated = query.separated(", ");
    for validator in validators {
        separated.push_bind(validator.as_str());
    }
    separated.push_unseparated(")");
    query.push(
        " GROUP BY validator_address \
         ON CONFLICT (validator_address) DO UPDATE SET \
         propose_count = excluded.propose_count, \
         vote_count = excluded.vote_count, \
         absent_count = excluded.absent_count, \
         last_height = excluded.last_height",
    );

    let result = with_timeout(
        "validator_vote_counts",
        timeout,
        query.build().execute(&mut *conn),
    )
    .await?;
    Ok(result.rows_affected())
}
