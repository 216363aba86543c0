//! tests/db_tests.rs - conflict-tolerant writes against an in-memory database

#[cfg(test)]
mod tests {
    use crate::db::account::insert_accounts;
    use crate::db::block::{insert_block, resume_height};
    use crate::db::connection::in_memory;
    use crate::db::helpers::bulk_insert;
    use crate::db::validator::{
        insert_commit_signatures, load_validators, refresh_vote_counts, upsert_validators,
    };
    use crate::db::{DbError, OnConflict, SqlValue};
    use crate::models::{Account, BlockMessage, Validator, ValidatorCommitSignature, Vote};
    use crate::tests::support::{account_address, consensus_of, operator_address};
    use crate::validation::validate_account_address;
    use sqlx::{Row, SqlitePool};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn block(height: i64) -> BlockMessage {
        BlockMessage {
            height,
            hash: format!("HASH{}", height),
            proposer_consensus_address: consensus_of(1),
            proposer_operator_address: None,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            last_commit: None,
            txs: vec![],
        }
    }

    async fn seed_validators(pool: &SqlitePool, seeds: &[u8]) -> Vec<Validator> {
        let mut conn = pool.acquire().await.unwrap();
        let accounts: Vec<Account> = seeds
            .iter()
            .map(|seed| {
                let address = account_address(*seed);
                let vm_address = validate_account_address(&address, "init").unwrap();
                Account {
                    address,
                    vm_address,
                }
            })
            .collect();
        insert_accounts(&mut conn, &accounts, TIMEOUT).await.unwrap();

        let validators: Vec<Validator> = seeds
            .iter()
            .map(|seed| Validator {
                operator_address: operator_address(*seed),
                account_id: account_address(*seed),
                consensus_address: consensus_of(*seed),
                moniker: format!("validator-{}", seed),
                voting_power: 10,
                jailed: false,
            })
            .collect();
        upsert_validators(&mut conn, &validators, TIMEOUT).await.unwrap();
        validators
    }

    async fn stored_vote(pool: &SqlitePool, validator: &str, height: i64) -> String {
        sqlx::query_scalar(
            "SELECT vote FROM validator_commit_signatures WHERE validator_address = ? AND block_height = ?",
        )
        .bind(validator)
        .bind(height)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_length_mismatch_rejects_whole_batch() {
        let pool = in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let err = bulk_insert(
            &mut conn,
            "blocks",
            &["height", "hash", "proposer", "timestamp"],
            vec![
                vec![1i64.into(), "a".into(), "p".into(), "t".into()],
                vec![2i64.into(), "b".into(), "p".into()],
            ],
            OnConflict::DoNothing,
            TIMEOUT,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            DbError::LengthMismatch {
                row: 1,
                got: 3,
                expected: 4,
                ..
            }
        ));
        assert!(!err.is_retryable());
        drop(conn);
        assert_eq!(resume_height(&pool, 1, TIMEOUT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_insert_splits_large_batches() {
        let pool = in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let rows: Vec<Vec<SqlValue>> = (0..2_500)
            .map(|i| vec![SqlValue::from(format!("0x{:064x}", i))])
            .collect();
        let written = bulk_insert(
            &mut conn,
            "vm_addresses",
            &["vm_address"],
            rows,
            OnConflict::DoNothing,
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(written, 2_500);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vm_addresses")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 2_500);
    }

    #[tokio::test]
    async fn test_block_insert_is_idempotent() {
        let pool = in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(insert_block(&mut conn, &block(41), TIMEOUT).await.unwrap(), 1);
        assert_eq!(insert_block(&mut conn, &block(41), TIMEOUT).await.unwrap(), 0);
        insert_block(&mut conn, &block(40), TIMEOUT).await.unwrap();
        drop(conn);

        assert_eq!(resume_height(&pool, 40, TIMEOUT).await.unwrap(), 41);
    }

    #[tokio::test]
    async fn test_resume_height_stops_below_first_gap() {
        let pool = in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        for height in [5, 6, 7, 9, 10] {
            insert_block(&mut conn, &block(height), TIMEOUT).await.unwrap();
        }
        drop(conn);

        assert_eq!(resume_height(&pool, 5, TIMEOUT).await.unwrap(), 7);
        assert_eq!(resume_height(&pool, 9, TIMEOUT).await.unwrap(), 10);
        // Nothing stored at the start height itself.
        assert_eq!(resume_height(&pool, 1, TIMEOUT).await.unwrap(), 0);
        assert_eq!(resume_height(&pool, 8, TIMEOUT).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_block_proposer_prefers_operator_address() {
        let pool = in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut resolved = block(7);
        resolved.proposer_operator_address = Some(operator_address(1));
        insert_block(&mut conn, &resolved, TIMEOUT).await.unwrap();
        insert_block(&mut conn, &block(8), TIMEOUT).await.unwrap();

        let rows = sqlx::query("SELECT height, proposer FROM blocks ORDER BY height")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        assert_eq!(rows[0].get::<String, _>("proposer"), operator_address(1));
        assert_eq!(rows[1].get::<String, _>("proposer"), consensus_of(1));
    }

    #[tokio::test]
    async fn test_accounts_are_created_once() {
        let pool = in_memory().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let address = account_address(9);
        let account = Account {
            vm_address: validate_account_address(&address, "init").unwrap(),
            address,
        };
        insert_accounts(&mut conn, &[account.clone(), account.clone()], TIMEOUT)
            .await
            .unwrap();
        insert_accounts(&mut conn, &[account.clone()], TIMEOUT)
            .await
            .unwrap();

        let vm: String = sqlx::query_scalar("SELECT vm_address_id FROM accounts WHERE address = ?")
            .bind(&account.address)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(vm, format!("0x{}{}", "00".repeat(12), "09".repeat(20)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_validator_upsert_refreshes_power() {
        let pool = in_memory().await.unwrap();
        let mut validators = seed_validators(&pool, &[1, 2]).await;

        validators[0].voting_power = 99;
        validators[0].jailed = true;
        {
            let mut conn = pool.acquire().await.unwrap();
            upsert_validators(&mut conn, &validators[..1], TIMEOUT)
                .await
                .unwrap();
        }

        let loaded = load_validators(&pool, TIMEOUT).await.unwrap();
        assert_eq!(loaded.len(), 2);
        let first = loaded
            .iter()
            .find(|v| v.operator_address == operator_address(1))
            .unwrap();
        assert_eq!(first.voting_power, 99);
        assert!(first.jailed);
    }

    #[tokio::test]
    async fn test_propose_wins_over_vote() {
        let pool = in_memory().await.unwrap();
        seed_validators(&pool, &[1, 2]).await;
        let one = operator_address(1);
        let two = operator_address(2);

        let sig = |validator: &str, vote: Vote| ValidatorCommitSignature {
            validator_address: validator.to_string(),
            block_height: 10,
            vote,
        };

        let mut conn = pool.acquire().await.unwrap();
        insert_commit_signatures(&mut conn, &[sig(&one, Vote::Vote), sig(&two, Vote::Propose)], TIMEOUT)
            .await
            .unwrap();
        // A later PROPOSE replaces the VOTE; a later VOTE never replaces a PROPOSE.
        insert_commit_signatures(&mut conn, &[sig(&one, Vote::Propose), sig(&two, Vote::Vote)], TIMEOUT)
            .await
            .unwrap();
        insert_commit_signatures(&mut conn, &[sig(&one, Vote::Absent)], TIMEOUT)
            .await
            .unwrap();
        drop(conn);

        assert_eq!(stored_vote(&pool, &one, 10).await, "PROPOSE");
        assert_eq!(stored_vote(&pool, &two, 10).await, "PROPOSE");
    }

    #[tokio::test]
    async fn test_vote_counts_are_recomputed_over_window() {
        let pool = in_memory().await.unwrap();
        seed_validators(&pool, &[1]).await;
        let one = operator_address(1);

        let signatures: Vec<ValidatorCommitSignature> = [
            (5, Vote::Propose),
            (6, Vote::Vote),
            (7, Vote::Vote),
            (8, Vote::Absent),
        ]
        .into_iter()
        .map(|(height, vote)| ValidatorCommitSignature {
            validator_address: one.clone(),
            block_height: height,
            vote,
        })
        .collect();

        let mut conn = pool.acquire().await.unwrap();
        insert_commit_signatures(&mut conn, &signatures, TIMEOUT)
            .await
            .unwrap();
        refresh_vote_counts(&mut conn, &[one.clone()], 0, TIMEOUT)
            .await
            .unwrap();
        refresh_vote_counts(&mut conn, &[one.clone()], 0, TIMEOUT)
            .await
            .unwrap();

        let row = sqlx::query(
            "SELECT propose_count, vote_count, absent_count, last_height FROM validator_vote_counts",
        )
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(row.get::<i64, _>("propose_count"), 1);
        assert_eq!(row.get::<i64, _>("vote_count"), 2);
        assert_eq!(row.get::<i64, _>("absent_count"), 1);
        assert_eq!(row.get::<i64, _>("last_height"), 8);

        // Only heights above 6 are counted.
        refresh_vote_counts(&mut conn, &[one], 6, TIMEOUT).await.unwrap();
        let row = sqlx::query("SELECT propose_count, vote_count FROM validator_vote_counts")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("propose_count"), 0);
        assert_eq!(row.get::<i64, _>("vote_count"), 1);
    }
}
