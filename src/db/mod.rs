pub mod account;
pub mod block;
pub mod connection;
pub mod helpers;
pub mod transaction;
pub mod validator;

pub use helpers::{DbError, OnConflict, SqlValue};

pub const INIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    height INTEGER PRIMARY KEY,
    hash TEXT NOT NULL,
    proposer TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vm_addresses (
    vm_address TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS accounts (
    address TEXT PRIMARY KEY,
    vm_address_id TEXT NOT NULL,
    FOREIGN KEY (vm_address_id) REFERENCES vm_addresses(vm_address)
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    block_index INTEGER NOT NULL,
    gas_used INTEGER NOT NULL,
    gas_limit INTEGER NOT NULL,
    gas_fee TEXT NOT NULL,
    err_msg TEXT,
    success BOOLEAN NOT NULL,
    sender TEXT NOT NULL,
    memo TEXT NOT NULL,
    messages TEXT NOT NULL,
    is_send BOOLEAN NOT NULL DEFAULT 0,
    is_ibc BOOLEAN NOT NULL DEFAULT 0,
    is_move_publish BOOLEAN NOT NULL DEFAULT 0,
    is_move_upgrade BOOLEAN NOT NULL DEFAULT 0,
    is_move_execute BOOLEAN NOT NULL DEFAULT 0,
    is_move_script BOOLEAN NOT NULL DEFAULT 0,
    is_nft_mint BOOLEAN NOT NULL DEFAULT 0,
    is_nft_burn BOOLEAN NOT NULL DEFAULT 0,
    is_nft_transfer BOOLEAN NOT NULL DEFAULT 0,
    is_opinit BOOLEAN NOT NULL DEFAULT 0,
    is_instantiate BOOLEAN NOT NULL DEFAULT 0,
    is_migrate BOOLEAN NOT NULL DEFAULT 0,
    is_update_admin BOOLEAN NOT NULL DEFAULT 0,
    is_clear_admin BOOLEAN NOT NULL DEFAULT 0,
    is_store_code BOOLEAN NOT NULL DEFAULT 0,
    FOREIGN KEY (block_height) REFERENCES blocks(height)
);

CREATE TABLE IF NOT EXISTS account_transactions (
    account_id TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    is_signer BOOLEAN NOT NULL,
    PRIMARY KEY (account_id, transaction_id),
    FOREIGN KEY (account_id) REFERENCES accounts(address),
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS validators (
    operator_address TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    consensus_address TEXT NOT NULL,
    moniker TEXT NOT NULL,
    voting_power INTEGER NOT NULL,
    jailed BOOLEAN NOT NULL,
    FOREIGN KEY (account_id) REFERENCES accounts(address)
);

CREATE TABLE IF NOT EXISTS validator_commit_signatures (
    validator_address TEXT NOT NULL,
    block_height INTEGER NOT NULL,
    vote TEXT NOT NULL,
    PRIMARY KEY (validator_address, block_height),
    FOREIGN KEY (validator_address) REFERENCES validators(operator_address)
);

CREATE TABLE IF NOT EXISTS validator_historical_powers (
    validator_address TEXT NOT NULL,
    height INTEGER NOT NULL,
    voting_power INTEGER NOT NULL,
    PRIMARY KEY (validator_address, height),
    FOREIGN KEY (validator_address) REFERENCES validators(operator_address)
);

CREATE TABLE IF NOT EXISTS validator_vote_counts (
    validator_address TEXT PRIMARY KEY,
    propose_count INTEGER NOT NULL,
    vote_count INTEGER NOT NULL,
    absent_count INTEGER NOT NULL,
    last_height INTEGER NOT NULL,
    FOREIGN KEY (validator_address) REFERENCES validators(operator_address)
);

CREATE INDEX IF NOT EXISTS idx_transactions_block_height ON transactions(block_height);
CREATE INDEX IF NOT EXISTS idx_transactions_sender ON transactions(sender);
CREATE INDEX IF NOT EXISTS idx_account_transactions_height ON account_transactions(block_height);
CREATE INDEX IF NOT EXISTS idx_validators_consensus_address ON validators(consensus_address);
CREATE INDEX IF NOT EXISTS idx_commit_signatures_height ON validator_commit_signatures(block_height);
"#;
