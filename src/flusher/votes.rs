use crate::blockchain::models::{BLOCK_ID_FLAG_COMMIT, BLOCK_ID_FLAG_NIL};
use crate::cache::ValidatorRelations;
use crate::models::{BlockMessage, ValidatorCommitSignature, Vote};
use std::collections::BTreeMap;
use tracing::debug;

/// Consensus addresses referenced by a block's commit and header.
pub fn referenced_consensus_addresses(block: &BlockMessage) -> Vec<&str> {
    let mut addresses: Vec<&str> = block
        .last_commit
        .iter()
        .flat_map(|commit| commit.signatures.iter())
        .map(|sig| sig.validator_address.as_str())
        .filter(|address| !address.is_empty())
        .collect();
    if !block.proposer_consensus_address.is_empty() {
        addresses.push(block.proposer_consensus_address.as_str());
    }
    addresses
}

/// Votes of `block`, one per validator operator address.
///
/// The header proposer gets `PROPOSE`. Committed and nil signatures count as
/// `VOTE` and absent-flag entries count as `ABSENT`; the commit already lists
/// every member of that height's set, so nobody else gets a row. Addresses
/// missing from `relations` are skipped, which keeps every row pointing at a
/// stored validator. Blocks without a last commit yield nothing.
pub fn derive_votes(
    block: &BlockMessage,
    relations: &ValidatorRelations,
) -> Vec<ValidatorCommitSignature> {
    let Some(commit) = &block.last_commit else {
        return Vec::new();
    };

    let mut votes: BTreeMap<String, Vote> = BTreeMap::new();

    for sig in &commit.signatures {
        if sig.validator_address.is_empty() {
            continue;
        }
        let Some(operator) = relations.operator_of(&sig.validator_address) else {
            debug!(
                "No validator for consensus address {} at height {}",
                sig.validator_address, block.height
            );
            continue;
        };

        let vote = match sig.block_id_flag {
            BLOCK_ID_FLAG_COMMIT | BLOCK_ID_FLAG_NIL => Vote::Vote,
            _ => Vote::Absent,
        };
        votes.insert(operator.to_string(), vote);
    }

    match relations.operator_of(&block.proposer_consensus_address) {
        Some(proposer) => {
            votes.insert(proposer.to_string(), Vote::Propose);
        }
        None => debug!(
            "No validator for proposer {} at height {}",
            block.proposer_consensus_address, block.height
        ),
    }

    votes
        .into_iter()
        .map(|(validator_address, vote)| ValidatorCommitSignature {
            validator_address,
            block_height: block.height,
            vote,
        })
        .collect()
}
