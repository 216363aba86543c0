//! Consensus address to validator mapping owned by one flusher.

use crate::models::Validator;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ValidatorRelations {
    by_consensus: HashMap<String, Validator>,
}

impl ValidatorRelations {
    pub fn from_validators(validators: impl IntoIterator<Item = Validator>) -> Self {
        Self {
            by_consensus: validators
                .into_iter()
                .map(|v| (v.consensus_address.to_uppercase(), v))
                .collect(),
        }
    }

    pub fn get(&self, consensus_address: &str) -> Option<&Validator> {
        self.by_consensus.get(&consensus_address.to_uppercase())
    }

    pub fn operator_of(&self, consensus_address: &str) -> Option<&str> {
        self.get(consensus_address)
            .map(|v| v.operator_address.as_str())
    }

    pub fn contains(&self, consensus_address: &str) -> bool {
        self.get(consensus_address).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_consensus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_consensus.is_empty()
    }

    pub fn validators(&self) -> impl Iterator<Item = &Validator> {
        self.by_consensus.values()
    }

    /// Addresses from `consensus_addresses` with no known validator.
    pub fn unknown<'a>(&self, consensus_addresses: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut unknown: Vec<String> = consensus_addresses
            .into_iter()
            .filter(|address| !address.is_empty() && !self.contains(address))
            .map(str::to_string)
            .collect();
        unknown.sort();
        unknown.dedup();
        unknown
    }
}
