//! tests/decoder_tests.rs - decoding, classification, address extraction and votes

#[cfg(test)]
mod tests {
    use crate::blockchain::models::Event;
    use crate::cache::ValidatorRelations;
    use crate::flusher::accounts::{account_transactions, AddressExtractor};
    use crate::flusher::decoder::{
        classify, decode_guarded, DecodeError, DecodedTx, JsonTxDecoder, TxDecoder,
    };
    use crate::flusher::processor::tx_hash;
    use crate::flusher::votes::{derive_votes, referenced_consensus_addresses};
    use crate::models::{BlockMessage, Validator, Vote};
    use crate::tests::support::{
        account_address, block_response, consensus_of, operator_address, raw_tx, send_msg, PREFIX,
    };
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;
    use std::collections::HashMap;

    struct PanickingDecoder;

    impl TxDecoder for PanickingDecoder {
        fn decode(&self, _raw: &[u8]) -> Result<DecodedTx, DecodeError> {
            panic!("unsupported message layout")
        }
    }

    fn validator(seed: u8, voting_power: i64, jailed: bool) -> Validator {
        Validator {
            operator_address: operator_address(seed),
            account_id: account_address(seed),
            consensus_address: consensus_of(seed),
            moniker: format!("validator-{}", seed),
            voting_power,
            jailed,
        }
    }

    fn votes_by_operator(block: &BlockMessage, relations: &ValidatorRelations) -> HashMap<String, Vote> {
        derive_votes(block, relations)
            .into_iter()
            .map(|sig| {
                assert_eq!(sig.block_height, block.height);
                (sig.validator_address, sig.vote)
            })
            .collect()
    }

    #[test]
    fn test_classify_flags() {
        let flags = classify(&[
            json!({ "@type": "/cosmos.bank.v1beta1.MsgSend" }),
            json!({ "@type": "/ibc.applications.transfer.v1.MsgTransfer" }),
            json!({ "@type": "/opinit.ophost.v1.MsgInitiateTokenDeposit" }),
        ]);
        assert!(flags.is_send);
        assert!(flags.is_ibc);
        assert!(flags.is_opinit);
        assert!(!flags.is_move_execute);

        let flags = classify(&[json!({
            "@type": "/initia.move.v1.MsgExecute",
            "module_name": "simple_nft",
            "function_name": "mint",
        })]);
        assert!(flags.is_move_execute);
        assert!(flags.is_nft_mint);
        assert!(!flags.is_nft_burn);

        // Entry functions outside an nft module are plain executes.
        let flags = classify(&[json!({
            "@type": "/initia.move.v1.MsgExecuteJSON",
            "module_name": "dex",
            "function_name": "transfer",
        })]);
        assert!(flags.is_move_execute);
        assert!(!flags.is_nft_transfer);

        let flags = classify(&[
            json!({ "@type": "/initia.move.v1.MsgGovPublish" }),
            json!({ "@type": "/cosmwasm.wasm.v1.MsgStoreCode" }),
            json!({ "@type": "/cosmwasm.wasm.v1.MsgInstantiateContract2" }),
            json!({ "no_type": true }),
        ]);
        assert!(flags.is_move_upgrade);
        assert!(flags.is_store_code);
        assert!(flags.is_instantiate);
        assert!(!flags.is_move_publish);
    }

    #[test]
    fn test_json_decoder_reads_fee_and_signer() {
        let signer = account_address(0xA1);
        let raw = STANDARD
            .decode(raw_tx(&signer, vec![send_msg(&account_address(0xB2))]))
            .unwrap();

        let decoded = JsonTxDecoder.decode(&raw).unwrap();
        assert_eq!(decoded.signer, signer);
        assert_eq!(decoded.fee, "1500uinit");
        assert_eq!(decoded.gas_limit, 200_000);
        assert_eq!(decoded.memo, "test");
        assert_eq!(
            decoded.message_types().collect::<Vec<_>>(),
            vec!["/cosmos.bank.v1beta1.MsgSend"]
        );
    }

    #[test]
    fn test_json_decoder_numeric_gas_and_payer_fallback() {
        let payer = account_address(0x0C);
        let tx = json!({
            "body": { "messages": [{ "@type": "/initia.move.v1.MsgScript" }] },
            "auth_info": {
                "fee": {
                    "amount": [
                        { "denom": "uinit", "amount": "10" },
                        { "denom": "uusdc", "amount": "3" },
                    ],
                    "gas_limit": 90000,
                    "payer": payer,
                },
            },
        });

        let decoded = JsonTxDecoder.decode(&serde_json::to_vec(&tx).unwrap()).unwrap();
        assert_eq!(decoded.signer, payer);
        assert_eq!(decoded.fee, "10uinit,3uusdc");
        assert_eq!(decoded.gas_limit, 90_000);
        assert_eq!(decoded.memo, "");
    }

    #[test]
    fn test_json_decoder_rejects_bad_input() {
        let unsigned = json!({ "body": { "messages": [{ "@type": "/cosmos.bank.v1beta1.MsgSend" }] } });
        let err = JsonTxDecoder
            .decode(&serde_json::to_vec(&unsigned).unwrap())
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingSigner));

        let bad_gas = json!({
            "body": { "messages": [{ "sender": account_address(1) }] },
            "auth_info": { "fee": { "gas_limit": "lots" } },
        });
        let err = JsonTxDecoder
            .decode(&serde_json::to_vec(&bad_gas).unwrap())
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField { field: "gas_limit", .. }));

        let err = JsonTxDecoder.decode(b"\x0a\x02not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_decode_guarded_contains_panics() {
        let err = decode_guarded(&PanickingDecoder, b"{}").unwrap_err();
        match err {
            DecodeError::Panicked(message) => assert!(message.contains("unsupported message layout")),
            other => panic!("expected a panic error, got {:?}", other),
        }

        let signer = account_address(3);
        let raw = STANDARD.decode(raw_tx(&signer, vec![send_msg(&signer)])).unwrap();
        assert_eq!(decode_guarded(&JsonTxDecoder, &raw).unwrap().signer, signer);
    }

    #[test]
    fn test_tx_hash_is_uppercase_sha256() {
        assert_eq!(
            tx_hash(b""),
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        );
    }

    #[test]
    fn test_extractor_finds_bech32_and_hex_accounts() {
        let extractor = AddressExtractor::new(PREFIX).unwrap();
        let bech32 = account_address(0x11);
        let hex20 = format!("0x{}", "22".repeat(20));
        let hex32 = format!("0x{}{}", "00".repeat(12), "33".repeat(20));
        let text = format!(
            "from {} to {} via {} by {}",
            bech32,
            hex20,
            hex32,
            operator_address(0x44)
        );

        let found: Vec<String> = extractor.scan(&text).into_iter().map(|a| a.address).collect();
        assert_eq!(
            found,
            vec![bech32, account_address(0x22), account_address(0x33)]
        );
    }

    #[test]
    fn test_extractor_skips_unconvertible_hex() {
        let extractor = AddressExtractor::new(PREFIX).unwrap();
        // 32 bytes without the zero padding are not an account.
        let text = format!("0x{}", "ff".repeat(32));
        assert!(extractor.scan(&text).is_empty());
        assert!(extractor.account("cosmos1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqnrql8a").is_err());
    }

    #[test]
    fn test_extractor_scans_event_attributes() {
        let extractor = AddressExtractor::new(PREFIX).unwrap();
        let events: Vec<Event> = serde_json::from_value(json!([
            {
                "type": "transfer",
                "attributes": [
                    { "key": "recipient", "value": account_address(5) },
                    { "key": "amount", "value": "10uinit" },
                ],
            },
            { "type": "message", "attributes": [{ "key": "sender", "value": account_address(6) }] },
        ]))
        .unwrap();

        let found: Vec<String> = extractor
            .scan_events(&events)
            .into_iter()
            .map(|a| a.address)
            .collect();
        assert_eq!(found, vec![account_address(5), account_address(6)]);
    }

    #[test]
    fn test_account_transactions_keep_signer_flag() {
        let extractor = AddressExtractor::new(PREFIX).unwrap();
        let signer = extractor.account(&account_address(1)).unwrap();
        let other = extractor.account(&account_address(2)).unwrap();

        let rows = account_transactions(
            &signer,
            &[other.clone(), signer.clone(), other.clone()],
            "HASH/5",
            5,
        );

        assert_eq!(rows.len(), 2);
        let signer_row = rows.iter().find(|r| r.account_id == signer.address).unwrap();
        assert!(signer_row.is_signer);
        let other_row = rows.iter().find(|r| r.account_id == other.address).unwrap();
        assert!(!other_row.is_signer);
        assert!(rows.iter().all(|r| r.transaction_id == "HASH/5" && r.block_height == 5));
    }

    #[test]
    fn test_derive_votes() {
        let relations = ValidatorRelations::from_validators(vec![
            validator(1, 10, false),
            validator(2, 10, false),
            validator(3, 10, false),
            validator(4, 10, false),
            validator(5, 10, true),
            validator(6, 0, false),
        ]);
        let response = block_response(
            100,
            &consensus_of(1),
            vec![],
            Some(vec![
                (consensus_of(1), 2),
                (consensus_of(2), 3),
                (consensus_of(3), 1),
                (consensus_of(9), 2),
            ]),
        );
        let block = BlockMessage::from_block(&response, None);

        let votes = votes_by_operator(&block, &relations);
        assert_eq!(votes.len(), 3);
        assert_eq!(votes[&operator_address(1)], Vote::Propose);
        assert_eq!(votes[&operator_address(2)], Vote::Vote);
        assert_eq!(votes[&operator_address(3)], Vote::Absent);
        // Known but not part of this height's commit.
        assert!(!votes.contains_key(&operator_address(4)));
        assert!(!votes.contains_key(&operator_address(5)));
        assert!(!votes.contains_key(&operator_address(6)));
    }

    #[test]
    fn test_unknown_proposer_gets_no_vote() {
        let relations = ValidatorRelations::from_validators(vec![validator(2, 10, false)]);
        let response = block_response(
            100,
            &consensus_of(1),
            vec![],
            Some(vec![(consensus_of(1), 2), (consensus_of(2), 2)]),
        );
        // Resolved upstream, but never stored as a validator.
        let block = BlockMessage::from_block(&response, Some(operator_address(1)));
        assert_eq!(block.proposer_operator_address, Some(operator_address(1)));

        let votes = votes_by_operator(&block, &relations);
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[&operator_address(2)], Vote::Vote);
    }

    #[test]
    fn test_derive_votes_without_commit() {
        let relations = ValidatorRelations::from_validators(vec![validator(1, 10, false)]);
        let block = BlockMessage::from_block(&block_response(7, &consensus_of(1), vec![], None), None);

        assert!(derive_votes(&block, &relations).is_empty());
        assert_eq!(referenced_consensus_addresses(&block), vec![consensus_of(1).as_str()]);
    }

    #[test]
    fn test_unknown_addresses_ignore_case() {
        let relations = ValidatorRelations::from_validators(vec![validator(1, 10, false)]);
        let known = consensus_of(1).to_lowercase();
        let stranger = consensus_of(2);

        assert_eq!(relations.operator_of(&known), Some(operator_address(1).as_str()));
        assert_eq!(
            relations.unknown([known.as_str(), stranger.as_str(), stranger.as_str(), ""]),
            vec![stranger]
        );
    }
}
