use super::*;
use crate::fakes::{addr, candidate, encode_candidate, encode_candidates, encode_string, word};

fn hex_words(words: &[&str]) -> Vec<u8> {
    words
        .iter()
        .flat_map(|w| {
            let padded = format!("{w:0>64}");
            hex::decode(padded).expect("hex word")
        })
        .collect()
}

#[test]
fn selector_matches_well_known_erc20_transfer() {
    assert_eq!(
        selector("transfer(address,uint256)"),
        [0xa9, 0x05, 0x9c, 0xbb]
    );
}

#[test]
fn event_topic_matches_well_known_erc20_transfer() {
    assert_eq!(
        event_topic("Transfer(address,address,uint256)"),
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
    );
}

#[test]
fn encodes_dynamic_string_argument_with_offset_and_padding() {
    let data = encode_election_call(&ElectionCall::AddCandidate {
        name: "Alice".to_string(),
    });
    let bytes = decode_hex(&data).expect("hex");
    assert_eq!(&bytes[..4], &selector(signatures::ADD_CANDIDATE));
    assert_eq!(bytes.len(), 4 + 3 * WORD_LEN);
    assert_eq!(&bytes[4..36], &word(32));
    assert_eq!(&bytes[36..68], &word(5));
    assert_eq!(&bytes[68..73], b"Alice");
    assert!(bytes[73..].iter().all(|b| *b == 0));
}

#[test]
fn encodes_static_arguments_inline() {
    let data = encode_election_call(&ElectionCall::StartVoting {
        duration_secs: 604_800,
    });
    let bytes = decode_hex(&data).expect("hex");
    assert_eq!(&bytes[..4], &selector(signatures::START_VOTING));
    assert_eq!(decode_uint(&bytes[4..]).expect("uint"), 604_800);

    let data = encode_call(signatures::HAS_VOTED, &[Token::Address(addr(0x11))]);
    let bytes = decode_hex(&data).expect("hex");
    assert_eq!(decode_address(&bytes[4..]).expect("address"), addr(0x11));

    let data = encode_election_call(&ElectionCall::EndVoting);
    assert_eq!(data.len(), 2 + 8);
}

#[test]
fn decodes_hand_encoded_candidate_array() {
    let data = hex_words(&[
        "20",
        "2",
        "40",
        "100",
        "1",
        "80",
        "3",
        "1",
        "1",
        "4100000000000000000000000000000000000000000000000000000000000000",
        "2",
        "80",
        "5",
        "1",
        "1",
        "4200000000000000000000000000000000000000000000000000000000000000",
    ]);
    let candidates = decode_candidates(&data).expect("decode");
    assert_eq!(candidates, vec![candidate(1, "A", 3), candidate(2, "B", 5)]);
}

#[test]
fn decodes_candidate_list_and_single_candidate() {
    let expected = vec![
        candidate(1, "Alice Longname Who Needs Two Words Of Padding", 10),
        candidate(2, "", 0),
        candidate(3, "Bob", 7),
    ];
    assert_eq!(
        decode_candidates(&encode_candidates(&expected)).expect("list"),
        expected
    );
    assert_eq!(
        decode_candidate(&encode_candidate(&expected[2])).expect("single"),
        expected[2]
    );
    assert!(decode_candidates(&encode_candidates(&[]))
        .expect("empty")
        .is_empty());
}

#[test]
fn rejects_words_wider_than_u64() {
    let mut data = word(1).to_vec();
    data[0] = 1;
    assert_eq!(decode_uint(&data), Err(AbiError::Overflow));
}

#[test]
fn rejects_non_canonical_bool() {
    assert_eq!(decode_bool(&word(2)), Err(AbiError::InvalidBool));
    assert_eq!(decode_bool(&word(1)), Ok(true));
}

#[test]
fn rejects_truncated_payloads() {
    assert!(matches!(
        decode_uint(&[0u8; 31]),
        Err(AbiError::Truncated { .. })
    ));
    let mut data = encode_candidates(&[candidate(1, "Alice", 1)]);
    data.truncate(data.len() - 32);
    assert!(decode_candidates(&data).is_err());

    let mut huge_count = word(32).to_vec();
    huge_count.extend(word(1_000_000));
    assert!(matches!(
        decode_candidates(&huge_count),
        Err(AbiError::Truncated { .. })
    ));
}

#[test]
fn decodes_contract_custom_errors_and_reason_strings() {
    let data = selector("VotingSystem__AlreadyVoted()").to_vec();
    assert_eq!(
        decode_revert(&data),
        Some(RevertReason::Contract(ContractError::AlreadyVoted))
    );

    let mut data = ERROR_STRING_SELECTOR.to_vec();
    data.extend(encode_string("nope"));
    assert_eq!(
        decode_revert(&data),
        Some(RevertReason::Message("nope".to_string()))
    );

    assert_eq!(
        decode_revert(&[1, 2, 3, 4]),
        Some(RevertReason::Unknown([1, 2, 3, 4]))
    );
    assert_eq!(decode_revert(&[1, 2]), None);
}

#[test]
fn corrupt_payloads_surface_as_remote_corrupt() {
    let err: RemoteError = decode_hex("0xzz").expect_err("bad hex").into();
    assert!(matches!(err, RemoteError::Corrupt(_)));
}
