//! Solidity ABI encoding for the calls this client makes, and decoding of the
//! shapes the voting contract returns, emits and reverts with.

use sha3::{Digest, Keccak256};
use shared::{
    domain::{Address, Candidate, CandidateId},
    error::ContractError,
};
use thiserror::Error;

use crate::{ElectionCall, RemoteError};

pub const WORD_LEN: usize = 32;

/// Selector of the builtin `Error(string)` revert.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

pub mod signatures {
    pub const ADD_CANDIDATE: &str = "addCandidate(string)";
    pub const START_VOTING: &str = "startVoting(uint256)";
    pub const END_VOTING: &str = "endVoting()";
    pub const VOTE: &str = "vote(uint256)";
    pub const GET_ADMIN: &str = "getAdmin()";
    pub const GET_ALL_CANDIDATES: &str = "getAllCandidates()";
    pub const GET_CANDIDATE: &str = "getCandidate(uint256)";
    pub const GET_CANDIDATE_COUNT: &str = "getCandidateCount()";
    pub const GET_REMAINING_TIME: &str = "getRemainingTime()";
    pub const GET_VOTING_STATUS: &str = "getVotingStatus()";
    pub const GET_VOTING_TIMES: &str = "getVotingTimes()";
    pub const GET_WINNER: &str = "getWinner()";
    pub const HAS_VOTED: &str = "hasVoted(address)";

    pub const CANDIDATE_ADDED: &str = "CandidateAdded(uint256,string)";
    pub const VOTE_CAST: &str = "VoteCast(address,uint256)";
    pub const VOTING_STARTED: &str = "VotingStarted(uint256,uint256)";
    pub const VOTING_ENDED: &str = "VotingEnded(uint256)";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("invalid hex payload: {0}")]
    Hex(String),
    #[error("payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("uint256 value does not fit in 64 bits")]
    Overflow,
    #[error("word is not a valid bool")]
    InvalidBool,
    #[error("word is not a valid address")]
    InvalidAddress,
    #[error("string is not valid utf-8")]
    Utf8,
}

impl From<AbiError> for RemoteError {
    fn from(value: AbiError) -> Self {
        RemoteError::Corrupt(value.to_string())
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(bytes));
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u64),
    Address(Address),
    String(String),
}

/// Encodes `signature(tokens...)` as `0x`-prefixed calldata.
pub fn encode_call(signature: &str, tokens: &[Token]) -> String {
    let mut out = selector(signature).to_vec();
    out.extend(encode_tokens(tokens));
    format!("0x{}", hex::encode(out))
}

pub fn encode_election_call(call: &ElectionCall) -> String {
    match call {
        ElectionCall::AddCandidate { name } => {
            encode_call(signatures::ADD_CANDIDATE, &[Token::String(name.clone())])
        }
        ElectionCall::StartVoting { duration_secs } => {
            encode_call(signatures::START_VOTING, &[Token::Uint(*duration_secs)])
        }
        ElectionCall::EndVoting => encode_call(signatures::END_VOTING, &[]),
        ElectionCall::Vote { candidate_id } => {
            encode_call(signatures::VOTE, &[Token::Uint(candidate_id.0)])
        }
    }
}

fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD_LEN;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        match token {
            Token::Uint(value) => head.extend(uint_word(*value)),
            Token::Address(address) => {
                let mut word = [0u8; WORD_LEN];
                word[12..].copy_from_slice(&address.to_bytes());
                head.extend(word);
            }
            Token::String(value) => {
                head.extend(uint_word((head_len + tail.len()) as u64));
                tail.extend(uint_word(value.len() as u64));
                tail.extend(value.as_bytes());
                let padding = (WORD_LEN - value.len() % WORD_LEN) % WORD_LEN;
                tail.extend(std::iter::repeat(0u8).take(padding));
            }
        }
    }
    head.extend(tail);
    head
}

fn uint_word(value: u64) -> [u8; WORD_LEN] {
    let mut word = [0u8; WORD_LEN];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn decode_hex(raw: &str) -> Result<Vec<u8>, AbiError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    hex::decode(digits).map_err(|err| AbiError::Hex(err.to_string()))
}

/// Bounds-checked reads of ABI words at byte offsets.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], AbiError> {
        let end = offset.checked_add(len).ok_or(AbiError::Overflow)?;
        self.data.get(offset..end).ok_or(AbiError::Truncated {
            needed: end,
            available: self.data.len(),
        })
    }

    fn word(&self, offset: usize) -> Result<&'a [u8], AbiError> {
        self.bytes(offset, WORD_LEN)
    }

    pub(crate) fn uint(&self, offset: usize) -> Result<u64, AbiError> {
        let word = self.word(offset)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(AbiError::Overflow);
        }
        Ok(word[24..]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn offset(&self, at: usize) -> Result<usize, AbiError> {
        usize::try_from(self.uint(at)?).map_err(|_| AbiError::Overflow)
    }

    pub(crate) fn bool(&self, offset: usize) -> Result<bool, AbiError> {
        match self.uint(offset) {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            _ => Err(AbiError::InvalidBool),
        }
    }

    pub(crate) fn address(&self, offset: usize) -> Result<Address, AbiError> {
        let word = self.word(offset)?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(AbiError::InvalidAddress);
        }
        Address::parse(&format!("0x{}", hex::encode(&word[12..])))
            .map_err(|_| AbiError::InvalidAddress)
    }

    /// Reads a `string` whose length word sits at `offset`.
    fn string_at(&self, offset: usize) -> Result<String, AbiError> {
        let len = self.offset(offset)?;
        let bytes = self.bytes(offset + WORD_LEN, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::Utf8)
    }

    /// Reads a `(uint256,string,uint256,bool)` tuple encoded at `base`.
    fn candidate(&self, base: usize) -> Result<Candidate, AbiError> {
        let id = self.uint(base)?;
        let name_offset = self.offset(base + WORD_LEN)?;
        let vote_count = self.uint(base + 2 * WORD_LEN)?;
        let exists = self.bool(base + 3 * WORD_LEN)?;
        let name = self.string_at(base.checked_add(name_offset).ok_or(AbiError::Overflow)?)?;
        Ok(Candidate {
            id: CandidateId(id),
            name,
            vote_count,
            exists,
        })
    }
}

pub fn decode_uint(data: &[u8]) -> Result<u64, AbiError> {
    Reader::new(data).uint(0)
}

pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    Reader::new(data).bool(0)
}

pub fn decode_address(data: &[u8]) -> Result<Address, AbiError> {
    Reader::new(data).address(0)
}

pub fn decode_uint_pair(data: &[u8]) -> Result<(u64, u64), AbiError> {
    let reader = Reader::new(data);
    Ok((reader.uint(0)?, reader.uint(WORD_LEN)?))
}

/// Decodes a single dynamic `string` return value or event field.
pub fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    let reader = Reader::new(data);
    let offset = reader.offset(0)?;
    reader.string_at(offset)
}

pub fn decode_candidate(data: &[u8]) -> Result<Candidate, AbiError> {
    let reader = Reader::new(data);
    let base = reader.offset(0)?;
    reader.candidate(base)
}

pub fn decode_candidates(data: &[u8]) -> Result<Vec<Candidate>, AbiError> {
    let reader = Reader::new(data);
    let array = reader.offset(0)?;
    let count = reader.offset(array)?;
    // Each element needs at least its offset word; reject absurd lengths early.
    if count > data.len() / WORD_LEN {
        return Err(AbiError::Truncated {
            needed: count.saturating_mul(WORD_LEN),
            available: data.len(),
        });
    }
    let elements = array + WORD_LEN;
    (0..count)
        .map(|i| {
            let offset = reader.offset(elements + i * WORD_LEN)?;
            reader.candidate(elements.checked_add(offset).ok_or(AbiError::Overflow)?)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    Contract(ContractError),
    Message(String),
    Unknown([u8; 4]),
}

pub fn decode_revert(data: &[u8]) -> Option<RevertReason> {
    let head: [u8; 4] = data.get(..4)?.try_into().ok()?;
    if let Some(error) = ContractError::ALL
        .into_iter()
        .find(|error| selector(&error.signature()) == head)
    {
        return Some(RevertReason::Contract(error));
    }
    if head == ERROR_STRING_SELECTOR {
        return decode_string(&data[4..]).ok().map(RevertReason::Message);
    }
    Some(RevertReason::Unknown(head))
}

#[cfg(test)]
#[path = "tests/abi_tests.rs"]
mod tests;
