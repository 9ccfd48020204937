//! Reality.eth v3 ABI plumbing: function selectors, event topic
//! hashes, calldata encoding, and pure decoders for the question
//! storage tuple and the answer-log layout.
//!
//! Selectors and topics are derived from the signatures at first use
//! instead of being pasted in as hex, so a signature typo fails loudly
//! in tests rather than silently filtering nothing.

use crate::question::keccak256;
use alloy::primitives::{Address, B256, U256};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("return data too short: expected {expected} bytes, got {actual}")]
    ShortReturnData { expected: usize, actual: usize },
    #[error("log data too short: expected {expected} bytes, got {actual}")]
    ShortLogData { expected: usize, actual: usize },
    #[error("log is missing indexed topic {0}")]
    MissingTopic(usize),
    #[error("value at word {0} does not fit the target type")]
    ValueOverflow(usize),
}

// ─── Function signatures ─────────────────────────────────────────────────────

const QUESTIONS_SIG: &str = "questions(bytes32)";
const REOPENED_QUESTIONS_SIG: &str = "reopened_questions(bytes32)";

// ─── Event signatures ────────────────────────────────────────────────────────

/// LogNewAnswer(bytes32 answer, bytes32 indexed question_id,
///              bytes32 history_hash, address indexed user,
///              uint256 bond, uint256 ts, bool is_commitment)
const LOG_NEW_ANSWER_SIG: &str =
    "LogNewAnswer(bytes32,bytes32,bytes32,address,uint256,uint256,bool)";

fn selector(sig: &str) -> [u8; 4] {
    let hash = keccak256(sig.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn log_new_answer_topic() -> B256 {
    static TOPIC: OnceLock<B256> = OnceLock::new();
    *TOPIC.get_or_init(|| keccak256(LOG_NEW_ANSWER_SIG.as_bytes()))
}

/// Calldata for `questions(bytes32)`.
pub fn encode_questions_call(question_id: B256) -> Vec<u8> {
    encode_bytes32_call(selector(QUESTIONS_SIG), question_id)
}

/// Calldata for `reopened_questions(bytes32)`.
pub fn encode_reopened_questions_call(question_id: B256) -> Vec<u8> {
    encode_bytes32_call(selector(REOPENED_QUESTIONS_SIG), question_id)
}

fn encode_bytes32_call(selector: [u8; 4], arg: B256) -> Vec<u8> {
    let mut calldata = Vec::with_capacity(36);
    calldata.extend_from_slice(&selector);
    calldata.extend_from_slice(arg.as_slice());
    calldata
}

// ─── Return-data decoding ────────────────────────────────────────────────────

/// The eleven fields of the contract's question struct, in storage
/// order. Content text and template id are not on chain — the fetcher
/// layers them in from the caller or the subgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionState {
    pub content_hash: B256,
    pub arbitrator: Address,
    pub opening_ts: u32,
    pub timeout: u32,
    pub finalize_ts: u32,
    pub is_pending_arbitration: bool,
    pub bounty: U256,
    pub best_answer: B256,
    pub history_hash: B256,
    pub bond: U256,
    pub min_bond: U256,
}

impl QuestionState {
    /// The contract returns an all-zero struct for ids it has never
    /// seen. Timeout is non-zero for every real question.
    pub fn exists(&self) -> bool {
        self.timeout != 0
    }
}

fn word(data: &[u8], index: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[index * 32..(index + 1) * 32]);
    out
}

fn word_u32(data: &[u8], index: usize) -> Result<u32, DecodeError> {
    U256::from_be_bytes(word(data, index))
        .try_into()
        .map_err(|_| DecodeError::ValueOverflow(index))
}

/// Decode the return data of `questions(bytes32)`: eleven ABI words.
pub fn decode_questions_return(data: &[u8]) -> Result<QuestionState, DecodeError> {
    if data.len() < 11 * 32 {
        return Err(DecodeError::ShortReturnData {
            expected: 11 * 32,
            actual: data.len(),
        });
    }

    Ok(QuestionState {
        content_hash: B256::from(word(data, 0)),
        arbitrator: Address::from_slice(&word(data, 1)[12..]),
        opening_ts: word_u32(data, 2)?,
        timeout: word_u32(data, 3)?,
        finalize_ts: word_u32(data, 4)?,
        is_pending_arbitration: word(data, 5)[31] != 0,
        bounty: U256::from_be_bytes(word(data, 6)),
        best_answer: B256::from(word(data, 7)),
        history_hash: B256::from(word(data, 8)),
        bond: U256::from_be_bytes(word(data, 9)),
        min_bond: U256::from_be_bytes(word(data, 10)),
    })
}

/// Decode the return data of `reopened_questions(bytes32)`: the id of
/// the question that replaced the argument, or zero if never reopened.
pub fn decode_reopened_questions_return(data: &[u8]) -> Result<B256, DecodeError> {
    if data.len() < 32 {
        return Err(DecodeError::ShortReturnData {
            expected: 32,
            actual: data.len(),
        });
    }
    Ok(B256::from_slice(&data[0..32]))
}

// ─── Log decoding ────────────────────────────────────────────────────────────

/// A decoded LogNewAnswer entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswerLog {
    pub question_id: B256,
    pub answerer: Address,
    pub answer: B256,
    pub history_hash: B256,
    pub bond: U256,
    pub timestamp: u32,
    pub is_commitment: bool,
}

/// Decode a LogNewAnswer log.
///
/// Topics: [sig, question_id, user]
/// Data:   [answer(32), history_hash(32), bond(32), ts(32), is_commitment(32)]
pub fn decode_new_answer_log(topics: &[B256], data: &[u8]) -> Result<NewAnswerLog, DecodeError> {
    let question_id = *topics.get(1).ok_or(DecodeError::MissingTopic(1))?;
    let user_topic = topics.get(2).ok_or(DecodeError::MissingTopic(2))?;
    let answerer = Address::from_slice(&user_topic.as_slice()[12..]);

    if data.len() < 5 * 32 {
        return Err(DecodeError::ShortLogData {
            expected: 5 * 32,
            actual: data.len(),
        });
    }

    Ok(NewAnswerLog {
        question_id,
        answerer,
        answer: B256::from(word(data, 0)),
        history_hash: B256::from(word(data, 1)),
        bond: U256::from_be_bytes(word(data, 2)),
        timestamp: word_u32(data, 3)?,
        is_commitment: word(data, 4)[31] != 0,
    })
}
