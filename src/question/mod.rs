//! Normalized Reality.eth question state.
//!
//! Both the on-chain and subgraph fetchers decode into these records,
//! so everything downstream (router, watcher, claim logic) is
//! source-agnostic. All fields are read-only projections of contract
//! state — this layer never owns durable state of its own.

use alloy::primitives::{Address, B256, U256};
use std::collections::HashSet;
use tiny_keccak::{Hasher, Keccak};

/// A Reality.eth question as stored on the contract, plus the raw
/// question text the caller (or the subgraph) supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// The question id (bytes32). For a reopened question this is the
    /// id of the latest reopening, not the original.
    pub id: B256,
    /// Raw question specification text (delimited fields per template).
    pub content: String,
    /// keccak256(template_id . opening_ts . content), as stored on chain.
    pub content_hash: B256,
    pub template_id: u64,
    pub arbitrator: Address,
    /// Seconds an unchallenged answer must stand before finalization.
    pub timeout: u32,
    /// Unix timestamp before which answers are rejected (0 = immediate).
    pub opening_timestamp: u32,
    /// Unix timestamp at which the current best answer finalizes.
    /// 0 while unanswered; reset when the question is reopened.
    pub finalization_timestamp: u32,
    pub pending_arbitration: bool,
    pub bounty: U256,
    pub best_answer: B256,
    /// Bond backing the current best answer. The contract enforces that
    /// each new answer at least doubles this.
    pub bond: U256,
    pub min_bond: U256,
    /// Rolling hash over the answer history; zeroed once winnings are
    /// fully claimed.
    pub history_hash: B256,
}

impl Question {
    /// Whether any answer has been submitted yet.
    pub fn is_answered(&self) -> bool {
        self.finalization_timestamp != 0
    }

    /// Whether the question has finalized as of `now` (unix seconds).
    /// A question under arbitration never counts as finalized, whatever
    /// its timestamp says.
    pub fn is_finalized(&self, now: u64) -> bool {
        self.is_answered() && !self.pending_arbitration && u64::from(self.finalization_timestamp) <= now
    }

    /// Whether the question is open for answers as of `now`.
    pub fn is_open(&self, now: u64) -> bool {
        u64::from(self.opening_timestamp) <= now
    }

    /// Recompute the content hash from the question parts and compare
    /// against the on-chain value. A mismatch means the caller-supplied
    /// text is not the text the question was created with.
    pub fn content_matches(&self) -> bool {
        content_hash(self.template_id, self.opening_timestamp, &self.content) == self.content_hash
    }
}

/// A single entry in a question's answer history. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// History hash after this answer was recorded.
    pub history_hash: B256,
    pub answerer: Address,
    pub bond: U256,
    pub answer: B256,
    pub timestamp: u32,
    /// True for commit-reveal answers; the answer field is then the
    /// commitment id, not the revealed value.
    pub is_commitment: bool,
}

/// keccak256 of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Reality.eth content hash: keccak256 of the tightly packed
/// (uint256 template_id, uint32 opening_ts, string question).
pub fn content_hash(template_id: u64, opening_timestamp: u32, question: &str) -> B256 {
    let mut packed = Vec::with_capacity(36 + question.len());
    packed.extend_from_slice(&U256::from(template_id).to_be_bytes::<32>());
    packed.extend_from_slice(&opening_timestamp.to_be_bytes());
    packed.extend_from_slice(question.as_bytes());
    keccak256(&packed)
}

/// Filter `questions` down to those `owner` can currently claim
/// winnings on.
///
/// Claimable means: finalized as of `now`, history hash still non-zero
/// (a zero hash means the claim walk already completed), and `owner`
/// appears among the question's responders. `responses` carries each
/// question's answer history keyed by position in `questions`.
pub fn claimable_questions(
    questions: &[Question],
    responses: &[Vec<Response>],
    owner: Address,
    now: u64,
) -> Vec<Question> {
    questions
        .iter()
        .zip(responses)
        .filter(|(q, history)| {
            q.is_finalized(now)
                && q.history_hash != B256::ZERO
                && history.iter().any(|r| r.answerer == owner)
        })
        .map(|(q, _)| q.clone())
        .collect()
}

/// Collect the distinct answerers across a history, preserving first
/// appearance order.
pub fn distinct_answerers(history: &[Response]) -> Vec<Address> {
    let mut seen = HashSet::new();
    history
        .iter()
        .filter(|r| seen.insert(r.answerer))
        .map(|r| r.answerer)
        .collect()
}
