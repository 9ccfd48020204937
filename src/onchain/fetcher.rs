//! Question reads via direct contract calls against an RPC endpoint.
//!
//! Every operation is a read-only snapshot: one or more `eth_call`s
//! plus `eth_getLogs` for history. RPC failures propagate to the
//! caller; there is no retry layer here.

use crate::fetch::{follow_reopenings, FetchError, FetchQuestionParams, QuestionSource};
use crate::onchain::abi;
use crate::question::{claimable_questions, Question, Response};
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, TxKind, B256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, TransactionInput, TransactionRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub struct OnChainFetcher<P> {
    provider: P,
    /// Reality.eth v3 contract on the active chain.
    reality: Address,
}

impl<P: Provider> OnChainFetcher<P> {
    pub fn new(provider: P, reality: Address) -> Self {
        Self { provider, reality }
    }

    async fn call(&self, calldata: Vec<u8>) -> Result<Vec<u8>, FetchError> {
        let tx = TransactionRequest {
            to: Some(TxKind::Call(self.reality)),
            input: TransactionInput::new(calldata.into()),
            ..Default::default()
        };
        let returned = self.provider.call(tx).await?;
        Ok(returned.to_vec())
    }

    /// Follow the `reopened_questions` mapping from `question_id` to
    /// the latest reopening. Returns the input id unchanged when the
    /// question was never reopened.
    async fn resolve_reopenings(&self, question_id: B256) -> Result<B256, FetchError> {
        follow_reopenings(question_id, |id| async move {
            let ret = self.call(abi::encode_reopened_questions_call(id)).await?;
            let next = abi::decode_reopened_questions_return(&ret)?;
            // A zero word means the mapping has no entry for this id.
            Ok((next != B256::ZERO).then_some(next))
        })
        .await
    }

    async fn question_state(&self, question_id: B256) -> Result<abi::QuestionState, FetchError> {
        let ret = self.call(abi::encode_questions_call(question_id)).await?;
        Ok(abi::decode_questions_return(&ret)?)
    }

    async fn answer_logs(&self, filter: Filter) -> Result<Vec<abi::NewAnswerLog>, FetchError> {
        let logs = self.provider.get_logs(&filter).await?;
        let mut entries = Vec::with_capacity(logs.len());
        for log in &logs {
            match abi::decode_new_answer_log(log.topics(), &log.data().data) {
                Ok(entry) => entries.push(entry),
                // A malformed log from the node is dropped, not fatal:
                // the remaining history is still usable.
                Err(e) => warn!(error = %e, "skipping undecodable answer log"),
            }
        }
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

/// Assemble a normalized record from the chain tuple plus the
/// caller-supplied content.
pub(crate) fn assemble_question(
    id: B256,
    content: String,
    template_id: u64,
    state: abi::QuestionState,
) -> Question {
    Question {
        id,
        content,
        content_hash: state.content_hash,
        template_id,
        arbitrator: state.arbitrator,
        timeout: state.timeout,
        opening_timestamp: state.opening_ts,
        finalization_timestamp: state.finalize_ts,
        pending_arbitration: state.is_pending_arbitration,
        bounty: state.bounty,
        best_answer: state.best_answer,
        bond: state.bond,
        min_bond: state.min_bond,
        history_hash: state.history_hash,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl<P: Provider> QuestionSource for OnChainFetcher<P> {
    fn name(&self) -> &'static str {
        "onchain"
    }

    async fn question(&self, params: &FetchQuestionParams) -> Result<Option<Question>, FetchError> {
        let (Some(question_id), Some(content)) = (params.question_id, params.question.as_ref())
        else {
            return Ok(None);
        };

        // A reopened question's storage is stale; always read the
        // latest link in the chain.
        let latest_id = self.resolve_reopenings(question_id).await?;
        let state = self.question_state(latest_id).await?;
        if !state.exists() {
            debug!(question_id = %latest_id, "question not found on chain");
            return Ok(None);
        }

        let question = assemble_question(latest_id, content.clone(), params.template_id, state);
        if !question.content_matches() {
            warn!(
                question_id = %latest_id,
                "supplied question text does not hash to the on-chain content hash"
            );
        }
        Ok(Some(question))
    }

    async fn answers_history(&self, question_id: Option<B256>) -> Result<Vec<Response>, FetchError> {
        let Some(question_id) = question_id else {
            return Ok(Vec::new());
        };

        let filter = Filter::new()
            .address(self.reality)
            .event_signature(abi::log_new_answer_topic())
            .topic1(question_id)
            .from_block(BlockNumberOrTag::Earliest);

        let entries = self.answer_logs(filter).await?;
        Ok(entries
            .into_iter()
            .map(|e| Response {
                history_hash: e.history_hash,
                answerer: e.answerer,
                bond: e.bond,
                answer: e.answer,
                timestamp: e.timestamp,
                is_commitment: e.is_commitment,
            })
            .collect())
    }

    async fn claimable_questions(
        &self,
        owner: Address,
        question_ids: &[B256],
    ) -> Result<Vec<Question>, FetchError> {
        if question_ids.is_empty() || owner == Address::ZERO {
            return Ok(Vec::new());
        }

        // One log query finds every question the owner ever answered;
        // intersect with the requested set before touching storage.
        let filter = Filter::new()
            .address(self.reality)
            .event_signature(abi::log_new_answer_topic())
            .topic2(owner.into_word())
            .from_block(BlockNumberOrTag::Earliest);
        let mut answered: HashMap<B256, Vec<Response>> = HashMap::new();
        for entry in self.answer_logs(filter).await? {
            answered.entry(entry.question_id).or_default().push(Response {
                history_hash: entry.history_hash,
                answerer: entry.answerer,
                bond: entry.bond,
                answer: entry.answer,
                timestamp: entry.timestamp,
                is_commitment: entry.is_commitment,
            });
        }

        let mut questions = Vec::new();
        let mut histories = Vec::new();
        for &question_id in question_ids {
            let Some(history) = answered.get(&question_id) else {
                continue;
            };
            let state = self.question_state(question_id).await?;
            if !state.exists() {
                continue;
            }
            // Content is unknown here; claimability only needs the
            // chain tuple.
            questions.push(assemble_question(question_id, String::new(), 0, state));
            histories.push(history.clone());
        }

        let claimable = claimable_questions(&questions, &histories, owner, unix_now());
        debug!(
            owner = %owner,
            requested = question_ids.len(),
            claimable = claimable.len(),
            "claimable question scan complete"
        );
        Ok(claimable)
    }
}
