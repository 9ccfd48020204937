//! The full fetcher: routes each read either to the subgraph or to
//! direct contract calls.
//!
//! Both backends implement [`QuestionSource`] and normalize into the
//! same [`Question`]/[`Response`] records, so callers never see which
//! path served them. The routing decision is a pure function of the
//! caller's decentralization preference and subgraph availability, and
//! it is re-evaluated on every call — never cached — since either input
//! can change between calls.

use crate::onchain::abi::DecodeError;
use crate::onchain::OnChainFetcher;
use crate::question::{Question, Response};
use crate::subgraph::SubgraphFetcher;
use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use alloy::transports::TransportError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("rpc error: {0}")]
    Rpc(#[from] TransportError),
    #[error("subgraph request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("subgraph error: {0}")]
    Subgraph(String),
    #[error("malformed upstream data: {0}")]
    MalformedUpstream(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("reopened-question chain exceeded {max_hops} hops (cycle in chain data?)")]
    ReopenChainTooDeep { max_hops: usize },
}

/// Cap on how many reopenings either backend follows before declaring
/// the chain data pathological.
pub(crate) const MAX_REOPEN_HOPS: usize = 32;

/// Follow a reopened-question chain from `start` to its latest link.
///
/// `lookup` resolves one hop: the id that replaced the given one, or
/// `None` when the chain ends there. A chain of up to
/// [`MAX_REOPEN_HOPS`] hops resolves; anything longer, or any cycle,
/// is a [`FetchError::ReopenChainTooDeep`]. Generic over the lookup so
/// the traversal is testable without a backend.
pub(crate) async fn follow_reopenings<F, Fut>(start: B256, mut lookup: F) -> Result<B256, FetchError>
where
    F: FnMut(B256) -> Fut,
    Fut: Future<Output = Result<Option<B256>, FetchError>>,
{
    let mut current = start;
    let mut visited = HashSet::from([current]);

    loop {
        let Some(next) = lookup(current).await? else {
            return Ok(current);
        };
        // `visited` holds the start plus one entry per hop taken.
        if !visited.insert(next) || visited.len() > MAX_REOPEN_HOPS + 1 {
            return Err(FetchError::ReopenChainTooDeep {
                max_hops: MAX_REOPEN_HOPS,
            });
        }
        debug!(from = %current, to = %next, "question was reopened, following");
        current = next;
    }
}

/// Inputs for a question fetch. Both the id and the raw question text
/// are required: without the text the content hash cannot be
/// cross-checked and the record would be incomplete. Incomplete params
/// short-circuit to `None` before any network I/O.
#[derive(Debug, Clone, Default)]
pub struct FetchQuestionParams {
    pub question_id: Option<B256>,
    /// Raw question specification text, as passed at creation time.
    pub question: Option<String>,
    /// Template the question was created against (0 = bool template).
    pub template_id: u64,
}

impl FetchQuestionParams {
    pub fn is_complete(&self) -> bool {
        self.question_id.is_some() && self.question.is_some()
    }
}

/// A backend capable of serving normalized question state. Implemented
/// by the on-chain fetcher and the subgraph fetcher.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Latest state of a question, following reopenings. `Ok(None)`
    /// when params are incomplete or the question does not exist.
    async fn question(&self, params: &FetchQuestionParams) -> Result<Option<Question>, FetchError>;

    /// Full answer history in submission order. Empty when the id is
    /// missing or the question has no answers.
    async fn answers_history(&self, question_id: Option<B256>) -> Result<Vec<Response>, FetchError>;

    /// Questions among `question_ids` that `owner` can claim winnings
    /// on right now. Empty input means empty output, no I/O.
    async fn claimable_questions(
        &self,
        owner: Address,
        question_ids: &[B256],
    ) -> Result<Vec<Question>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Subgraph,
    OnChain,
}

/// The routing rule: use the subgraph unless the caller prefers fully
/// decentralized reads or the chain has no subgraph at all.
pub fn select_strategy(prefer_decentralization: bool, subgraph_supported: bool) -> FetchStrategy {
    if prefer_decentralization || !subgraph_supported {
        FetchStrategy::OnChain
    } else {
        FetchStrategy::Subgraph
    }
}

/// Composition root over the two fetch backends.
pub struct Fetcher<P> {
    chain_id: u64,
    prefer_decentralization: bool,
    onchain: OnChainFetcher<P>,
    subgraph: Option<SubgraphFetcher>,
}

impl<P: Provider> Fetcher<P> {
    pub fn new(
        chain_id: u64,
        prefer_decentralization: bool,
        onchain: OnChainFetcher<P>,
        subgraph: Option<SubgraphFetcher>,
    ) -> Self {
        Self {
            chain_id,
            prefer_decentralization,
            onchain,
            subgraph,
        }
    }

    /// Strategy this fetcher would pick for a call made right now.
    pub fn strategy(&self) -> FetchStrategy {
        select_strategy(self.prefer_decentralization, self.subgraph.is_some())
    }

    fn source(&self) -> &dyn QuestionSource {
        let strategy = self.strategy();
        let source: &dyn QuestionSource = match (strategy, self.subgraph.as_ref()) {
            (FetchStrategy::Subgraph, Some(subgraph)) => subgraph,
            _ => &self.onchain,
        };
        debug!(
            chain_id = self.chain_id,
            strategy = ?strategy,
            source = source.name(),
            "routing fetch"
        );
        source
    }

    pub async fn fetch_question(
        &self,
        params: &FetchQuestionParams,
    ) -> Result<Option<Question>, FetchError> {
        if !params.is_complete() {
            return Ok(None);
        }
        self.source().question(params).await
    }

    pub async fn fetch_answers_history(
        &self,
        question_id: Option<B256>,
    ) -> Result<Vec<Response>, FetchError> {
        if question_id.is_none() {
            return Ok(Vec::new());
        }
        self.source().answers_history(question_id).await
    }

    pub async fn fetch_claimable_questions(
        &self,
        owner: Address,
        question_ids: &[B256],
    ) -> Result<Vec<Question>, FetchError> {
        if question_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.source().claimable_questions(owner, question_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn qid(n: u8) -> B256 {
        B256::with_last_byte(n)
    }

    /// qid(0) → qid(1) → ... → qid(hops).
    fn reopening_chain(hops: u8) -> HashMap<B256, B256> {
        (0..hops).map(|i| (qid(i), qid(i + 1))).collect()
    }

    async fn resolve(chain: &HashMap<B256, B256>, start: B256) -> Result<B256, FetchError> {
        follow_reopenings(start, |id| {
            let next = chain.get(&id).copied();
            async move { Ok(next) }
        })
        .await
    }

    #[tokio::test]
    async fn reopened_chain_resolves_to_latest_link() {
        let chain = reopening_chain(2);
        assert_eq!(resolve(&chain, qid(0)).await.unwrap(), qid(2));
        // Starting mid-chain or at the end also lands on the last link.
        assert_eq!(resolve(&chain, qid(1)).await.unwrap(), qid(2));
        assert_eq!(resolve(&chain, qid(2)).await.unwrap(), qid(2));
    }

    #[tokio::test]
    async fn reopening_cycle_is_an_error() {
        let self_cycle = HashMap::from([(qid(1), qid(1))]);
        let err = resolve(&self_cycle, qid(1)).await.unwrap_err();
        assert!(matches!(err, FetchError::ReopenChainTooDeep { .. }));

        let two_cycle = HashMap::from([(qid(1), qid(2)), (qid(2), qid(1))]);
        let err = resolve(&two_cycle, qid(1)).await.unwrap_err();
        assert!(matches!(err, FetchError::ReopenChainTooDeep { .. }));
    }

    #[tokio::test]
    async fn hop_cap_admits_exactly_max_hops() {
        let chain = reopening_chain(MAX_REOPEN_HOPS as u8);
        let resolved = resolve(&chain, qid(0)).await.unwrap();
        assert_eq!(resolved, qid(MAX_REOPEN_HOPS as u8));
    }

    #[tokio::test]
    async fn chain_beyond_hop_cap_is_an_error() {
        let chain = reopening_chain(MAX_REOPEN_HOPS as u8 + 1);
        let err = resolve(&chain, qid(0)).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::ReopenChainTooDeep { max_hops } if max_hops == MAX_REOPEN_HOPS
        ));
    }

    #[test]
    fn subgraph_preferred_when_available_and_allowed() {
        assert_eq!(select_strategy(false, true), FetchStrategy::Subgraph);
    }

    #[test]
    fn decentralization_preference_forces_onchain() {
        // Even with a subgraph configured, the preference wins.
        assert_eq!(select_strategy(true, true), FetchStrategy::OnChain);
        assert_eq!(select_strategy(true, false), FetchStrategy::OnChain);
    }

    #[test]
    fn unsupported_chain_falls_back_to_onchain() {
        assert_eq!(select_strategy(false, false), FetchStrategy::OnChain);
    }

    #[test]
    fn incomplete_params_are_detected() {
        assert!(!FetchQuestionParams::default().is_complete());
        assert!(!FetchQuestionParams {
            question_id: Some(B256::repeat_byte(0x01)),
            question: None,
            template_id: 0,
        }
        .is_complete());
        assert!(FetchQuestionParams {
            question_id: Some(B256::repeat_byte(0x01)),
            question: Some("Did it happen?".to_string()),
            template_id: 0,
        }
        .is_complete());
    }
}
