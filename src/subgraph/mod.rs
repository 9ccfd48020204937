//! Question reads via the pre-indexed reality.eth subgraph.
//!
//! Queries the public subgraph for the active chain and maps its
//! response shape onto the same normalized records the on-chain
//! fetcher produces. Chains without a deployed subgraph are simply
//! unsupported here; the router falls back to contract reads.

use crate::fetch::{follow_reopenings, FetchError, FetchQuestionParams, QuestionSource};
use crate::question::{content_hash, Question, Response};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Reality.eth subgraph endpoints per chain id. Chains absent from
/// this table have no subgraph and must be read on-chain.
pub fn subgraph_url(chain_id: u64) -> Option<&'static str> {
    match chain_id {
        1 => Some("https://api.thegraph.com/subgraphs/name/realityeth/realityeth-mainnet"),
        100 => Some("https://api.thegraph.com/subgraphs/name/realityeth/realityeth-gnosis"),
        137 => Some("https://api.thegraph.com/subgraphs/name/realityeth/realityeth-polygon"),
        _ => None,
    }
}

/// Whether the subgraph backend can serve the given chain.
pub fn supported_in_chain(chain_id: u64) -> bool {
    subgraph_url(chain_id).is_some()
}

// ─── Query documents ─────────────────────────────────────────────────────────

const QUESTION_QUERY: &str = r#"
query question($id: ID!) {
    question(id: $id) {
        questionId
        data
        template { templateId }
        arbitrator
        openingTimestamp
        timeout
        currentScheduledFinalizationTimestamp
        isPendingArbitration
        bounty
        currentAnswer
        currentAnswerBond
        minBond
        historyHash
        contentHash
        reopenedBy { questionId }
    }
}"#;

const RESPONSES_QUERY: &str = r#"
query responses($questionId: String!) {
    responses(
        where: { question: $questionId }
        orderBy: timestamp
        orderDirection: asc
        first: 1000
    ) {
        timestamp
        answer
        isCommitment
        bond
        user
        historyHash
    }
}"#;

const USER_RESPONSES_QUERY: &str = r#"
query userResponses($user: Bytes!) {
    responses(where: { user: $user }, first: 1000) {
        question {
            questionId
            data
            template { templateId }
            arbitrator
            openingTimestamp
            timeout
            currentScheduledFinalizationTimestamp
            isPendingArbitration
            bounty
            currentAnswer
            currentAnswerBond
            minBond
            historyHash
            contentHash
            reopenedBy { questionId }
        }
    }
}"#;

// ─── Response shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QuestionData {
    question: Option<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct ResponsesData {
    responses: Vec<RawResponse>,
}

#[derive(Debug, Deserialize)]
struct UserResponsesData {
    responses: Vec<RawUserResponse>,
}

#[derive(Debug, Deserialize)]
struct RawUserResponse {
    question: Option<RawQuestion>,
}

/// Question entity as the subgraph serves it. Numbers arrive as
/// decimal strings, hashes and addresses as 0x-prefixed hex.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawQuestion {
    question_id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    template: Option<RawTemplate>,
    arbitrator: String,
    #[serde(default)]
    opening_timestamp: Option<String>,
    timeout: String,
    #[serde(default)]
    current_scheduled_finalization_timestamp: Option<String>,
    #[serde(default)]
    is_pending_arbitration: bool,
    bounty: String,
    #[serde(default)]
    current_answer: Option<String>,
    #[serde(default)]
    current_answer_bond: Option<String>,
    min_bond: String,
    #[serde(default)]
    history_hash: Option<String>,
    #[serde(default)]
    content_hash: Option<String>,
    #[serde(default)]
    reopened_by: Option<Box<RawReopenedBy>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTemplate {
    template_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReopenedBy {
    question_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    timestamp: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    is_commitment: bool,
    bond: String,
    user: String,
    #[serde(default)]
    history_hash: Option<String>,
}

// ─── Field parsing ───────────────────────────────────────────────────────────

fn malformed(field: &str, value: &str) -> FetchError {
    FetchError::MalformedUpstream(format!("field {field} has unparseable value {value:?}"))
}

fn parse_b256(field: &str, value: &str) -> Result<B256, FetchError> {
    value.parse().map_err(|_| malformed(field, value))
}

fn parse_b256_opt(field: &str, value: Option<&String>) -> Result<B256, FetchError> {
    match value {
        Some(v) => parse_b256(field, v),
        None => Ok(B256::ZERO),
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, FetchError> {
    value.parse().map_err(|_| malformed(field, value))
}

fn parse_u256(field: &str, value: &str) -> Result<U256, FetchError> {
    value.parse().map_err(|_| malformed(field, value))
}

fn parse_u256_opt(field: &str, value: Option<&String>) -> Result<U256, FetchError> {
    match value {
        Some(v) => parse_u256(field, v),
        None => Ok(U256::ZERO),
    }
}

fn parse_u32(field: &str, value: &str) -> Result<u32, FetchError> {
    value.parse().map_err(|_| malformed(field, value))
}

fn parse_u32_opt(field: &str, value: Option<&String>) -> Result<u32, FetchError> {
    match value {
        Some(v) => parse_u32(field, v),
        None => Ok(0),
    }
}

/// Map a subgraph question onto the normalized record. Falls back to
/// the caller-supplied text/template when the subgraph omits them.
pub(crate) fn map_question(
    raw: &RawQuestion,
    fallback_content: Option<&str>,
    fallback_template: u64,
) -> Result<Question, FetchError> {
    let id = parse_b256("questionId", &raw.question_id)?;
    let content = raw
        .data
        .clone()
        .or_else(|| fallback_content.map(str::to_string))
        .unwrap_or_default();
    let template_id = match &raw.template {
        Some(t) => t
            .template_id
            .parse()
            .map_err(|_| malformed("templateId", &t.template_id))?,
        None => fallback_template,
    };
    let opening_timestamp = parse_u32_opt("openingTimestamp", raw.opening_timestamp.as_ref())?;
    let content_hash = match &raw.content_hash {
        Some(v) => parse_b256("contentHash", v)?,
        // Older subgraph deployments omit the stored hash; recompute
        // it from the parts instead.
        None => content_hash(template_id, opening_timestamp, &content),
    };

    Ok(Question {
        id,
        content,
        content_hash,
        template_id,
        arbitrator: parse_address("arbitrator", &raw.arbitrator)?,
        timeout: parse_u32("timeout", &raw.timeout)?,
        opening_timestamp,
        finalization_timestamp: parse_u32_opt(
            "currentScheduledFinalizationTimestamp",
            raw.current_scheduled_finalization_timestamp.as_ref(),
        )?,
        pending_arbitration: raw.is_pending_arbitration,
        bounty: parse_u256("bounty", &raw.bounty)?,
        best_answer: parse_b256_opt("currentAnswer", raw.current_answer.as_ref())?,
        bond: parse_u256_opt("currentAnswerBond", raw.current_answer_bond.as_ref())?,
        min_bond: parse_u256("minBond", &raw.min_bond)?,
        history_hash: parse_b256_opt("historyHash", raw.history_hash.as_ref())?,
    })
}

fn map_response(raw: &RawResponse) -> Result<Response, FetchError> {
    Ok(Response {
        history_hash: parse_b256_opt("historyHash", raw.history_hash.as_ref())?,
        answerer: parse_address("user", &raw.user)?,
        bond: parse_u256("bond", &raw.bond)?,
        answer: parse_b256_opt("answer", raw.answer.as_ref())?,
        timestamp: parse_u32("timestamp", &raw.timestamp)?,
        is_commitment: raw.is_commitment,
    })
}

fn unwrap_envelope<T>(envelope: GraphQlEnvelope<T>) -> Result<T, FetchError> {
    if let Some(err) = envelope.errors.into_iter().next() {
        return Err(FetchError::Subgraph(err.message));
    }
    envelope
        .data
        .ok_or_else(|| FetchError::Subgraph("response carried neither data nor errors".to_string()))
}

// ─── Fetcher ─────────────────────────────────────────────────────────────────

/// Per-request timeout; the subgraph either answers quickly or the
/// caller should fall back to reading on-chain.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SubgraphFetcher {
    url: String,
    http: Client,
}

impl SubgraphFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: Client::new(),
        }
    }

    /// Build a fetcher for `chain_id`, or `None` when the chain has no
    /// subgraph.
    pub fn for_chain(chain_id: u64) -> Option<Self> {
        subgraph_url(chain_id).map(Self::new)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T, FetchError> {
        let body = serde_json::json!({ "query": query, "variables": variables });
        let resp = self
            .http
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::Subgraph(format!(
                "endpoint returned status {}",
                resp.status()
            )));
        }
        let envelope: GraphQlEnvelope<T> = resp.json().await?;
        unwrap_envelope(envelope)
    }

    async fn question_by_id(&self, id: B256) -> Result<Option<RawQuestion>, FetchError> {
        // Subgraph entity ids are the lowercase hex question id.
        let variables = serde_json::json!({ "id": format!("{id}") });
        let data: QuestionData = self.post(QUESTION_QUERY, variables).await?;
        Ok(data.question)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl QuestionSource for SubgraphFetcher {
    fn name(&self) -> &'static str {
        "subgraph"
    }

    async fn question(&self, params: &FetchQuestionParams) -> Result<Option<Question>, FetchError> {
        let (Some(question_id), Some(content)) = (params.question_id, params.question.as_ref())
        else {
            return Ok(None);
        };

        let latest_id = follow_reopenings(question_id, |id| async move {
            let Some(raw) = self.question_by_id(id).await? else {
                // Not indexed; treat as the end of the chain and let
                // the final lookup report the miss.
                return Ok(None);
            };
            match &raw.reopened_by {
                Some(reopened_by) => {
                    parse_b256("reopenedBy.questionId", &reopened_by.question_id).map(Some)
                }
                None => Ok(None),
            }
        })
        .await?;

        let Some(raw) = self.question_by_id(latest_id).await? else {
            debug!(question_id = %latest_id, "question not indexed by subgraph");
            return Ok(None);
        };
        map_question(&raw, Some(content.as_str()), params.template_id).map(Some)
    }

    async fn answers_history(&self, question_id: Option<B256>) -> Result<Vec<Response>, FetchError> {
        let Some(question_id) = question_id else {
            return Ok(Vec::new());
        };

        let variables = serde_json::json!({ "questionId": format!("{question_id}") });
        let data: ResponsesData = self.post(RESPONSES_QUERY, variables).await?;
        data.responses.iter().map(map_response).collect()
    }

    async fn claimable_questions(
        &self,
        owner: Address,
        question_ids: &[B256],
    ) -> Result<Vec<Question>, FetchError> {
        if question_ids.is_empty() || owner == Address::ZERO {
            return Ok(Vec::new());
        }

        let variables = serde_json::json!({ "user": format!("{owner}").to_lowercase() });
        let data: UserResponsesData = self.post(USER_RESPONSES_QUERY, variables).await?;

        let requested: HashSet<&B256> = question_ids.iter().collect();
        let now = unix_now();
        let mut seen = HashSet::new();
        let mut claimable = Vec::new();
        for raw in data.responses.iter().filter_map(|r| r.question.as_ref()) {
            let question = map_question(raw, None, 0)?;
            if !requested.contains(&question.id) || !seen.insert(question.id) {
                continue;
            }
            if question.is_finalized(now) && question.history_hash != B256::ZERO {
                claimable.push(question);
            }
        }
        Ok(claimable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::abi::QuestionState;
    use crate::onchain::fetcher::assemble_question;

    fn raw_question() -> RawQuestion {
        serde_json::from_value(serde_json::json!({
            "questionId": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "data": "Did the KPI hit its target?\u{241f}kpi\u{241f}en",
            "template": { "templateId": "2" },
            "arbitrator": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "openingTimestamp": "1700000000",
            "timeout": "86400",
            "currentScheduledFinalizationTimestamp": "1700100000",
            "isPendingArbitration": false,
            "bounty": "250",
            "currentAnswer": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "currentAnswerBond": "4000",
            "minBond": "2000",
            "historyHash": "0x0303030303030303030303030303030303030303030303030303030303030303",
            "contentHash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "reopenedBy": null
        }))
        .unwrap()
    }

    #[test]
    fn chains_without_subgraph_are_unsupported() {
        assert!(supported_in_chain(1));
        assert!(supported_in_chain(100));
        assert!(supported_in_chain(137));
        assert!(!supported_in_chain(11155111));
        assert!(!supported_in_chain(31337));
    }

    #[test]
    fn for_chain_builds_only_where_a_subgraph_exists() {
        let fetcher = SubgraphFetcher::for_chain(100).unwrap();
        assert_eq!(fetcher.url, subgraph_url(100).unwrap());
        assert!(SubgraphFetcher::for_chain(11155111).is_none());
    }

    #[test]
    fn maps_subgraph_question_onto_normalized_record() {
        let question = map_question(&raw_question(), None, 0).unwrap();
        assert_eq!(question.id, B256::repeat_byte(0x11));
        assert_eq!(question.template_id, 2);
        assert_eq!(question.arbitrator, Address::repeat_byte(0xaa));
        assert_eq!(question.timeout, 86_400);
        assert_eq!(question.opening_timestamp, 1_700_000_000);
        assert_eq!(question.finalization_timestamp, 1_700_100_000);
        assert!(!question.pending_arbitration);
        assert_eq!(question.bounty, U256::from(250u64));
        assert_eq!(question.best_answer, B256::repeat_byte(0x02));
        assert_eq!(question.bond, U256::from(4_000u64));
        assert_eq!(question.min_bond, U256::from(2_000u64));
        assert_eq!(question.history_hash, B256::repeat_byte(0x03));
    }

    #[test]
    fn unanswered_question_maps_null_fields_to_zero() {
        let raw: RawQuestion = serde_json::from_value(serde_json::json!({
            "questionId": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "arbitrator": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "timeout": "86400",
            "bounty": "0",
            "minBond": "0"
        }))
        .unwrap();
        let question = map_question(&raw, Some("text"), 1).unwrap();
        assert_eq!(question.finalization_timestamp, 0);
        assert_eq!(question.best_answer, B256::ZERO);
        assert_eq!(question.bond, U256::ZERO);
        assert_eq!(question.history_hash, B256::ZERO);
        assert_eq!(question.content, "text");
        assert_eq!(question.template_id, 1);
        assert!(!question.is_answered());
    }

    #[test]
    fn malformed_numeric_field_is_an_error() {
        let mut raw = raw_question();
        raw.bounty = "not-a-number".to_string();
        let err = map_question(&raw, None, 0).unwrap_err();
        assert!(matches!(err, FetchError::MalformedUpstream(_)));
    }

    #[test]
    fn graphql_errors_surface_as_subgraph_errors() {
        let envelope: GraphQlEnvelope<QuestionData> = serde_json::from_value(serde_json::json!({
            "errors": [{ "message": "indexing error" }]
        }))
        .unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        assert!(matches!(err, FetchError::Subgraph(m) if m == "indexing error"));
    }

    #[test]
    fn missing_question_deserializes_to_none() {
        let envelope: GraphQlEnvelope<QuestionData> = serde_json::from_value(serde_json::json!({
            "data": { "question": null }
        }))
        .unwrap();
        let data = unwrap_envelope(envelope).unwrap();
        assert!(data.question.is_none());
    }

    /// The two backends must agree field-for-field when fed the same
    /// underlying state.
    #[test]
    fn onchain_and_subgraph_records_agree() {
        let from_subgraph = map_question(&raw_question(), None, 0).unwrap();

        let state = QuestionState {
            content_hash: B256::repeat_byte(0x01),
            arbitrator: Address::repeat_byte(0xaa),
            opening_ts: 1_700_000_000,
            timeout: 86_400,
            finalize_ts: 1_700_100_000,
            is_pending_arbitration: false,
            bounty: U256::from(250u64),
            best_answer: B256::repeat_byte(0x02),
            history_hash: B256::repeat_byte(0x03),
            bond: U256::from(4_000u64),
            min_bond: U256::from(2_000u64),
        };
        let from_chain = assemble_question(
            B256::repeat_byte(0x11),
            from_subgraph.content.clone(),
            2,
            state,
        );

        assert_eq!(from_chain, from_subgraph);
    }
}
