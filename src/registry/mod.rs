//! Registry view via The Graph.
//!
//! Questions are read from the oracle subgraph, filtered by the registry
//! (`user`) address. The subgraph is eventually consistent with the chain, so
//! nothing read here is trusted for the challenge itself: bond and finality
//! are re-checked on-chain right before submission.
//!
//! The gateway caps `first` at 1000, so the full history is walked in pages
//! ordered by entity id, each page starting after the last id of the previous
//! one. Finality is only known per question, so filtering happens after the
//! walk.

use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const OPEN_QUESTIONS_QUERY: &str = r#"
query OpenQuestions($user: String!, $first: Int!, $after: String!) {
  questions(
    where: { user: $user, id_gt: $after }
    first: $first
    orderBy: id
    orderDirection: asc
  ) {
    id
    questionId
    data
    currentAnswer
    currentAnswerBond
    currentScheduledFinalizationTimestamp
    isPendingArbitration
  }
}
"#;

const PAGE_LIMIT: usize = 1000;
// 100k questions; past that something is wrong with the cursor or the index.
const MAX_PAGES: usize = 100;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("subgraph request failed: {0}")]
    Request(reqwest::Error),
    #[error("subgraph returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("subgraph query errors: {0}")]
    Graph(String),
    #[error("malformed subgraph payload: {0}")]
    Malformed(String),
    #[error("subgraph query timed out after {0:?}")]
    Timeout(Duration),
}

// The request URL is dropped so nothing endpoint-specific ends up in logs.
impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        QueryError::Request(e.without_url())
    }
}

/// A disputable claim in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub question_id: B256,
    /// IPFS CID of the document under evaluation.
    pub content_hash: String,
    /// Stake (wei) currently backing the answer.
    pub current_bond: U256,
    pub current_answer: Option<B256>,
    pub finalized: bool,
}

/// Source of open questions for a registry.
pub trait RegistryQuery {
    fn fetch_open_questions(
        &self,
        registry: Address,
    ) -> impl Future<Output = Result<Vec<Question>, QueryError>> + Send;
}

/// Subgraph client for the oracle's question index.
pub struct RegistryQueryClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl RegistryQueryClient {
    /// `gateway_url` like `https://gateway.thegraph.com`. The API key is sent
    /// as a bearer token, never in the URL.
    pub fn new(
        gateway_url: &str,
        api_key: &str,
        subgraph_id: &str,
        timeout: Duration,
    ) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base = gateway_url.trim_end_matches('/');
        let api_key = api_key.trim();
        let (endpoint, api_key) = if api_key.is_empty() {
            (format!("{}/subgraphs/id/{}", base, subgraph_id), None)
        } else {
            (
                format!("{}/api/subgraphs/id/{}", base, subgraph_id),
                Some(api_key.to_string()),
            )
        };
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    async fn fetch_page(&self, user: &str, after: &str) -> Result<serde_json::Value, QueryError> {
        let body = serde_json::json!({
            "query": OPEN_QUESTIONS_QUERY,
            "variables": { "user": user, "first": PAGE_LIMIT, "after": after },
        });

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(QueryError::Status { status, body });
        }

        resp.json()
            .await
            .map_err(|e| QueryError::Malformed(e.without_url().to_string()))
    }
}

impl RegistryQuery for RegistryQueryClient {
    async fn fetch_open_questions(&self, registry: Address) -> Result<Vec<Question>, QueryError> {
        // Subgraph ids are lower-case hex.
        let user = format!("{:#x}", registry);
        let now = chrono::Utc::now().timestamp().max(0) as u64;

        let user_ref = user.as_str();
        let all = collect_pages(PAGE_LIMIT, now, move |after: String| async move {
            self.fetch_page(user_ref, &after).await
        })
        .await?;

        let total = all.len();
        let open: Vec<Question> = all.into_iter().filter(|q| !q.finalized).collect();

        info!(
            registry = %user,
            total,
            open = open.len(),
            "subgraph questions fetched"
        );
        Ok(open)
    }
}

/// Walk the id-ordered pages until one comes back short.
async fn collect_pages<F, Fut>(
    page_size: usize,
    now: u64,
    mut fetch_page: F,
) -> Result<Vec<Question>, QueryError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<serde_json::Value, QueryError>>,
{
    let mut questions = Vec::new();
    let mut cursor = String::new();

    for page_no in 0..MAX_PAGES {
        let page = parse_page(fetch_page(cursor.clone()).await?, now)?;
        questions.extend(page.questions);

        let Some(last_id) = page.last_id else {
            return Ok(questions);
        };
        if page.entries < page_size {
            return Ok(questions);
        }
        if last_id <= cursor {
            return Err(QueryError::Malformed(format!(
                "page cursor did not advance past {:?}",
                cursor
            )));
        }
        debug!(page = page_no, last_id = %last_id, "subgraph page full, fetching next");
        cursor = last_id;
    }

    warn!(
        pages = MAX_PAGES,
        fetched = questions.len(),
        "subgraph page cap reached, question list may be incomplete"
    );
    Ok(questions)
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Option<GraphData>,
    #[serde(default)]
    errors: Option<Vec<GraphErrorEntry>>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEntry {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphData {
    questions: Vec<GraphQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQuestion {
    id: String,
    question_id: String,
    data: String,
    #[serde(default)]
    current_answer: Option<String>,
    #[serde(default)]
    current_answer_bond: Option<String>,
    #[serde(default)]
    current_scheduled_finalization_timestamp: Option<String>,
    #[serde(default)]
    is_pending_arbitration: Option<bool>,
}

/// One decoded page. `entries` and `last_id` count every row the subgraph
/// returned, including rows dropped for having no content hash.
#[derive(Debug)]
pub(crate) struct Page {
    pub questions: Vec<Question>,
    pub entries: usize,
    pub last_id: Option<String>,
}

/// Decode a subgraph response page. `now` is unix seconds, used to derive
/// finality from the scheduled finalization timestamp.
pub(crate) fn parse_page(payload: serde_json::Value, now: u64) -> Result<Page, QueryError> {
    let resp: GraphResponse =
        serde_json::from_value(payload).map_err(|e| QueryError::Malformed(e.to_string()))?;

    if let Some(errors) = resp.errors.filter(|e| !e.is_empty()) {
        let joined = errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(QueryError::Graph(joined));
    }

    let data = resp
        .data
        .ok_or_else(|| QueryError::Malformed("response has no data".to_string()))?;

    let entries = data.questions.len();
    let last_id = data.questions.last().map(|q| q.id.clone());

    let mut questions = Vec::with_capacity(entries);
    for raw in data.questions {
        let content_hash = raw.data.trim().to_string();
        if content_hash.is_empty() {
            debug!(question_id = %raw.question_id, "question has no content hash, skipping");
            continue;
        }

        let question_id = B256::from_str(&raw.question_id).map_err(|e| {
            QueryError::Malformed(format!("questionId {:?}: {}", raw.question_id, e))
        })?;

        let current_bond = match raw.current_answer_bond.as_deref() {
            None | Some("") => U256::ZERO,
            Some(s) => U256::from_str(s).map_err(|e| {
                QueryError::Malformed(format!("currentAnswerBond {:?}: {}", s, e))
            })?,
        };

        let current_answer = match raw.current_answer.as_deref() {
            None | Some("") => None,
            Some(s) => Some(B256::from_str(s).map_err(|e| {
                QueryError::Malformed(format!("currentAnswer {:?}: {}", s, e))
            })?),
        };

        let scheduled = raw
            .current_scheduled_finalization_timestamp
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        let pending_arbitration = raw.is_pending_arbitration.unwrap_or(false);
        let finalized = scheduled > 0 && scheduled <= now && !pending_arbitration;

        questions.push(Question {
            question_id,
            content_hash,
            current_bond,
            current_answer,
            finalized,
        });
    }

    Ok(Page {
        questions,
        entries,
        last_id,
    })
}
