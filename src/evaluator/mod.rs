//! Document quality evaluation.
//!
//! Callers only see a typed verdict or a typed failure. Anything fragile
//! about a backend (free-text model replies, prompt wording) stays inside
//! its adapter.

pub mod llm;
pub mod rules;

pub use llm::LlmEvaluator;
pub use rules::RuleEvaluator;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("document is not valid JSON: {0}")]
    MalformedDocument(String),
    #[error("evaluator backend request failed: {0}")]
    Backend(String),
    #[error("evaluator backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not interpret evaluator reply: {0}")]
    UnparseableResponse(String),
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
}

// Request URLs are dropped from the message before it can reach a log line.
impl From<reqwest::Error> for EvaluationError {
    fn from(e: reqwest::Error) -> Self {
        EvaluationError::Backend(e.without_url().to_string())
    }
}

/// Outcome of evaluating one document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationVerdict {
    pub is_good: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
}

impl EvaluationVerdict {
    pub fn label(&self) -> &'static str {
        if self.is_good {
            "Good"
        } else {
            "Bad"
        }
    }
}

pub trait DocumentEvaluator {
    fn evaluate(
        &self,
        document: &[u8],
    ) -> impl Future<Output = Result<EvaluationVerdict, EvaluationError>> + Send;
}

/// Backend chosen from config at startup.
pub enum EvaluatorBackend {
    Llm(LlmEvaluator),
    Rules(RuleEvaluator),
}

impl DocumentEvaluator for EvaluatorBackend {
    async fn evaluate(&self, document: &[u8]) -> Result<EvaluationVerdict, EvaluationError> {
        match self {
            EvaluatorBackend::Llm(e) => e.evaluate(document).await,
            EvaluatorBackend::Rules(e) => e.evaluate(document).await,
        }
    }
}

/// Parse the document as JSON; every backend requires it.
pub(crate) fn parse_document(document: &[u8]) -> Result<serde_json::Value, EvaluationError> {
    serde_json::from_slice(document).map_err(|e| EvaluationError::MalformedDocument(e.to_string()))
}
