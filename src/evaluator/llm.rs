//! Remote model evaluator (Gemini `generateContent`).
//!
//! The model is asked for `{"Good": NN%, "Bad": NN%}`. Replies are read
//! strictly first, then with a lenient key/percentage scan. A reply that
//! yields neither score is an error, not a silent "Bad".

use super::{parse_document, DocumentEvaluator, EvaluationError, EvaluationVerdict};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REFERENCE_DESCRIPTOR: &str = r#"{
  "context": {
    "eip712": {
      "deployments": [{"chainId": 137, "address": "0xdb46d1dc155634fbc732f92e853b10b288ad5a1d"}],
      "domain": {"name": "Dispatch", "chainId": 137, "verifyingContract": "0xdb46d1dc155634fbc732f92e853b10b288ad5a1d"}
    }
  },
  "metadata": {"owner": "Dispatch.xyz"},
  "display": {
    "formats": {
      "FollowWithSig": {
        "intent": "Dispatch.xyz Follow Profile",
        "fields": [
          {"path": "profileIds.[]", "label": "Profile Ids", "format": "raw"},
          {"path": "nonce", "label": "Nonce", "format": "raw"},
          {"path": "deadline", "label": "Expiration Date", "format": "raw"}
        ]
      }
    }
  }
}"#;

pub struct LlmEvaluator {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl LlmEvaluator {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, EvaluationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn prompt(document: &Value) -> String {
        let descriptor =
            serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string());
        format!(
            "Evaluate the following ERC7730 JSON specification based on these criteria:\n\
             1. It must include a properly formatted Ethereum address (42-character string starting with '0x' followed by 40 hex characters).\n\
             2. Each function or type listed in the 'display.formats' section must have a clear, human-readable 'intent' describing its purpose.\n\n\
             Here is an example of a good ERC7730 spec for reference:\n{}\n\n\
             Now, evaluate this spec:\n{}\n\n\
             Return your evaluation in this exact JSON format: {{\"Good\": XX%, \"Bad\": XX%}}, where XX% is your confidence level. \
             Do not include any additional text or explanations.",
            REFERENCE_DESCRIPTOR, descriptor
        )
    }

    async fn generate(&self, prompt: String) -> Result<String, EvaluationError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(EvaluationError::Status { status, body });
        }

        let parsed: GenerateResponse = resp.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(EvaluationError::UnparseableResponse("empty model reply".to_string()));
        }
        Ok(text)
    }
}

impl DocumentEvaluator for LlmEvaluator {
    async fn evaluate(&self, document: &[u8]) -> Result<EvaluationVerdict, EvaluationError> {
        let doc = parse_document(document)?;
        let reply = self.generate(Self::prompt(&doc)).await?;
        debug!(reply = %reply.trim(), "model reply");
        parse_reply(&reply)
    }
}

/// Turn a model reply into a verdict.
pub(crate) fn parse_reply(reply: &str) -> Result<EvaluationVerdict, EvaluationError> {
    let text = strip_code_fence(reply.trim());

    let scores = strict_scores(text).or_else(|| {
        let lenient = lenient_scores(text);
        if lenient.is_some() {
            warn!("model reply was not strict JSON, used lenient score scan");
        }
        lenient
    });

    let Some((good, bad)) = scores else {
        return Err(EvaluationError::UnparseableResponse(truncate(text, 200)));
    };

    // Accept either percentages (80, 20) or fractions (0.8, 0.2).
    let (good, bad) = if good <= 1.0 && bad <= 1.0 {
        (good * 100.0, bad * 100.0)
    } else {
        (good, bad)
    };

    if good + bad <= 0.0 {
        return Err(EvaluationError::UnparseableResponse(truncate(text, 200)));
    }

    Ok(EvaluationVerdict {
        is_good: good > bad,
        confidence: (good.max(bad) / 100.0).clamp(0.0, 1.0),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn strict_scores(text: &str) -> Option<(f64, f64)> {
    let v: Value = serde_json::from_str(text).ok()?;
    Some((score_value(v.get("Good")?)?, score_value(v.get("Bad")?)?))
}

fn score_value(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn lenient_scores(text: &str) -> Option<(f64, f64)> {
    Some((scan_score(text, "Good")?, scan_score(text, "Bad")?))
}

/// Find `key` and read the first number that follows it closely,
/// e.g. `"Good": 85%` or `Good: "85%"`.
fn scan_score(text: &str, key: &str) -> Option<f64> {
    let start = text.find(key)? + key.len();
    let tail = &text[start..];

    let digits_at = tail
        .char_indices()
        .take(8)
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)?;
    if tail[..digits_at].chars().any(|c| c.is_alphabetic()) {
        return None;
    }

    let number: String = tail[digits_at..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
