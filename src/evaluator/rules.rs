//! Deterministic ERC-7730 descriptor check.
//!
//! Same two criteria the model is asked to judge:
//! 1. a well-formed `0x` + 40 hex digit address appears somewhere, and
//! 2. every entry under `display.formats` carries a non-empty `intent`.

use super::{parse_document, DocumentEvaluator, EvaluationError, EvaluationVerdict};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, doc: &Value) -> EvaluationVerdict {
        let has_address = contains_address(doc);
        let intents_ok = formats_have_intents(doc);
        debug!(has_address, intents_ok, "rule evaluation");
        EvaluationVerdict {
            is_good: has_address && intents_ok,
            confidence: 1.0,
        }
    }
}

impl DocumentEvaluator for RuleEvaluator {
    async fn evaluate(&self, document: &[u8]) -> Result<EvaluationVerdict, EvaluationError> {
        let doc = parse_document(document)?;
        Ok(self.check(&doc))
    }
}

pub(crate) fn is_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn contains_address(v: &Value) -> bool {
    match v {
        Value::String(s) => is_address(s),
        Value::Array(items) => items.iter().any(contains_address),
        Value::Object(map) => map.values().any(contains_address),
        _ => false,
    }
}

fn formats_have_intents(doc: &Value) -> bool {
    let Some(formats) = doc.pointer("/display/formats").and_then(Value::as_object) else {
        return false;
    };
    if formats.is_empty() {
        return false;
    }
    formats.values().all(|format| match format.get("intent") {
        Some(Value::String(s)) => !s.trim().is_empty(),
        // ERC-7730 also allows a structured intent object.
        Some(Value::Object(m)) => !m.is_empty(),
        _ => false,
    })
}
