//! Turning raw test-suite lines into requests that can be sent.

use crate::error::{VerifierError, VerifierResult};
use crate::hash::content_hash;
use model::{ChatRequest, MessageRole};
use serde_json::Value;

/// Harness-only field listing the validators to apply to one line.
pub const CHECK_TYPE_FIELD: &str = "check_type";

/// One line of the test suite, ready to dispatch.
#[derive(Debug, Clone)]
pub struct TestCase {
    /// 1-based line number in the input file.
    pub data_index: usize,
    /// The line exactly as parsed.
    pub raw: Value,
    pub prepared: ChatRequest,
    /// Validator identifiers requested by the line; empty means run defaults.
    pub check_types: Vec<String>,
    /// Fingerprint of `prepared`, the key for incremental reuse.
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct RequestPreparer {
    model: String,
}

impl RequestPreparer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    /// Normalize a raw record into a sendable request plus its requested
    /// validators. The input is left untouched.
    pub fn prepare(&self, raw: &Value) -> VerifierResult<(ChatRequest, Vec<String>)> {
        let mut record = raw.clone();
        let Some(object) = record.as_object_mut() else {
            return Err(VerifierError::InvalidConfig {
                message: "test case must be a JSON object".to_string(),
            });
        };
        let check_types = object
            .remove(CHECK_TYPE_FIELD)
            .map(parse_check_types)
            .unwrap_or_default();

        let mut request: ChatRequest = serde_json::from_value(record)?;
        for message in &mut request.messages {
            if message.role == MessageRole::HiddenSystem {
                message.role = MessageRole::System;
            }
        }
        if !self.model.is_empty() {
            request.model = self.model.clone();
        }

        Ok((request, check_types))
    }

    pub fn test_case(&self, data_index: usize, raw: Value) -> VerifierResult<TestCase> {
        let (prepared, check_types) = self.prepare(&raw)?;
        let hash = content_hash(&prepared)?;
        Ok(TestCase {
            data_index,
            raw,
            prepared,
            check_types,
            hash,
        })
    }

    /// Parse one JSONL line. `line` is the 1-based line number.
    pub fn parse_line(&self, line: usize, text: &str) -> VerifierResult<TestCase> {
        let raw: Value =
            serde_json::from_str(text.trim()).map_err(|e| VerifierError::InvalidTestCase {
                line,
                message: e.to_string(),
            })?;
        self.test_case(line, raw)
            .map_err(|e| VerifierError::InvalidTestCase {
                line,
                message: e.to_string(),
            })
    }
}

/// Accepts a list of names or a single name.
fn parse_check_types(value: Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![name],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(name) => Some(name),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
