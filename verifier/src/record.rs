use model::{ChatRequest, ChatResponse, FinishReason};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// What a dispatch produced: a completion, or the last error seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Completion(ChatResponse),
    Error(ErrorPayload),
}

impl ResponsePayload {
    pub fn completion(&self) -> Option<&ChatResponse> {
        match self {
            Self::Completion(response) => Some(response),
            Self::Error(_) => None,
        }
    }

    pub fn provider(&self) -> Option<String> {
        self.completion().and_then(|r| r.provider.clone())
    }

    /// Finish reason and text content of the first choice, when present.
    pub fn first_choice_parts(&self) -> (Option<FinishReason>, Option<String>) {
        match self.completion().and_then(ChatResponse::first_choice) {
            Some(choice) => (choice.finish_reason.clone(), choice.message.text()),
            None => (None, None),
        }
    }
}

/// Result of one dispatch, including all of its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: Status,
    pub response: ResponsePayload,
}

impl Outcome {
    pub fn success(response: ChatResponse) -> Self {
        Self {
            status: Status::Success,
            response: ResponsePayload::Completion(response),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            response: ResponsePayload::Error(ErrorPayload {
                error: error.into(),
            }),
        }
    }
}

/// One line of the results file.
///
/// Validator output is kept flat next to the fixed columns; each validator
/// owns the keys starting with its prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub data_index: usize,
    pub request: ChatRequest,
    pub response: ResponsePayload,
    pub status: Status,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    pub last_run_at: String,
    #[serde(default)]
    pub duration_ms: u64,
    pub hash: String,
    /// Written as `""` when the response names no provider; `null` is
    /// accepted on read.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub error_only_reasoning_checked: u8,
    #[serde(default)]
    pub error_only_reasoning: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ResultRecord {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }
}
