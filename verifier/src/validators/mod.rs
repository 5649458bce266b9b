//! Pluggable response validators.
//!
//! A [`Validator`] inspects one request/response pair and returns a flat map
//! of fields that all start with its own prefix, so several validators can
//! write into the same result record without colliding. The same validator
//! later reduces every record of a run into summary fields, skipping records
//! that do not carry its fields.
//!
//! Validators are stateless per item; run-wide settings are fixed at
//! construction. That is what lets the runner call them from concurrent
//! tasks without locking.

pub mod forbidden_script;
pub mod repeat_ngram;
pub mod tool_calls;

pub use forbidden_script::ForbiddenScriptValidator;
pub use repeat_ngram::{RepeatNGramConfig, RepeatNGramValidator};
pub use tool_calls::{ToolCallIssue, ToolCallIssueKind, ToolCallsValidator};

use crate::error::{VerifierError, VerifierResult};
use crate::record::{ResponsePayload, ResultRecord, Status};
use model::ChatRequest;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub type FieldMap = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fields of {validator} did not serialize to an object")]
    NotAnObject { validator: &'static str },
}

pub type ValidatorResult<T> = Result<T, ValidatorError>;

/// Everything a validator may look at for one item.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    pub request: &'a ChatRequest,
    pub response: &'a ResponsePayload,
    pub status: Status,
    /// Text content of the first choice.
    pub text: Option<&'a str>,
}

impl ValidationInput<'_> {
    /// Non-empty text of a successful response.
    pub fn checkable_text(&self) -> Option<&str> {
        self.text
            .filter(|text| self.status.is_success() && !text.is_empty())
    }
}

pub trait Validator: Send + Sync {
    /// Identifier used by the `check_type` field and `--validators`.
    fn name(&self) -> &'static str;

    /// Prefix shared by every field this validator emits.
    fn field_prefix(&self) -> &'static str;

    /// Field whose presence on a record means this validator ran on it.
    fn marker_field(&self) -> &'static str;

    fn validate(&self, input: &ValidationInput<'_>) -> ValidatorResult<FieldMap>;

    fn compute_summary(&self, records: &[ResultRecord]) -> ValidatorResult<FieldMap>;
}

/// Serialize a typed field struct into a flat field map.
pub(crate) fn to_fields<T: Serialize>(
    validator: &'static str,
    fields: &T,
) -> ValidatorResult<FieldMap> {
    match serde_json::to_value(fields)? {
        Value::Object(map) => Ok(map),
        _ => Err(ValidatorError::NotAnObject { validator }),
    }
}

/// Read a validator's typed view of a record. Unrelated keys are ignored.
pub(crate) fn from_fields<T: DeserializeOwned>(record: &ResultRecord, prefix: &str) -> ValidatorResult<T> {
    let own: FieldMap = record
        .fields
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(serde_json::from_value(Value::Object(own))?)
}

/// Typed views of the records carrying `marker`. A record whose fields do
/// not decode is logged and left out of the reduction.
pub(crate) fn marked_records<'a, T: DeserializeOwned + 'a>(
    records: &'a [ResultRecord],
    validator: &'static str,
    prefix: &'a str,
    marker: &'a str,
) -> impl Iterator<Item = T> + 'a {
    records
        .iter()
        .filter(move |record| record.has_field(marker))
        .filter_map(move |record| match from_fields(record, prefix) {
            Ok(fields) => Some(fields),
            Err(e) => {
                warn!(
                    validator,
                    data_index = record.data_index,
                    error = %e,
                    "Skipping record with undecodable fields"
                );
                None
            }
        })
}

/// Name to validator lookup for the closed set of known validators.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: BTreeMap<&'static str, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the three reference validators.
    pub fn with_defaults(repeat: RepeatNGramConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ToolCallsValidator::new()));
        registry.register(Arc::new(ForbiddenScriptValidator::cyrillic()));
        registry.register(Arc::new(RepeatNGramValidator::new(repeat)));
        registry
    }

    pub fn register(&mut self, validator: Arc<dyn Validator>) {
        self.validators.insert(validator.name(), validator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.validators.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Validator>> {
        self.validators.values()
    }

    /// Strict lookup used for run configuration.
    pub fn resolve(&self, names: &[String]) -> VerifierResult<Vec<Arc<dyn Validator>>> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| VerifierError::UnknownValidator {
                    name: name.clone(),
                })
            })
            .collect()
    }

    /// Validators for one item: its own list if it has one, else `defaults`.
    /// Unknown names are logged and skipped.
    pub fn select(
        &self,
        requested: &[String],
        defaults: &[Arc<dyn Validator>],
    ) -> Vec<Arc<dyn Validator>> {
        if requested.is_empty() {
            return defaults.to_vec();
        }
        requested
            .iter()
            .filter_map(|name| {
                let found = self.get(name);
                if found.is_none() {
                    warn!(check_type = %name, "Unknown check_type");
                }
                found
            })
            .collect()
    }
}
