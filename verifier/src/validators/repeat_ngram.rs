//! Degenerate repetition: a short substring recurring many times.

use super::{marked_records, to_fields, FieldMap, ValidationInput, Validator, ValidatorResult};
use crate::record::ResultRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const NAME: &str = "repeat_n_gram";
const PREFIX: &str = "error_repeating_";
const MARKER: &str = "error_repeating_checked";

/// Window length and the occurrence count that counts as degenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatNGramConfig {
    pub n: usize,
    pub repeat_count: usize,
}

impl Default for RepeatNGramConfig {
    fn default() -> Self {
        Self {
            n: 3,
            repeat_count: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RepeatFields {
    #[serde(default)]
    error_repeating_checked: bool,
    #[serde(default)]
    error_repeating_valid: Option<bool>,
    #[serde(default, skip_deserializing)]
    error_repeating_config: Option<RepeatNGramConfig>,
}

#[derive(Debug, Serialize)]
struct RepeatSummary {
    error_repeating_checked_count: u64,
    error_repeating_valid_count: u64,
    error_repeating_invalid_count: u64,
    error_repeating_config: RepeatNGramConfig,
}

/// True if some `n`-character window of `text` occurs at least
/// `repeat_count` times without overlapping.
pub fn has_repeated_ngram(text: &str, config: RepeatNGramConfig) -> bool {
    if config.n == 0 {
        return false;
    }
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    if boundaries.len() <= config.n {
        return false;
    }

    let mut seen = HashSet::new();
    boundaries.windows(config.n + 1).any(|window| {
        let ngram = &text[window[0]..window[config.n]];
        seen.insert(ngram) && text.matches(ngram).count() >= config.repeat_count
    })
}

#[derive(Debug, Clone, Default)]
pub struct RepeatNGramValidator {
    config: RepeatNGramConfig,
}

impl RepeatNGramValidator {
    pub fn new(config: RepeatNGramConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> RepeatNGramConfig {
        self.config
    }
}

impl Validator for RepeatNGramValidator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn field_prefix(&self) -> &'static str {
        PREFIX
    }

    fn marker_field(&self) -> &'static str {
        MARKER
    }

    fn validate(&self, input: &ValidationInput<'_>) -> ValidatorResult<FieldMap> {
        let mut fields = RepeatFields {
            error_repeating_config: Some(self.config),
            ..RepeatFields::default()
        };
        if let Some(text) = input.checkable_text() {
            fields.error_repeating_checked = true;
            fields.error_repeating_valid = Some(!has_repeated_ngram(text, self.config));
        }
        to_fields(NAME, &fields)
    }

    fn compute_summary(&self, records: &[ResultRecord]) -> ValidatorResult<FieldMap> {
        let mut summary = RepeatSummary {
            error_repeating_checked_count: 0,
            error_repeating_valid_count: 0,
            error_repeating_invalid_count: 0,
            error_repeating_config: self.config,
        };
        for fields in marked_records::<RepeatFields>(records, NAME, PREFIX, MARKER) {
            if !fields.error_repeating_checked {
                continue;
            }
            summary.error_repeating_checked_count += 1;
            if fields.error_repeating_valid == Some(true) {
                summary.error_repeating_valid_count += 1;
            } else {
                summary.error_repeating_invalid_count += 1;
            }
        }
        to_fields(NAME, &summary)
    }
}
