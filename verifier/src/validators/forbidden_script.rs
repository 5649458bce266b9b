//! Detection of characters from a reserved Unicode block in response text.

use super::{marked_records, to_fields, FieldMap, ValidationInput, Validator, ValidatorResult};
use crate::record::ResultRecord;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

const NAME: &str = "contains_russian_characters_unicode";
const PREFIX: &str = "language_following_";
const MARKER: &str = "language_following_checked";

/// The Cyrillic block.
pub const CYRILLIC: RangeInclusive<char> = '\u{0400}'..='\u{04FF}';

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LanguageFields {
    #[serde(default)]
    language_following_checked: bool,
    #[serde(default)]
    language_following_valid: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
struct LanguageSummary {
    language_following_checked_count: u64,
    language_following_valid_count: u64,
    language_following_invalid_count: u64,
}

#[derive(Debug, Clone)]
pub struct ForbiddenScriptValidator {
    block: RangeInclusive<char>,
}

impl ForbiddenScriptValidator {
    pub fn new(block: RangeInclusive<char>) -> Self {
        Self { block }
    }

    pub fn cyrillic() -> Self {
        Self::new(CYRILLIC)
    }

    pub fn contains_forbidden(&self, text: &str) -> bool {
        text.chars().any(|c| self.block.contains(&c))
    }
}

impl Validator for ForbiddenScriptValidator {
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
        let fields = match input.checkable_text() {
            Some(text) => LanguageFields {
                language_following_checked: true,
                language_following_valid: Some(!self.contains_forbidden(text)),
            },
            None => LanguageFields::default(),
        };
        to_fields(NAME, &fields)
    }

    fn compute_summary(&self, records: &[ResultRecord]) -> ValidatorResult<FieldMap> {
        let mut summary = LanguageSummary::default();
        for fields in marked_records::<LanguageFields>(records, NAME, PREFIX, MARKER) {
            if !fields.language_following_checked {
                continue;
            }
            summary.language_following_checked_count += 1;
            if fields.language_following_valid == Some(true) {
                summary.language_following_valid_count += 1;
            } else {
                summary.language_following_invalid_count += 1;
            }
        }
        to_fields(NAME, &summary)
    }
}
