//! Run-wide aggregate over the current result set.

use crate::reasoning::is_reasoning_only;
use crate::record::ResultRecord;
use crate::validators::{FieldMap, ValidatorRegistry};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub model: String,
    pub success_count: u64,
    pub failure_count: u64,
    /// Every dispatch attempt of this run, retries included.
    pub all_count: u64,
    #[serde(flatten)]
    pub validator_fields: FieldMap,
    pub error_only_reasoning_checked_count: u64,
    pub error_only_reasoning_count: u64,
    pub error_only_reasoning_rate: f64,
    pub success_rate: f64,
}

impl Summary {
    /// Rebuild the summary from scratch over `records`.
    ///
    /// Validators contribute only when at least one record carries their
    /// marker field, so the output reflects what actually ran.
    pub fn compute(
        model: &str,
        records: &[ResultRecord],
        all_count: u64,
        registry: &ValidatorRegistry,
    ) -> Self {
        let success_count = records.iter().filter(|r| r.is_success()).count() as u64;
        let failure_count = records.len() as u64 - success_count;

        let mut validator_fields = FieldMap::new();
        for validator in registry.iter() {
            let marker = validator.marker_field();
            if !records.iter().any(|r| r.has_field(marker)) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| validator.compute_summary(records))) {
                Ok(Ok(fields)) => validator_fields.extend(fields),
                Ok(Err(e)) => error!(
                    validator = validator.name(),
                    error = %e,
                    "Failed to compute validator summary"
                ),
                Err(_) => error!(validator = validator.name(), "Validator summary panicked"),
            }
        }

        // Recomputed from responses so records written before the flag existed count too.
        let checked = records.len() as u64;
        let reasoning_only = records
            .iter()
            .filter(|r| is_reasoning_only(&r.response))
            .count() as u64;

        Self {
            model: model.to_string(),
            success_count,
            failure_count,
            all_count,
            validator_fields,
            error_only_reasoning_checked_count: checked,
            error_only_reasoning_count: reasoning_only,
            error_only_reasoning_rate: ratio(reasoning_only, checked),
            success_rate: round2(ratio(success_count, all_count)),
        }
    }
}

fn ratio(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
