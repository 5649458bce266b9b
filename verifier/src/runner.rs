//! Run coordination: incremental reuse, bounded concurrent dispatch,
//! validation, persistence and the summary.

use crate::config::RunnerConfig;
use crate::dispatch::{AttemptCounter, Dispatcher, RetryPolicy};
use crate::error::{VerifierError, VerifierResult};
use crate::prepare::{RequestPreparer, TestCase};
use crate::reasoning::is_reasoning_only;
use crate::record::{Outcome, ResultRecord};
use crate::storage;
use crate::summary::Summary;
use crate::validators::{FieldMap, ValidationInput, Validator, ValidatorRegistry};
use futures::stream::{FuturesUnordered, StreamExt};
use model::ModelProvider;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

/// What a run did, for the caller to report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Prior successful records copied forward.
    pub reused: usize,
    /// Items sent to the endpoint.
    pub dispatched: usize,
    pub summary: Summary,
}

pub struct Runner {
    config: RunnerConfig,
    preparer: RequestPreparer,
    dispatcher: Dispatcher,
    registry: ValidatorRegistry,
    default_validators: Vec<Arc<dyn Validator>>,
    permits: Semaphore,
}

impl Runner {
    pub fn new(config: RunnerConfig, provider: Arc<dyn ModelProvider>) -> VerifierResult<Self> {
        config
            .validate()
            .map_err(|message| VerifierError::InvalidConfig { message })?;

        let registry = ValidatorRegistry::with_defaults(config.repeat_ngram);
        let default_validators = registry.resolve(&config.default_validators)?;
        let policy = RetryPolicy {
            max_attempts: config.max_retries,
            timeout: config.timeout,
            backoff_unit: config.backoff_unit,
            backoff_cap: config.backoff_cap,
        };

        info!(
            provider = provider.provider_name(),
            validators = ?config.default_validators,
            output = %config.output_path.display(),
            summary = %config.summary_path.display(),
            "Runner initialized"
        );

        Ok(Self {
            preparer: RequestPreparer::new(config.model.clone()),
            dispatcher: Dispatcher::new(provider, policy, Arc::new(AttemptCounter::new())),
            registry,
            default_validators,
            permits: Semaphore::new(config.concurrency),
            config,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    pub fn preparer(&self) -> &RequestPreparer {
        &self.preparer
    }

    /// Attempts made so far in the current run.
    pub fn attempts(&self) -> u64 {
        self.dispatcher.attempts().get()
    }

    /// Verify every line of the suite at `input`.
    pub async fn run(&self, input: &Path) -> VerifierResult<RunReport> {
        let cases = storage::read_test_cases(input, &self.preparer).await?;
        self.run_cases(cases).await
    }

    pub async fn run_cases(&self, cases: Vec<TestCase>) -> VerifierResult<RunReport> {
        self.dispatcher.attempts().reset();

        let prior = self.load_prior().await?;
        let mut results = Vec::with_capacity(cases.len());
        let mut scheduled = Vec::new();

        for case in cases {
            match prior.get(&case.hash).filter(|r| r.is_success()) {
                Some(record) => {
                    debug!(data_index = case.data_index, hash = %case.hash, "Reusing prior result");
                    let mut record = record.clone();
                    record.data_index = case.data_index;
                    results.push(record);
                }
                None => scheduled.push(case),
            }
        }

        let reused = results.len();
        let total = scheduled.len();
        info!(reused, scheduled = total, "Starting run");

        let mut pending: FuturesUnordered<_> =
            scheduled.iter().map(|case| self.process(case)).collect();
        let mut completed = 0;
        while let Some(record) = pending.next().await {
            completed += 1;
            info!(
                data_index = record.data_index,
                status = ?record.status,
                "Progress {}/{}",
                completed,
                total
            );
            results.push(record);
        }
        drop(pending);

        results.sort_by_key(|r| r.data_index);
        storage::write_results(&self.config.output_path, &results).await?;
        info!(path = %self.config.output_path.display(), "Results saved");

        let summary = self.summarize(&results);
        storage::write_summary(&self.config.summary_path, &summary).await?;
        info!(path = %self.config.summary_path.display(), "Summary saved");

        Ok(RunReport {
            reused,
            dispatched: total,
            summary,
        })
    }

    pub fn summarize(&self, records: &[ResultRecord]) -> Summary {
        Summary::compute(&self.config.model, records, self.attempts(), &self.registry)
    }

    /// Dispatch one case under the concurrency limit and validate the outcome.
    #[instrument(skip(self, case), fields(data_index = case.data_index))]
    pub async fn process(&self, case: &TestCase) -> ResultRecord {
        let permit = self.permits.acquire().await;
        let started = Instant::now();
        let outcome = self.dispatcher.send(&case.prepared).await;
        let elapsed = started.elapsed();
        drop(permit);

        self.build_record(case, outcome, elapsed)
    }

    fn build_record(&self, case: &TestCase, outcome: Outcome, elapsed: Duration) -> ResultRecord {
        let (finish_reason, text) = outcome.response.first_choice_parts();
        let input = ValidationInput {
            request: &case.prepared,
            response: &outcome.response,
            status: outcome.status,
            text: text.as_deref(),
        };

        let mut fields = FieldMap::new();
        for validator in self.registry.select(&case.check_types, &self.default_validators) {
            if let Some(produced) = run_validator(validator.as_ref(), &input) {
                fields.extend(produced);
            }
        }

        ResultRecord {
            data_index: case.data_index,
            request: case.prepared.clone(),
            provider: Some(outcome.response.provider().unwrap_or_default()),
            error_only_reasoning_checked: 1,
            error_only_reasoning: is_reasoning_only(&outcome.response),
            response: outcome.response,
            status: outcome.status,
            finish_reason,
            last_run_at: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            hash: case.hash.clone(),
            fields,
        }
    }

    async fn load_prior(&self) -> VerifierResult<HashMap<String, ResultRecord>> {
        let path = &self.config.output_path;
        if !self.config.incremental || !tokio::fs::try_exists(path).await? {
            return Ok(HashMap::new());
        }
        let records = storage::read_results(path).await?;
        info!(count = records.len(), path = %path.display(), "Loaded existing results");
        Ok(records
            .into_iter()
            .map(|record| (record.hash.clone(), record))
            .collect())
    }
}

/// A failing or panicking validator only loses its own fields.
fn run_validator(validator: &dyn Validator, input: &ValidationInput<'_>) -> Option<FieldMap> {
    match catch_unwind(AssertUnwindSafe(|| validator.validate(input))) {
        Ok(Ok(fields)) => Some(fields),
        Ok(Err(e)) => {
            error!(validator = validator.name(), error = %e, "Validator failed");
            None
        }
        Err(_) => {
            error!(validator = validator.name(), "Validator panicked");
            None
        }
    }
}
