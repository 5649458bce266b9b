use crate::error::{VerifierError, VerifierResult};
use crate::validators::RepeatNGramConfig;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Settings for one verification run.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Model name sent with every request
    pub model: String,
    /// Maximum number of dispatches in flight
    pub concurrency: usize,
    pub output_path: PathBuf,
    pub summary_path: PathBuf,
    /// Deadline for a single dispatch attempt
    pub timeout: Duration,
    /// Attempts per item, retries included
    pub max_retries: u32,
    /// Backoff before retry `k` is `backoff_unit * min(2^k, backoff_cap)`
    pub backoff_unit: Duration,
    pub backoff_cap: u32,
    /// Reuse prior successful records with a matching hash
    pub incremental: bool,
    /// Validators applied to lines without their own `check_type`
    pub default_validators: Vec<String>,
    pub repeat_ngram: RepeatNGramConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            concurrency: 5,
            output_path: PathBuf::from("results.jsonl"),
            summary_path: PathBuf::from("summary.json"),
            timeout: Duration::from_secs(600),
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            backoff_cap: 32,
            incremental: false,
            default_validators: vec!["tool_calls".to_string()],
            repeat_ngram: RepeatNGramConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, unit: Duration, cap: u32) -> Self {
        self.backoff_unit = unit;
        self.backoff_cap = cap;
        self
    }

    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn with_default_validators(mut self, names: Vec<String>) -> Self {
        self.default_validators = names;
        self
    }

    pub fn with_repeat_ngram(mut self, config: RepeatNGramConfig) -> Self {
        self.repeat_ngram = config;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.is_empty() {
            return Err("Model name cannot be empty".to_string());
        }

        if self.concurrency == 0 {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_retries == 0 {
            return Err("Retries must be at least 1".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.repeat_ngram.n == 0 || self.repeat_ngram.repeat_count == 0 {
            return Err("N-gram size and repeat count must be at least 1".to_string());
        }

        Ok(())
    }
}

/// Values accepted from a `--config` TOML file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub concurrency: Option<usize>,
    pub output: Option<PathBuf>,
    pub summary: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub client_retries: Option<u32>,
    pub incremental: Option<bool>,
    pub validators: Option<Vec<String>>,
    pub ngram_size: Option<usize>,
    pub ngram_repeat: Option<usize>,
    /// Table merged into every request body.
    pub extra_body: Option<toml::Table>,
}

impl FileConfig {
    pub fn parse(text: &str) -> VerifierResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub async fn load(path: &Path) -> VerifierResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::parse(&text)
    }

    pub fn extra_body(&self) -> VerifierResult<Map<String, Value>> {
        let Some(table) = &self.extra_body else {
            return Ok(Map::new());
        };
        match serde_json::to_value(table)? {
            Value::Object(map) => Ok(map),
            _ => Err(VerifierError::InvalidExtraBody {
                message: "extra_body must be a table".to_string(),
            }),
        }
    }
}

/// Parse the `--extra-body` argument. Only JSON objects are accepted.
pub fn parse_extra_body(text: &str) -> VerifierResult<Map<String, Value>> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| VerifierError::InvalidExtraBody {
            message: e.to_string(),
        })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(VerifierError::InvalidExtraBody {
            message: format!("expected a JSON object, got {}", other),
        }),
    }
}

/// The explicit key wins; otherwise the environment is consulted.
pub fn resolve_api_key(explicit: Option<String>) -> Option<String> {
    explicit
        .filter(|key| !key.is_empty())
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()))
}

/// Split a comma-separated validator list.
pub fn parse_validator_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serial_test::serial;

    #[test]
    fn test_runner_defaults() {
        let config = RunnerConfig::new("m");
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.default_validators, vec!["tool_calls"]);
        assert_eq!(config.output_path, PathBuf::from("results.jsonl"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runner_validation() {
        assert!(RunnerConfig::default().validate().is_err());
        assert!(RunnerConfig::new("m").with_concurrency(0).validate().is_err());
        assert!(RunnerConfig::new("m").with_max_retries(0).validate().is_err());
        assert!(RunnerConfig::new("m")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RunnerConfig::new("m")
            .with_repeat_ngram(RepeatNGramConfig { n: 0, repeat_count: 4 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_extra_body_must_be_object() {
        let map = parse_extra_body(r#"{"top_k": 5, "thinking": {"type": "enabled"}}"#).unwrap();
        assert_eq!(map["top_k"], json!(5));

        assert!(matches!(
            parse_extra_body("[1]"),
            Err(VerifierError::InvalidExtraBody { .. })
        ));
        assert!(matches!(
            parse_extra_body("{oops"),
            Err(VerifierError::InvalidExtraBody { .. })
        ));
    }

    #[test]
    fn test_file_config() {
        let config = FileConfig::parse(
            r#"
            model = "kimi"
            concurrency = 8
            validators = ["tool_calls", "repeat_n_gram"]

            [extra_body]
            top_p = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.model.as_deref(), Some("kimi"));
        assert_eq!(config.concurrency, Some(8));
        assert_eq!(config.base_url, None);
        assert_eq!(config.extra_body().unwrap()["top_p"], json!(0.9));

        assert!(matches!(
            FileConfig::parse("unknown_key = 1"),
            Err(VerifierError::ConfigFile(_))
        ));
    }

    #[test]
    fn test_validator_list() {
        assert_eq!(
            parse_validator_list("tool_calls, repeat_n_gram,,"),
            vec!["tool_calls", "repeat_n_gram"]
        );
    }

    #[test]
    #[serial]
    fn test_api_key_falls_back_to_env() {
        std::env::set_var(API_KEY_ENV, "from-env");
        assert_eq!(resolve_api_key(None).as_deref(), Some("from-env"));
        assert_eq!(
            resolve_api_key(Some("explicit".to_string())).as_deref(),
            Some("explicit")
        );
        std::env::remove_var(API_KEY_ENV);
        assert_eq!(resolve_api_key(None), None);
    }
}
