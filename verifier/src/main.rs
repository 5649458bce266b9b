use clap::Parser;
use model::{OpenAiProvider, ProviderConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use verifier::config::{parse_extra_body, parse_validator_list, resolve_api_key};
use verifier::{FileConfig, RepeatNGramConfig, Runner, RunnerConfig, VerifierError};

/// Verify a chat-completion endpoint against a JSON Lines test suite.
///
/// Each line of FILE is a complete request body (messages, optional tools),
/// optionally carrying a `check_type` list naming the validators to apply.
#[derive(Parser)]
#[command(name = "verifier")]
#[command(version)]
struct Cli {
    /// Test suite in JSON Lines format
    file: PathBuf,
    /// Model name sent with every request
    #[arg(long)]
    model: Option<String>,
    /// API endpoint, e.g. https://api.example.com/v1
    #[arg(long)]
    base_url: Option<String>,
    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Maximum number of concurrent requests [default: 5]
    #[arg(long)]
    concurrency: Option<usize>,
    /// Detailed results [default: results.jsonl]
    #[arg(long)]
    output: Option<PathBuf>,
    /// Aggregated summary [default: summary.json]
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Per-request timeout in seconds [default: 600]
    #[arg(long)]
    timeout: Option<u64>,
    /// Attempts per request, retries included [default: 3]
    #[arg(long)]
    retries: Option<u32>,
    /// Transport-level retries inside the HTTP client [default: 2]
    #[arg(long)]
    client_retries: Option<u32>,
    /// JSON object merged into every request body
    #[arg(long)]
    extra_body: Option<String>,
    /// Only rerun failed or new requests; keep prior successes
    #[arg(long)]
    incremental: bool,
    /// Comma-separated validators for lines without check_type [default: tool_calls]
    #[arg(long)]
    validators: Option<String>,
    /// Window length for the repetition check [default: 3]
    #[arg(long)]
    ngram_size: Option<usize>,
    /// Occurrences that count as repetition [default: 4]
    #[arg(long)]
    ngram_repeat: Option<usize>,
    /// TOML file with defaults for any of the options above
    #[arg(long)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "Verification aborted");
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), VerifierError> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path).await?,
        None => FileConfig::default(),
    };
    let (provider_config, runner_config) = resolve(&cli, file)?;

    let provider = OpenAiProvider::new(provider_config)?;
    let runner = Runner::new(runner_config, Arc::new(provider))?;
    let report = runner.run(&cli.file).await?;

    info!(
        reused = report.reused,
        dispatched = report.dispatched,
        success = report.summary.success_count,
        failed = report.summary.failure_count,
        attempts = report.summary.all_count,
        success_rate = report.summary.success_rate,
        "Verification finished"
    );
    Ok(())
}

/// Flags win over the config file, which wins over built-in defaults.
fn resolve(cli: &Cli, file: FileConfig) -> Result<(ProviderConfig, RunnerConfig), VerifierError> {
    let model = cli
        .model
        .clone()
        .or(file.model.clone())
        .ok_or_else(|| missing("--model"))?;
    let base_url = cli
        .base_url
        .clone()
        .or(file.base_url.clone())
        .ok_or_else(|| missing("--base-url"))?;

    let extra_body = match &cli.extra_body {
        Some(text) => parse_extra_body(text)?,
        None => file.extra_body()?,
    };

    let timeout = Duration::from_secs(cli.timeout.or(file.timeout).unwrap_or(600));
    let mut provider = ProviderConfig::new()
        .with_base_url(base_url)
        .with_api_key(resolve_api_key(cli.api_key.clone().or(file.api_key.clone())))
        .with_timeout(timeout)
        .with_extra_body(extra_body);
    if let Some(retries) = cli.client_retries.or(file.client_retries) {
        provider = provider.with_max_retries(retries);
    }

    let mut runner = RunnerConfig::new(model)
        .with_timeout(timeout)
        .with_incremental(cli.incremental || file.incremental.unwrap_or(false));
    if let Some(concurrency) = cli.concurrency.or(file.concurrency) {
        runner = runner.with_concurrency(concurrency);
    }
    if let Some(output) = cli.output.clone().or(file.output.clone()) {
        runner = runner.with_output_path(output);
    }
    if let Some(summary) = cli.summary.clone().or(file.summary.clone()) {
        runner = runner.with_summary_path(summary);
    }
    if let Some(retries) = cli.retries.or(file.retries) {
        runner = runner.with_max_retries(retries);
    }
    let validators = match &cli.validators {
        Some(list) => Some(parse_validator_list(list)),
        None => file.validators.clone(),
    };
    if let Some(validators) = validators {
        runner = runner.with_default_validators(validators);
    }
    let defaults = RepeatNGramConfig::default();
    runner = runner.with_repeat_ngram(RepeatNGramConfig {
        n: cli.ngram_size.or(file.ngram_size).unwrap_or(defaults.n),
        repeat_count: cli
            .ngram_repeat
            .or(file.ngram_repeat)
            .unwrap_or(defaults.repeat_count),
    });

    Ok((provider, runner))
}

fn missing(flag: &str) -> VerifierError {
    VerifierError::InvalidConfig {
        message: format!("{} is required (flag or config file)", flag),
    }
}
