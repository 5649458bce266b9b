//! End-to-end runs against an in-process provider.

use async_trait::async_trait;
use model::{
    ChatCompletionChunk, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta,
    ChunkStream, Choice, FinishReason, FunctionCallDelta, ModelError, ModelProvider, ModelResult,
    ToolCallDelta,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use verifier::{ResultRecord, Runner, RunnerConfig, Status, Summary};

/// Answers with the last user message. A prompt of the form `fail:N` fails
/// its first N calls; `fail:always` never succeeds.
#[derive(Default)]
struct ScriptedProvider {
    calls: AtomicUsize,
    seen: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    fn prompt(request: &ChatRequest) -> String {
        request
            .messages
            .last()
            .and_then(ChatMessage::text)
            .unwrap_or_default()
    }

    fn should_fail(&self, prompt: &str) -> bool {
        let Some(script) = prompt.strip_prefix("fail:") else {
            return false;
        };
        let mut seen = self.seen.lock().unwrap();
        let count = seen.entry(prompt.to_string()).or_default();
        *count += 1;
        match script.parse::<u32>() {
            Ok(failures) => *count <= failures,
            Err(_) => true,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat(&self, request: &ChatRequest) -> ModelResult<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let prompt = Self::prompt(request);
        if self.should_fail(&prompt) {
            return Err(ModelError::ServiceUnavailable {
                message: format!("scripted failure for {}", prompt),
            });
        }
        Ok(ChatResponse {
            id: Some("resp".to_string()),
            object: Some("chat.completion".to_string()),
            created: Some(1),
            model: Some(request.model.clone()),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(format!("echo {}", prompt)),
                finish_reason: Some(FinishReason::Stop),
                extra: Default::default(),
            }],
            usage: None,
            provider: Some("scripted".to_string()),
            extra: Default::default(),
        })
    }

    async fn chat_stream(&self, _request: &ChatRequest) -> ModelResult<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let tool_delta = |name: Option<&str>, arguments: Option<&str>| ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: Some(ChunkDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: Some(0),
                        id: name.map(|_| "call_0".to_string()),
                        call_type: name.map(|_| "function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: name.map(String::from),
                            arguments: arguments.map(String::from),
                        }),
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let finish = ChatCompletionChunk {
            choices: vec![ChunkChoice {
                finish_reason: Some(FinishReason::ToolCalls),
                ..Default::default()
            }],
            ..Default::default()
        };
        let chunks: Vec<ModelResult<ChatCompletionChunk>> = vec![
            Ok(tool_delta(Some("f"), None)),
            Ok(tool_delta(None, Some("{\"a\":"))),
            Ok(tool_delta(None, Some("1}"))),
            Ok(finish),
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

fn line(prompt: &str) -> Value {
    json!({"messages": [{"role": "user", "content": prompt}]})
}

async fn write_suite(path: &Path, lines: &[Value]) {
    let text: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    tokio::fs::write(path, text).await.unwrap();
}

async fn read_records(path: &Path) -> Vec<ResultRecord> {
    let text = tokio::fs::read_to_string(path).await.unwrap();
    text.lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

async fn read_summary(path: &Path) -> Summary {
    let text = tokio::fs::read_to_string(path).await.unwrap();
    serde_json::from_str(&text).unwrap()
}

fn config(dir: &TempDir) -> RunnerConfig {
    RunnerConfig::new("eval-model")
        .with_output_path(dir.path().join("out/results.jsonl"))
        .with_summary_path(dir.path().join("out/summary.json"))
        .with_backoff(Duration::from_millis(1), 32)
        .with_concurrency(2)
}

#[tokio::test]
async fn test_results_sorted_and_summarized() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite.jsonl");
    write_suite(
        &suite,
        &[line("one"), line("two"), line("fail:2"), line("four"), line("five")],
    )
    .await;

    let provider = Arc::new(ScriptedProvider::default());
    let runner = Runner::new(config(&dir), provider.clone()).unwrap();
    let report = runner.run(&suite).await.unwrap();

    let records = read_records(&dir.path().join("out/results.jsonl")).await;
    assert_eq!(
        records.iter().map(|r| r.data_index).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );
    assert!(records.iter().all(|r| r.status == Status::Success));
    assert!(records.iter().all(|r| r.has_field("tool_calls_finish_reason")));

    assert_eq!(report.dispatched, 5);
    assert_eq!(report.reused, 0);
    assert_eq!(report.summary.all_count, 7);
    assert_eq!(report.summary.success_count, 5);
    assert_eq!(report.summary.success_rate, 0.71);
    assert_eq!(report.summary.validator_fields["tool_calls_finish_stop"], json!(5));
    assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);

    let on_disk = read_summary(&dir.path().join("out/summary.json")).await;
    assert_eq!(on_disk.model, "eval-model");
    assert_eq!(on_disk.all_count, report.summary.all_count);
    assert_eq!(on_disk.validator_fields, report.summary.validator_fields);
}

#[tokio::test]
async fn test_success_rate_three_items_five_attempts() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite.jsonl");
    write_suite(&suite, &[line("a"), line("b"), line("fail:2")]).await;

    let runner = Runner::new(config(&dir), Arc::new(ScriptedProvider::default())).unwrap();
    let summary = runner.run(&suite).await.unwrap().summary;
    assert_eq!(summary.all_count, 5);
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.success_rate, 0.6);
}

#[tokio::test]
async fn test_failures_are_recorded_not_raised() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite.jsonl");
    write_suite(&suite, &[line("ok"), line("fail:always")]).await;

    let runner = Runner::new(
        config(&dir).with_max_retries(2),
        Arc::new(ScriptedProvider::default()),
    )
    .unwrap();
    let summary = runner.run(&suite).await.unwrap().summary;

    let records = read_records(&dir.path().join("out/results.jsonl")).await;
    let failed = &records[1];
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.finish_reason, None);
    assert_eq!(failed.provider.as_deref(), Some(""));
    assert_eq!(records[0].provider.as_deref(), Some("scripted"));
    let error = serde_json::to_value(&failed.response).unwrap();
    assert!(error["error"]
        .as_str()
        .unwrap()
        .contains("scripted failure for fail:always"));
    assert_eq!(failed.fields["tool_calls_finish_reason"], Value::Null);

    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.all_count, 3);
}

#[tokio::test]
async fn test_incremental_reuses_successes_only() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite.jsonl");
    write_suite(&suite, &[line("keep"), line("fail:always")]).await;

    let first = Runner::new(
        config(&dir).with_max_retries(1),
        Arc::new(ScriptedProvider::default()),
    )
    .unwrap();
    first.run(&suite).await.unwrap();
    let before = read_records(&dir.path().join("out/results.jsonl")).await;

    // Reorder the suite and add a new line.
    write_suite(&suite, &[line("new"), line("fail:always"), line("keep")]).await;
    let provider = Arc::new(ScriptedProvider::default());
    let second = Runner::new(
        config(&dir).with_max_retries(1).with_incremental(true),
        provider.clone(),
    )
    .unwrap();
    let report = second.run(&suite).await.unwrap();

    assert_eq!(report.reused, 1);
    assert_eq!(report.dispatched, 2);
    assert_eq!(provider.calls(), 2);
    assert_eq!(report.summary.all_count, 2);

    let after = read_records(&dir.path().join("out/results.jsonl")).await;
    assert_eq!(after.len(), 3);
    let kept = &after[2];
    assert_eq!(kept.data_index, 3);
    assert_eq!(kept.hash, before[0].hash);
    assert_eq!(kept.status, before[0].status);
    assert_eq!(kept.response, before[0].response);
    assert_eq!(kept.fields, before[0].fields);
    assert_eq!(kept.last_run_at, before[0].last_run_at);
    assert_eq!(after[1].status, Status::Failed);
    assert_eq!(report.summary.success_count, 2);
}

#[tokio::test]
async fn test_incremental_without_prior_output_runs_everything() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite.jsonl");
    write_suite(&suite, &[line("a"), line("b")]).await;

    let runner = Runner::new(
        config(&dir).with_incremental(true),
        Arc::new(ScriptedProvider::default()),
    )
    .unwrap();
    let report = runner.run(&suite).await.unwrap();
    assert_eq!(report.reused, 0);
    assert_eq!(report.dispatched, 2);
}

#[tokio::test]
async fn test_streamed_tool_calls_are_reassembled_and_validated() {
    let dir = TempDir::new().unwrap();
    let suite = dir.path().join("suite.jsonl");
    write_suite(
        &suite,
        &[json!({
            "stream": true,
            "messages": [{"role": "_input", "content": "use tools"}, {"role": "user", "content": "go"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "f",
                    "parameters": {
                        "type": "object",
                        "properties": {"a": {"type": "integer"}},
                        "required": ["a"]
                    }
                }
            }],
            "check_type": ["tool_calls"]
        })],
    )
    .await;

    let runner = Runner::new(config(&dir), Arc::new(ScriptedProvider::default())).unwrap();
    let summary = runner.run(&suite).await.unwrap().summary;

    let records = read_records(&dir.path().join("out/results.jsonl")).await;
    let record = &records[0];
    assert_eq!(record.request.messages[0].role, model::MessageRole::System);
    assert_eq!(record.finish_reason, Some(FinishReason::ToolCalls));

    let response = serde_json::to_value(&record.response).unwrap();
    let calls = response["choices"][0]["message"]["tool_calls"].as_array().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["function"]["name"], "f");
    assert_eq!(calls[0]["function"]["arguments"], "{\"a\":1}");

    assert_eq!(record.fields["tool_calls_valid"], json!(true));
    assert_eq!(summary.validator_fields["tool_calls_successful_count"], json!(1));
    assert_eq!(summary.validator_fields["tool_calls_count_distribution"], json!({"1": 1}));
}
