//! Reconstruction of a streamed completion into the non-streaming shape.
//!
//! Text and reasoning fragments are concatenated in arrival order. Tool-call
//! fragments are grouped by their slot index: the first fragment for a slot
//! establishes the call, later fragments overwrite a non-empty name and
//! append to the raw argument string. The last non-empty finish reason wins
//! and defaults to `stop` when the stream never reports one.

use crate::provider::{ChunkStream, ModelError, ModelResult};
use crate::types::{
    ChatCompletionChunk, ChatMessage, ChatResponse, Choice, Extra, FinishReason, FunctionCall,
    MessageContent, MessageRole, ToolCall, ToolCallDelta, Usage,
};
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ToolCallSlot {
    id: Option<String>,
    call_type: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct StreamAggregator {
    model: String,
    id: Option<String>,
    created: Option<i64>,
    provider: Option<String>,
    usage: Option<Usage>,
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u32, ToolCallSlot>,
    finish_reason: Option<FinishReason>,
    events: usize,
    skipped: usize,
}

impl StreamAggregator {
    /// `model` is reported on the rebuilt response.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Drain `stream` and rebuild the response.
    ///
    /// Malformed events are logged and skipped; any other stream error
    /// aborts aggregation and no partial response is returned.
    pub async fn collect(mut stream: ChunkStream, model: &str) -> ModelResult<ChatResponse> {
        let mut aggregator = Self::new(model);
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => aggregator.push(chunk),
                Err(ModelError::MalformedChunk { message }) => {
                    warn!(%message, "Skipping malformed stream event");
                    aggregator.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            events = aggregator.events,
            skipped = aggregator.skipped,
            "Stream aggregated"
        );
        Ok(aggregator.finish())
    }

    pub fn push(&mut self, chunk: ChatCompletionChunk) {
        self.events += 1;

        if let Some(id) = chunk.id.filter(|id| !id.is_empty()) {
            self.id = Some(id);
        }
        if let Some(created) = chunk.created.filter(|created| *created != 0) {
            self.created = Some(created);
        }
        if let Some(provider) = chunk.provider.filter(|p| !p.is_empty()) {
            self.provider = Some(provider);
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            warn!("Empty choices in stream event");
            self.skipped += 1;
            return;
        };

        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content {
                self.content.push_str(&content);
            }
            for reasoning in [delta.reasoning, delta.reasoning_content].into_iter().flatten() {
                self.reasoning.push_str(&reasoning);
            }
            for fragment in delta.tool_calls.unwrap_or_default() {
                self.push_tool_call(fragment);
            }
        }

        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            self.finish_reason = Some(reason);
        }
        if choice.usage.is_some() {
            self.usage = choice.usage;
        }
    }

    fn push_tool_call(&mut self, fragment: ToolCallDelta) {
        let slot = self
            .tool_calls
            .entry(fragment.index.unwrap_or(0))
            .or_insert_with(|| ToolCallSlot {
                id: fragment.id.clone(),
                call_type: fragment.call_type.clone(),
                ..Default::default()
            });

        if slot.id.is_none() {
            slot.id = fragment.id;
        }
        if slot.call_type.is_none() {
            slot.call_type = fragment.call_type;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                slot.name = name;
            }
            if let Some(arguments) = function.arguments {
                slot.arguments.push_str(&arguments);
            }
        }
    }

    pub fn finish(self) -> ChatResponse {
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(
                self.tool_calls
                    .into_values()
                    .map(|slot| ToolCall {
                        id: slot.id,
                        call_type: slot.call_type,
                        function: FunctionCall {
                            name: slot.name,
                            arguments: Value::String(slot.arguments),
                        },
                        extra: Extra::new(),
                    })
                    .collect(),
            )
        };

        let message = ChatMessage {
            role: MessageRole::Assistant,
            content: Some(MessageContent::Text(self.content)),
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
            reasoning_content: None,
            tool_calls,
            tool_call_id: None,
            name: None,
            extra: Extra::new(),
        };

        ChatResponse {
            id: self.id,
            object: Some("chat.completion".to_string()),
            created: self.created,
            model: Some(self.model),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some(self.finish_reason.unwrap_or(FinishReason::Stop)),
                extra: Extra::new(),
            }],
            usage: self.usage,
            provider: self.provider,
            extra: Extra::new(),
        }
    }
}
