use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// Extra, provider-specific keys carried through untouched.
pub type Extra = Map<String, Value>;

/// Author of a message. Vendor-specific roles are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageRole {
    System,
    Developer,
    User,
    #[default]
    Assistant,
    Tool,
    Function,
    /// Test-suite marker for instructions that must go out as `system`.
    HiddenSystem,
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Function => "function",
            Self::HiddenSystem => "_input",
            Self::Other(role) => role,
        }
    }
}

impl From<String> for MessageRole {
    fn from(role: String) -> Self {
        match role.as_str() {
            "system" => Self::System,
            "developer" => Self::Developer,
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "function" => Self::Function,
            "_input" => Self::HiddenSystem,
            _ => Self::Other(role),
        }
    }
}

impl From<MessageRole> for String {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::Other(role) => role,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message content is either plain text or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Value>),
}

impl MessageContent {
    /// Flattens the content to text. Non-text parts are ignored.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Defaults to an empty assistant message, which is what a choice without
/// a `message` object amounts to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ChatMessage {
    fn with_role(role: MessageRole, content: Option<MessageContent>) -> Self {
        Self {
            role,
            content,
            ..Self::default()
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, Some(content.into().into()))
    }

    pub fn hidden_system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::HiddenSystem, Some(content.into().into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, Some(content.into().into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, Some(content.into().into()))
    }

    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(MessageRole::Assistant, content.map(Into::into));
        message.tool_calls = Some(tool_calls);
        message
    }

    pub fn tool_response(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(MessageRole::Tool, Some(content.into().into()));
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Text of the message, if any content is present.
    pub fn text(&self) -> Option<String> {
        self.content.as_ref().map(MessageContent::to_text)
    }

    /// Reasoning text under either of the field names vendors use.
    pub fn reasoning_text(&self) -> Option<&str> {
        [&self.reasoning, &self.reasoning_content]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|text| !text.is_empty())
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    pub function: FunctionCall,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: Some(id.into()),
            call_type: Some("function".to_string()),
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
            extra: Extra::new(),
        }
    }
}

/// Arguments stay as received: usually a JSON-encoded string, sometimes an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionDefinition>,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_tool_type() -> String {
    "function".to_string()
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: default_tool_type(),
            function: Some(FunctionDefinition {
                name: name.into(),
                description: Some(description.into()),
                parameters: Some(parameters),
                extra: Extra::new(),
            }),
            extra: Extra::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.function.as_ref().map(|f| f.name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Kept as sent; some suites write it as a float.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<Number>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            stream: None,
            temperature: None,
            max_tokens: None,
            extra: Extra::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens.into());
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Looks up an offered tool by function name.
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|tool| tool.name() == Some(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ChatResponse {
    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Why the model stopped. Unrecognized reasons are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    FunctionCall,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
            Self::FunctionCall => "function_call",
            Self::Other(reason) => reason,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<String> for FinishReason {
    fn from(reason: String) -> Self {
        match reason.as_str() {
            "stop" => Self::Stop,
            "tool_calls" => Self::ToolCalls,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "function_call" => Self::FunctionCall,
            _ => Self::Other(reason),
        }
    }
}

impl From<&str> for FinishReason {
    fn from(reason: &str) -> Self {
        Self::from(reason.to_string())
    }
}

impl From<FinishReason> for String {
    fn from(reason: FinishReason) -> Self {
        match reason {
            FinishReason::Other(reason) => reason,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts. Some servers send `null` for counts they do not track.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One `chat.completion.chunk` event of a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChunkDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Some vendors report usage per choice instead of per chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<FunctionCallDelta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_constructors() {
        let sys_msg = ChatMessage::system("You are helpful");
        assert_eq!(sys_msg.role, MessageRole::System);
        assert_eq!(sys_msg.text(), Some("You are helpful".to_string()));

        let hidden = ChatMessage::hidden_system("secret rules");
        assert_eq!(hidden.role, MessageRole::HiddenSystem);

        let tool_response = ChatMessage::tool_response("call_123", "Result");
        assert_eq!(tool_response.role, MessageRole::Tool);
        assert_eq!(tool_response.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_chat_request_builder() {
        let messages = vec![ChatMessage::user("Hello")];
        let request = ChatRequest::new("kimi-k2", messages)
            .with_temperature(0.7)
            .with_max_tokens(1000)
            .with_stream(true);

        assert_eq!(request.model, "kimi-k2");
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(Number::from(1000u64)));
        assert!(request.is_streaming());
    }

    #[test]
    fn test_hidden_role_wire_name() {
        let json = serde_json::to_value(ChatMessage::hidden_system("x")).unwrap();
        assert_eq!(json["role"], "_input");

        let parsed: ChatMessage =
            serde_json::from_value(json!({"role": "_input", "content": "x"})).unwrap();
        assert_eq!(parsed.role, MessageRole::HiddenSystem);
    }

    #[test]
    fn test_vendor_roles_are_kept() {
        let parsed: ChatMessage =
            serde_json::from_value(json!({"role": "ipython", "content": "{}"})).unwrap();
        assert_eq!(parsed.role, MessageRole::Other("ipython".to_string()));
        assert_eq!(serde_json::to_value(&parsed).unwrap()["role"], "ipython");

        let known: MessageRole = serde_json::from_value(json!("developer")).unwrap();
        assert_eq!(known, MessageRole::Developer);
        assert_eq!(known.to_string(), "developer");
    }

    #[test]
    fn test_float_max_tokens_is_kept_as_sent() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1024.0
        }))
        .unwrap();
        assert_eq!(request.max_tokens.as_ref().and_then(Number::as_f64), Some(1024.0));
        assert_eq!(serde_json::to_value(&request).unwrap()["max_tokens"], json!(1024.0));
    }

    #[test]
    fn test_choice_without_message_reads_as_empty_assistant() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"index": 0, "finish_reason": "stop"}]}"#,
        )
        .unwrap();
        let message = &response.choices[0].message;
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.text(), None);
        assert!(!message.has_tool_calls());
    }

    #[test]
    fn test_message_without_role_defaults_to_assistant() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"index": 0, "message": {"content": "hi"}, "finish_reason": "stop"}]}"#,
        )
        .unwrap();
        assert_eq!(response.choices[0].message.role, MessageRole::Assistant);
        assert_eq!(response.choices[0].message.text(), Some("hi".to_string()));
    }

    #[test]
    fn test_usage_tolerates_null_counts() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": null, "total_tokens": null}}"#,
        )
        .unwrap();
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(3));
        assert_eq!(usage.completion_tokens, None);
        assert_eq!(usage.total_tokens, None);
    }

    #[test]
    fn test_request_keeps_unknown_fields() {
        let raw = json!({
            "messages": [{"role": "user", "content": "hi", "cache_control": {"type": "ephemeral"}}],
            "tool_choice": "auto",
            "top_p": 0.95,
            "temperature": 0.6
        });
        let request: ChatRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.extra["tool_choice"], "auto");
        assert_eq!(request.messages[0].extra["cache_control"]["type"], "ephemeral");

        let back = serde_json::to_value(&request).unwrap();
        assert_eq!(back["top_p"], json!(0.95));
        assert_eq!(back["temperature"], json!(0.6));
        assert!(back.get("tools").is_none());
    }

    #[test]
    fn test_finish_reason_keeps_unknown_values() {
        let reason: FinishReason = serde_json::from_value(json!("insufficient_system_resource")).unwrap();
        assert_eq!(reason, FinishReason::Other("insufficient_system_resource".to_string()));
        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            json!("insufficient_system_resource")
        );

        let known: FinishReason = serde_json::from_value(json!("tool_calls")).unwrap();
        assert_eq!(known, FinishReason::ToolCalls);
        assert_eq!(known.to_string(), "tool_calls");
    }

    #[test]
    fn test_multipart_content_text() {
        let message: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "text", "text": "a"}, {"type": "image_url"}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert_eq!(message.text(), Some("ab".to_string()));
    }

    #[test]
    fn test_reasoning_text_prefers_non_empty() {
        let mut message = ChatMessage::assistant("");
        message.reasoning = Some(String::new());
        message.reasoning_content = Some("thinking".to_string());
        assert_eq!(message.reasoning_text(), Some("thinking"));
    }

    #[test]
    fn test_tool_lookup_by_name() {
        let request = ChatRequest::new("m", vec![ChatMessage::user("hi")]).with_tools(vec![
            ToolDefinition::function("search", "Search the web", json!({"type": "object"})),
        ]);
        assert!(request.tool("search").is_some());
        assert!(request.tool("missing").is_none());
    }

    #[test]
    fn test_response_round_trip_is_stable() {
        let raw = json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "f", "arguments": "{}"}}
                ]},
                "finish_reason": "tool_calls",
                "logprobs": null
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7},
            "system_fingerprint": "fp"
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let once = serde_json::to_string(&response).unwrap();
        let again: ChatResponse = serde_json::from_str(&once).unwrap();
        assert_eq!(once, serde_json::to_string(&again).unwrap());
        assert_eq!(response.extra["system_fingerprint"], "fp");
    }
}
