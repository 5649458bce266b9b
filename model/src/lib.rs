pub mod config;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod stream;
pub mod types;

pub use config::ProviderConfig;
pub use openai::OpenAiProvider;
pub use provider::{ChunkStream, ModelError, ModelProvider, ModelResult};
pub use stream::StreamAggregator;
pub use types::{
    ChatCompletionChunk, ChatMessage, ChatRequest, ChatResponse, Choice, ChunkChoice, ChunkDelta,
    Extra, FinishReason, FunctionCall, FunctionCallDelta, FunctionDefinition, MessageContent,
    MessageRole, ToolCall, ToolCallDelta, ToolDefinition, Usage,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::openai::*;
    pub use crate::provider::*;
    pub use crate::stream::*;
    pub use crate::types::*;
}
