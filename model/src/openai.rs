use crate::config::ProviderConfig;
use crate::provider::{ChunkStream, ModelError, ModelProvider, ModelResult};
use crate::sse::decode_chunks;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    endpoint: String,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> ModelResult<Self> {
        config
            .validate()
            .map_err(|msg| ModelError::InvalidConfig { message: msg })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unknown {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let endpoint = config.chat_completions_url();

        Ok(Self {
            client,
            config,
            endpoint,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Serialize the request and merge the configured extra body on top.
    fn build_body(&self, request: &ChatRequest, stream: bool) -> ModelResult<Value> {
        let mut body = serde_json::to_value(request)?;
        let Some(object) = body.as_object_mut() else {
            return Err(ModelError::Unknown {
                message: "Request did not serialize to a JSON object".to_string(),
            });
        };
        for (key, value) in &self.config.extra_body {
            object.insert(key.clone(), value.clone());
        }
        object.insert("stream".to_string(), Value::Bool(stream));
        Ok(body)
    }

    fn handle_http_error(err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout
        } else if let Some(status) = err.status() {
            ModelError::from_status(status.as_u16(), err.to_string())
        } else {
            ModelError::Network(err)
        }
    }

    async fn post_once(&self, body: &Value) -> ModelResult<reqwest::Response> {
        let mut builder = self.client.post(&self.endpoint).json(body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(Self::handle_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// POST with transport-level retries. These are invisible to callers.
    async fn post(&self, body: &Value) -> ModelResult<reqwest::Response> {
        let mut retry_count = 0;
        loop {
            match self.post_once(body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && retry_count < self.config.max_retries => {
                    let delay = self.config.calculate_retry_delay(retry_count);
                    retry_count += 1;
                    debug!(
                        retry = retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying chat completion request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if retry_count > 0 {
                        warn!(retries = retry_count, error = %e, "Client retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn chat(&self, request: &ChatRequest) -> ModelResult<ChatResponse> {
        debug!(model = %request.model, "Starting chat request");

        let body = self.build_body(request, false)?;
        let response = self.post(&body).await?;
        let bytes = response.bytes().await.map_err(Self::handle_http_error)?;
        let parsed: ChatResponse = serde_json::from_slice(&bytes)?;

        debug!(choices = parsed.choices.len(), "Chat request completed");
        Ok(parsed)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> ModelResult<ChunkStream> {
        debug!(model = %request.model, "Starting streaming chat request");

        let body = self.build_body(request, true)?;
        let response = self.post(&body).await?;
        let bytes = Box::pin(response.bytes_stream());

        Ok(decode_chunks(bytes))
    }

    fn provider_name(&self) -> &'static str {
        "openai-compatible"
    }
}
