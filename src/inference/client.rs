//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to the configured endpoint and turns the
//! reply into an [`LlmResponse`]. Transient failures are retried according to
//! the configured [`RetryPolicy`]; everything else is surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client as HttpClient;

use super::config::{AppConfig, ModelConfig};
use super::errors::InferenceError;
use super::gateway::{CompletionRequest, LlmGateway, LlmResponse};
use super::retry::RetryPolicy;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::ChatCompletionRequest;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// HTTP gateway to a single OpenAI-compatible model endpoint.
pub struct InferenceClient {
    http: HttpClient,
    model_key: String,
    model: ModelConfig,
    retry: RetryPolicy,
}

impl InferenceClient {
    /// Build a client for the config's active model.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: &AppConfig) -> Result<Self, InferenceError> {
        let model = config.active()?.clone();

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(model.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: model.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            model_key: config.active_model.clone(),
            model,
            retry: config.retry.clone(),
        })
    }

    /// The display name of the configured model.
    pub fn model_name(&self) -> &str {
        if self.model.display_name.is_empty() {
            &self.model_key
        } else {
            &self.model.display_name
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.model.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.model_name.clone(),
            messages: request.messages.clone(),
            tools: request.tools.clone(),
            tool_choice: request.tools.as_ref().map(|_| "auto".to_string()),
            temperature: self.model.temperature,
            max_tokens: self.model.max_tokens,
            stream: request.stream,
        }
    }

    /// Send one request and map transport failures and non-2xx statuses.
    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response, InferenceError> {
        let url = self.endpoint();

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            has_tools = body.tools.is_some(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream = body.stream,
            "=== LLM REQUEST ==="
        );

        let mut builder = self.http.post(&url).json(body);
        if let Some(key) = self.model.api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        if body.stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(|e| self.map_transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                status = status.as_u16(),
                retry_after_secs = ?retry_after_secs,
                body = %crate::agent_core::tokens::truncate_utf8(&body_text, 300),
                "provider returned error status"
            );
            return Err(InferenceError::from_status(
                status.as_u16(),
                body_text,
                retry_after_secs,
                &url,
            ));
        }

        Ok(response)
    }

    fn map_transport_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.model.request_timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// One attempt, streaming or not.
    async fn complete_once(&self, request: &CompletionRequest) -> Result<LlmResponse, InferenceError> {
        let body = self.build_body(request);
        let response = self.send(&body).await?;

        if !body.stream {
            let text = response.text().await.map_err(|e| InferenceError::StreamError {
                reason: format!("failed to read response body: {e}"),
            })?;
            let chunk = parse_non_streaming_response(&text)?;
            return Ok(match chunk.tool_calls {
                Some(calls) => LlmResponse::ToolInvocation(calls),
                None => LlmResponse::text(chunk.token.unwrap_or_default()),
            });
        }

        let mut chunks = Box::pin(parse_sse_stream(response.bytes_stream()));

        // With tools on offer a text preamble can still end in tool calls, so
        // hold the fragments back until the reply is finished.
        if request.tools.is_some() {
            let mut fragments = Vec::new();
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                if let Some(calls) = chunk.tool_calls.filter(|c| !c.is_empty()) {
                    if !fragments.is_empty() {
                        tracing::debug!(
                            preamble_chars = fragments.iter().map(String::len).sum::<usize>(),
                            tool_calls = calls.len(),
                            "dropping text preamble before tool calls"
                        );
                    }
                    return Ok(LlmResponse::ToolInvocation(calls));
                }
                if let Some(token) = chunk.token {
                    fragments.push(token);
                }
            }
            return Ok(LlmResponse::Text(
                stream::iter(fragments.into_iter().map(Ok)).boxed(),
            ));
        }

        // No tools: the first text token commits to a text stream.
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if let Some(calls) = chunk.tool_calls.filter(|c| !c.is_empty()) {
                return Ok(LlmResponse::ToolInvocation(calls));
            }
            if let Some(first) = chunk.token {
                let rest = chunks.filter_map(|item| async move {
                    match item {
                        Ok(c) if c.tool_calls.as_ref().is_some_and(|t| !t.is_empty()) => {
                            Some(Err(InferenceError::StreamError {
                                reason: "tool calls after text in a reply without tools".into(),
                            }))
                        }
                        Ok(c) => c.token.map(Ok),
                        Err(e) => Some(Err(e)),
                    }
                });
                return Ok(LlmResponse::Text(
                    stream::once(async move { Ok(first) }).chain(rest).boxed(),
                ));
            }
        }
        Ok(LlmResponse::text(String::new()))
    }
}

#[async_trait]
impl LlmGateway for InferenceClient {
    async fn complete(&self, request: CompletionRequest) -> Result<LlmResponse, InferenceError> {
        self.retry
            .run("chat_completion", || self.complete_once(&request))
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
