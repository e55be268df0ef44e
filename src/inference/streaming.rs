//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads the HTTP body as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), parses each chunk as JSON, and accumulates tool call
//! fragments across deltas until the provider finishes them.

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, StreamChunk, ToolInvocation};

// ─── SSE parser ──────────────────────────────────────────────────────────────

/// Parse raw SSE bytes into `StreamChunk`s.
///
/// 1. Buffers bytes until a complete SSE event (`\n\n`) is available
/// 2. Parses each `data:` payload as a `ChatCompletionChunk`
/// 3. Accumulates tool call fragments across deltas
/// 4. Emits one `StreamChunk` per event that carries something
///
/// Events are split on raw bytes so a multi-byte character straddling two
/// network reads is never decoded in halves.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let byte_stream = Box::pin(byte_stream);

    stream::unfold(
        (byte_stream, StreamState::default(), Vec::<u8>::new(), false),
        |(mut byte_stream, mut state, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(event_end) = find_event_boundary(&buffer) {
                    let event: Vec<u8> = buffer.drain(..event_end + 2).collect();
                    let event = String::from_utf8_lossy(&event[..event_end]).to_string();

                    match state.process_event(&event) {
                        Ok(Some(chunk)) => {
                            return Some((Ok(chunk), (byte_stream, state, buffer, false)))
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (byte_stream, state, buffer, false))),
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, state, buffer, true),
                        ));
                    }
                    None => {
                        // Provider closed the body without a trailing blank line.
                        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
                        buffer.clear();
                        let outcome = if rest.is_empty() {
                            state.finalize()
                        } else {
                            match state.process_event(&rest) {
                                Ok(None) => state.finalize(),
                                other => other,
                            }
                        };
                        return match outcome {
                            Ok(Some(chunk)) => {
                                Some((Ok(chunk), (byte_stream, state, buffer, true)))
                            }
                            Ok(None) => None,
                            Err(e) => Some((Err(e), (byte_stream, state, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

// ─── Stream State ────────────────────────────────────────────────────────────

/// In-progress tool call: `(index, id, name, arguments_buffer)`.
type PendingToolCall = (u32, Option<String>, String, String);

/// Mutable state for accumulating tool call fragments across SSE events.
#[derive(Default)]
struct StreamState {
    pending_tool_calls: Vec<PendingToolCall>,
    done: bool,
}

impl StreamState {
    /// Process a single SSE event string (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) -> Result<Option<StreamChunk>, InferenceError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                let data = data.trim();
                if data == "[DONE]" {
                    return self.finalize();
                }
                data_content.push_str(data);
            }
        }

        if data_content.is_empty() {
            return Ok(None); // keep-alive or comment
        }

        let chunk: ChatCompletionChunk =
            serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
            })?;

        Ok(self.process_chunk(chunk))
    }

    fn process_chunk(&mut self, chunk: ChatCompletionChunk) -> Option<StreamChunk> {
        let choice = chunk.choices.into_iter().next()?;

        let mut result = StreamChunk {
            token: None,
            tool_calls: None,
            finish_reason: choice.finish_reason,
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                result.token = Some(content);
            }
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let index = tc.index.unwrap_or(0);
            let (name_part, args_part) = match tc.function {
                Some(f) => (f.name.unwrap_or_default(), f.arguments.unwrap_or_default()),
                None => (String::new(), String::new()),
            };

            match self.pending_tool_calls.iter_mut().find(|(idx, ..)| *idx == index) {
                Some((_, id, name, args)) => {
                    name.push_str(&name_part);
                    args.push_str(&args_part);
                    if tc.id.is_some() {
                        *id = tc.id;
                    }
                }
                None => self.pending_tool_calls.push((index, tc.id, name_part, args_part)),
            }
        }

        if result.finish_reason.as_deref() == Some("tool_calls") {
            result.tool_calls = Some(self.take_tool_calls());
        }

        if result.token.is_none() && result.tool_calls.is_none() && result.finish_reason.is_none()
        {
            return None;
        }
        Some(result)
    }

    fn take_tool_calls(&mut self) -> Vec<ToolInvocation> {
        let mut pending = std::mem::take(&mut self.pending_tool_calls);
        pending.sort_by_key(|(index, ..)| *index);
        pending
            .into_iter()
            .map(|(_, id, name, raw_arguments)| ToolInvocation {
                id,
                name,
                raw_arguments,
            })
            .collect()
    }

    /// Finalize the stream, flushing tool calls that never saw a finish reason.
    fn finalize(&mut self) -> Result<Option<StreamChunk>, InferenceError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        if self.pending_tool_calls.is_empty() {
            return Ok(None);
        }
        Ok(Some(StreamChunk {
            token: None,
            tool_calls: Some(self.take_tool_calls()),
            finish_reason: Some("tool_calls".into()),
        }))
    }
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming response body into text and tool invocations.
pub fn parse_non_streaming_response(body: &str) -> Result<StreamChunk, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
        tool_calls: Option<Vec<NonStreamToolCall>>,
    }

    #[derive(Deserialize)]
    struct NonStreamToolCall {
        id: Option<String>,
        function: NonStreamFunction,
    }

    #[derive(Deserialize)]
    struct NonStreamFunction {
        name: String,
        #[serde(default)]
        arguments: String,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    let tool_calls = choice.message.tool_calls.and_then(|calls| {
        let calls: Vec<ToolInvocation> = calls
            .into_iter()
            .map(|tc| ToolInvocation {
                id: tc.id,
                name: tc.function.name,
                raw_arguments: tc.function.arguments,
            })
            .collect();
        (!calls.is_empty()).then_some(calls)
    });

    Ok(StreamChunk {
        token: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        parts: Vec<&'static str>,
    ) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> {
        stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())))
    }

    async fn collect(parts: Vec<&'static str>) -> Vec<Result<StreamChunk, InferenceError>> {
        parse_sse_stream(byte_stream(parts)).collect().await
    }

    #[tokio::test]
    async fn test_text_tokens_in_order() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ])
        .await;

        let tokens: Vec<String> = chunks
            .iter()
            .filter_map(|c| c.as_ref().ok().and_then(|c| c.token.clone()))
            .collect();
        assert_eq!(tokens, vec!["Hel", "lo"]);
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_event_split_across_reads() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"split\"},\"finish_reason\":null}]}\n",
            "\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().token.as_deref(), Some("split"));
    }

    #[tokio::test]
    async fn test_tool_call_fragments_accumulate_raw() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"analyze_request\",\"arguments\":\"{\\\"intent\\\":\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\" \\\"create\\\"\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        let calls = chunks
            .into_iter()
            .filter_map(|c| c.ok().and_then(|c| c.tool_calls))
            .next()
            .expect("tool calls emitted");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_a"));
        assert_eq!(calls[0].name, "analyze_request");
        // Malformed on purpose: the parser must not try to fix it.
        assert_eq!(calls[0].raw_arguments, r#"{"intent": "create""#);
    }

    #[tokio::test]
    async fn test_multiple_tool_calls_keep_index_order() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"b\",\"function\":{\"name\":\"extract_structured_data\",\"arguments\":\"{}\"}},{\"index\":0,\"id\":\"a\",\"function\":{\"name\":\"analyze_request\",\"arguments\":\"{}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
        ])
        .await;
        let calls = chunks[0].as_ref().unwrap().tool_calls.clone().unwrap();
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["analyze_request", "extract_structured_data"]);
    }

    #[tokio::test]
    async fn test_pending_tool_calls_flushed_on_eof() {
        let chunks = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"name\":\"validate_completeness\",\"arguments\":\"{}\"}}]},\"finish_reason\":null}]}\n\n",
        ])
        .await;
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(last.tool_calls.as_ref().unwrap()[0].name, "validate_completeness");
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_stream_error() {
        let chunks = collect(vec!["data: {not json}\n\n"]).await;
        assert!(matches!(chunks[0], Err(InferenceError::StreamError { .. })));
    }

    #[test]
    fn test_non_streaming_text() {
        let body = r#"{"choices":[{"message":{"content":"Hello there"},"finish_reason":"stop"}]}"#;
        let chunk = parse_non_streaming_response(body).unwrap();
        assert_eq!(chunk.token.as_deref(), Some("Hello there"));
        assert!(chunk.tool_calls.is_none());
    }

    #[test]
    fn test_non_streaming_tool_call() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"call_9","type":"function","function":{"name":"apply_revision","arguments":"{\"target_section\":\"remedies\"}"}}]},"finish_reason":"tool_calls"}]}"#;
        let chunk = parse_non_streaming_response(body).unwrap();
        let calls = chunk.tool_calls.unwrap();
        assert_eq!(calls[0].name, "apply_revision");
        assert_eq!(calls[0].raw_arguments, r#"{"target_section":"remedies"}"#);
        assert!(chunk.token.is_none());
    }

    #[test]
    fn test_non_streaming_empty_choices() {
        let result = parse_non_streaming_response(r#"{"choices":[]}"#);
        assert!(matches!(result, Err(InferenceError::StreamError { .. })));
    }
}
