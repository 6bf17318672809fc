//! Anthropic-dialect upstream plumbing: unary messages calls, the
//! streaming event-to-chunk adapter, and token counting.

use std::{collections::HashMap, time::Duration};

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;

use config::{ProviderConfig, ProviderCredential};

use crate::{
    dialect::anthropic::{BlockDelta, ContentBlock, MessagesRequest, MessagesResponse, StreamEvent},
    error::{GatewayError, GatewayResult},
    unified::{
        UnifiedChoiceDelta, UnifiedChunk, UnifiedFinishReason, UnifiedFunctionDelta, UnifiedFunctionStart,
        UnifiedMessageDelta, UnifiedRequest, UnifiedResponse, UnifiedRole, UnifiedStopReason,
        UnifiedStreamingToolCall, UnifiedUsage,
    },
    upstream::ChunkStream,
};

/// API-key accounts authenticate with `x-api-key`; OAuth bundles use a
/// bearer token.
fn authorize(builder: RequestBuilder, provider: &ProviderConfig) -> RequestBuilder {
    match &provider.credential {
        ProviderCredential::ApiKey(key) => builder.header("x-api-key", key.expose_secret()),
        ProviderCredential::Oauth(detail) => builder.bearer_auth(detail.access_token.expose_secret()),
    }
}

pub(super) async fn chat(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
    timeout: Duration,
) -> GatewayResult<UnifiedResponse> {
    let url = format!("{}/messages", provider.api_base);

    let mut messages_request = MessagesRequest::from(request);
    messages_request.stream = Some(false);

    let body = sonic_rs::to_vec(&messages_request).map_err(|e| {
        log::error!("Failed to serialize messages request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = authorize(client.post(&url), provider)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::ForwardFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Messages upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let response_text = response.text().await.map_err(|e| {
        log::error!("Failed to read messages response body: {e}");
        GatewayError::InternalError(None)
    })?;

    let messages_response: MessagesResponse = sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse messages response: {e}");
        log::debug!("Unparseable response body: {response_text}");
        GatewayError::InternalError(None)
    })?;

    let mut unified = UnifiedResponse::from(messages_response);
    unified.created = super::openai::now_unix();

    Ok(unified)
}

pub(super) async fn count_tokens(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
    timeout: Duration,
) -> GatewayResult<u32> {
    let url = format!("{}/messages/count_tokens", provider.api_base);

    let mut messages_request = MessagesRequest::from(request);
    messages_request.stream = None;

    let body = sonic_rs::to_vec(&messages_request).map_err(|e| {
        log::error!("Failed to serialize count-tokens request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = authorize(client.post(&url), provider)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| GatewayError::ForwardFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Count-tokens upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    #[derive(serde::Deserialize)]
    struct Counted {
        input_tokens: u32,
    }

    let counted: Counted = response.json().await.map_err(|e| {
        log::error!("Failed to parse count-tokens response: {e}");
        GatewayError::InternalError(None)
    })?;

    Ok(counted.input_tokens)
}

pub(super) async fn chat_stream(
    client: &Client,
    provider: &ProviderConfig,
    request: UnifiedRequest,
) -> GatewayResult<ChunkStream> {
    let url = format!("{}/messages", provider.api_base);

    let mut messages_request = MessagesRequest::from(request);
    messages_request.stream = Some(true);

    let body = sonic_rs::to_vec(&messages_request).map_err(|e| {
        log::error!("Failed to serialize streaming messages request: {e}");
        GatewayError::InternalError(None)
    })?;

    let response = authorize(client.post(&url), provider)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| GatewayError::StreamCreationFailed(format!("request to '{}' failed: {e}", provider.name)))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("Streaming messages upstream error ({status}): {error_text}");
        return Err(GatewayError::from_upstream_status(status.as_u16(), error_text));
    }

    let event_stream = response.bytes_stream().eventsource();

    // unfold keeps the adapter state alive across events; events that
    // produce no client-visible chunk loop silently.
    let chunk_stream = futures::stream::unfold(
        (Box::pin(event_stream), AnthropicChunkAdapter::new()),
        |(mut stream, mut adapter)| async move {
            loop {
                let event = stream.next().await?;

                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        let failure = GatewayError::ForwardFailed(format!("upstream stream failed: {error}"));
                        return Some((Err(failure), (stream, adapter)));
                    }
                };

                let parsed = match sonic_rs::from_str::<StreamEvent>(&event.data) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        log::warn!("Skipping unparseable messages event: {error}");
                        continue;
                    }
                };

                match adapter.on_event(parsed) {
                    Ok(Some(chunk)) => return Some((Ok(chunk), (stream, adapter))),
                    Ok(None) => continue,
                    Err(error) => return Some((Err(error), (stream, adapter))),
                }
            }
        },
    );

    Ok(Box::pin(chunk_stream))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// State machine folding the anthropic event surface into unified chunks.
///
/// Tracks the message identity from `message_start`, the kind of every
/// opened block, and the mapping from block index to the flat tool-call
/// index the unified (openai-shaped) chunk model uses.
pub struct AnthropicChunkAdapter {
    message_id: String,
    model: String,
    created: u64,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    blocks: HashMap<u32, BlockKind>,
    tool_indexes: HashMap<u32, usize>,
    next_tool_index: usize,
}

impl AnthropicChunkAdapter {
    /// Fresh adapter for one stream.
    pub fn new() -> Self {
        AnthropicChunkAdapter {
            message_id: String::new(),
            model: String::new(),
            created: super::openai::now_unix(),
            input_tokens: None,
            output_tokens: None,
            blocks: HashMap::new(),
            tool_indexes: HashMap::new(),
            next_tool_index: 0,
        }
    }

    fn chunk(&self, delta: UnifiedMessageDelta, finish_reason: Option<UnifiedFinishReason>) -> UnifiedChunk {
        UnifiedChunk {
            id: self.message_id.clone(),
            model: self.model.clone(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
            created: self.created,
        }
    }

    /// Fold one upstream event; `Ok(None)` means nothing to forward.
    pub fn on_event(&mut self, event: StreamEvent) -> GatewayResult<Option<UnifiedChunk>> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.message_id = message.id;
                self.model = message.model;
                self.input_tokens = message.usage.input_tokens;
                self.output_tokens = message.usage.output_tokens;

                Ok(Some(self.chunk(
                    UnifiedMessageDelta {
                        role: Some(UnifiedRole::Assistant),
                        ..Default::default()
                    },
                    None,
                )))
            }

            StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    self.blocks.insert(index, BlockKind::ToolUse);

                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indexes.insert(index, tool_index);

                    let start = UnifiedStreamingToolCall::Start {
                        index: tool_index,
                        id,
                        function: UnifiedFunctionStart {
                            name,
                            arguments: String::new(),
                        },
                    };

                    Ok(Some(self.chunk(
                        UnifiedMessageDelta {
                            tool_calls: Some(vec![start]),
                            ..Default::default()
                        },
                        None,
                    )))
                }
                ContentBlock::Thinking { .. } => {
                    self.blocks.insert(index, BlockKind::Thinking);
                    Ok(None)
                }
                _ => {
                    self.blocks.insert(index, BlockKind::Text);
                    Ok(None)
                }
            },

            StreamEvent::ContentBlockDelta { index, delta } => {
                // Every delta must reference a block previously started.
                if !self.blocks.contains_key(&index) {
                    log::warn!("Delta for unopened block {index}; dropping");
                    return Ok(None);
                }

                let delta = match delta {
                    BlockDelta::TextDelta { text } => UnifiedMessageDelta {
                        content: Some(text),
                        ..Default::default()
                    },
                    BlockDelta::ThinkingDelta { thinking } => UnifiedMessageDelta {
                        thinking: Some(thinking),
                        ..Default::default()
                    },
                    BlockDelta::SignatureDelta { signature } => UnifiedMessageDelta {
                        signature: Some(signature),
                        ..Default::default()
                    },
                    BlockDelta::InputJsonDelta { partial_json } => {
                        let Some(&tool_index) = self.tool_indexes.get(&index) else {
                            log::warn!("Input JSON delta for non-tool block {index}; dropping");
                            return Ok(None);
                        };

                        UnifiedMessageDelta {
                            tool_calls: Some(vec![UnifiedStreamingToolCall::Delta {
                                index: tool_index,
                                function: UnifiedFunctionDelta {
                                    arguments: partial_json,
                                },
                            }]),
                            ..Default::default()
                        }
                    }
                };

                Ok(Some(self.chunk(delta, None)))
            }

            StreamEvent::ContentBlockStop { index } => {
                self.blocks.remove(&index);
                Ok(None)
            }

            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    if usage.input_tokens.is_some() {
                        self.input_tokens = usage.input_tokens;
                    }
                    if usage.output_tokens.is_some() {
                        self.output_tokens = usage.output_tokens;
                    }
                }

                let finish_reason = delta
                    .stop_reason
                    .map(UnifiedStopReason::from)
                    .map(UnifiedFinishReason::from);

                let mut chunk = self.chunk(UnifiedMessageDelta::default(), finish_reason);

                chunk.usage = Some(UnifiedUsage {
                    prompt_tokens: self.input_tokens.unwrap_or(0),
                    completion_tokens: self.output_tokens.unwrap_or(0),
                    total_tokens: self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0),
                });

                Ok(Some(chunk))
            }

            StreamEvent::MessageStop | StreamEvent::Ping => Ok(None),

            StreamEvent::Error { error } => {
                log::error!("Upstream stream error event: {} - {}", error.error_type, error.message);
                Err(GatewayError::ForwardFailed(format!(
                    "upstream stream error: {}",
                    error.message
                )))
            }
        }
    }
}

impl Default for AnthropicChunkAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> StreamEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn text_stream_folds_into_role_then_content_then_finish() {
        let mut adapter = AnthropicChunkAdapter::new();

        let start = adapter
            .on_event(event(
                r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude-3-5-haiku-latest","usage":{"input_tokens":9,"output_tokens":1}}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(start.choices[0].delta.role, Some(UnifiedRole::Assistant));
        assert_eq!(start.id, "msg_1");

        assert!(adapter
            .on_event(event(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#
            ))
            .unwrap()
            .is_none());

        let delta = adapter
            .on_event(event(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(delta.choices[0].delta.content.as_deref(), Some("Hello"));

        let finish = adapter
            .on_event(event(
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":12}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(finish.choices[0].finish_reason, Some(UnifiedFinishReason::Stop));

        let usage = finish.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 9);
        assert_eq!(usage.completion_tokens, 12);

        assert!(adapter.on_event(event(r#"{"type":"message_stop"}"#)).unwrap().is_none());
    }

    #[test]
    fn tool_blocks_map_to_flat_tool_indexes() {
        let mut adapter = AnthropicChunkAdapter::new();

        adapter
            .on_event(event(
                r#"{"type":"message_start","message":{"id":"msg_2","type":"message","role":"assistant","content":[],"model":"m","usage":{"input_tokens":1,"output_tokens":0}}}"#,
            ))
            .unwrap();

        // Text block at index 0, tool block at index 1: the tool call
        // still gets flat index 0.
        adapter
            .on_event(event(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            ))
            .unwrap();

        let start = adapter
            .on_event(event(
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"lookup","input":{}}}"#,
            ))
            .unwrap()
            .unwrap();

        let calls = start.choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(matches!(
            calls[0],
            UnifiedStreamingToolCall::Start { index: 0, .. }
        ));

        let delta = adapter
            .on_event(event(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
            ))
            .unwrap()
            .unwrap();

        let calls = delta.choices[0].delta.tool_calls.as_ref().unwrap();
        assert!(matches!(calls[0], UnifiedStreamingToolCall::Delta { index: 0, .. }));
    }

    #[test]
    fn thinking_and_signature_deltas_ride_their_own_fields() {
        let mut adapter = AnthropicChunkAdapter::new();

        adapter
            .on_event(event(
                r#"{"type":"message_start","message":{"id":"msg_3","type":"message","role":"assistant","content":[],"model":"m","usage":{"input_tokens":1,"output_tokens":0}}}"#,
            ))
            .unwrap();

        adapter
            .on_event(event(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#,
            ))
            .unwrap();

        let thinking = adapter
            .on_event(event(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(thinking.choices[0].delta.thinking.as_deref(), Some("hmm"));

        let signature = adapter
            .on_event(event(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"c2ln"}}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(signature.choices[0].delta.signature.as_deref(), Some("c2ln"));
    }

    #[test]
    fn deltas_for_unopened_blocks_are_dropped() {
        let mut adapter = AnthropicChunkAdapter::new();

        let orphan = adapter
            .on_event(event(
                r#"{"type":"content_block_delta","index":7,"delta":{"type":"text_delta","text":"x"}}"#,
            ))
            .unwrap();

        assert!(orphan.is_none());
    }

    #[test]
    fn error_events_become_stream_failures() {
        let mut adapter = AnthropicChunkAdapter::new();

        let result = adapter.on_event(event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"overloaded"}}"#,
        ));

        assert!(matches!(result, Err(GatewayError::ForwardFailed(_))));
    }
}
