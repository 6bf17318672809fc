//! Anthropic messages wire types (dialect B).
//!
//! Covers the request/response pair, the streaming event surface, token
//! counting and the error envelope. The standard and beta payload schemas
//! differ only in where they allow block arrays (`system`, message
//! `content`); the untagged containers below accept both, so one set of
//! types serves the plain and `?beta=true` routes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Request body for the messages endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// The model to use.
    pub model: String,

    /// Conversation messages, alternating user/assistant.
    pub messages: Vec<Message>,

    /// Maximum tokens to generate. Required by this dialect.
    pub max_tokens: u32,

    /// System prompt; a dedicated field rather than a pseudo-role message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Sampling temperature, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Top-k sampling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that stop generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Extended-thinking configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,

    /// Request metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Tools available to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Controls how the model uses tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// System prompt: a plain string, or content blocks on the beta schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    /// Plain text.
    Text(String),
    /// Beta-schema block array.
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Flatten to plain text, joining blocks with newlines.
    pub fn into_text(self) -> String {
        match self {
            SystemPrompt::Text(text) => text,
            SystemPrompt::Blocks(blocks) => blocks
                .into_iter()
                .map(|block| block.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block of a beta-schema system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Always `text`.
    #[serde(rename = "type")]
    pub block_type: String,
    /// The text content.
    pub text: String,
}

/// Extended-thinking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingConfig {
    /// Thinking enabled with a token budget.
    Enabled {
        /// Tokens the model may spend thinking.
        budget_tokens: u32,
    },
    /// Thinking disabled.
    Disabled,
}

/// Request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Opaque end-user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sender role; this dialect only knows user and assistant.
    pub role: Role,
    /// Message content, a plain string or rich blocks.
    pub content: MessageContent,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input (also carries tool results).
    User,
    /// Model output.
    Assistant,
}

/// Message content container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text shorthand.
    Text(String),
    /// Rich content blocks.
    Blocks(Vec<ContentBlock>),
}

/// A content block inside a message or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// Image content.
    Image {
        /// The image source.
        source: Value,
    },

    /// Extended-thinking output.
    Thinking {
        /// The thinking text.
        thinking: String,
        /// Integrity signature over the thinking content.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Tool use request from the assistant.
    ToolUse {
        /// Call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Input arguments as JSON.
        input: Value,
    },

    /// Result of a tool execution, embedded in a user message.
    ToolResult {
        /// The tool_use id this answers.
        tool_use_id: String,
        /// Result content.
        #[serde(default)]
        content: Option<MessageContent>,
        /// Whether the execution failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },

    /// Forward-compatible catch-all preserving the raw block.
    #[serde(untagged)]
    Other(Value),
}

/// A tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the input.
    pub input_schema: Value,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides.
    Auto,
    /// At least one tool call required.
    Any,
    /// Never call tools.
    None,
    /// Force a specific tool by name.
    Tool {
        /// The tool to force.
        name: String,
    },
}

/// Why the model stopped generating.
///
/// Unknown values pass through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    EndTurn,
    /// Hit the max-tokens limit.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
    /// The model refused.
    Refusal,
    /// Verbatim passthrough of an unrecognized value.
    #[serde(untagged)]
    Other(String),
}

/// Token usage accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the input. Omitted on some streaming deltas.
    #[serde(default)]
    pub input_tokens: Option<u32>,
    /// Tokens generated so far; cumulative on streams.
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

/// Complete (non-streaming) messages response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    /// Message identifier (`msg_…`).
    pub id: String,
    /// Always `message`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// Always assistant.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// Model label.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<StopReason>,
    /// The matched stop sequence, if any.
    pub stop_sequence: Option<String>,
    /// Token accounting.
    pub usage: Usage,
}

/// Server-sent event surface of the streaming messages endpoint.
///
/// Streams begin with `message_start`, carry one or more block lifecycles
/// (`content_block_start` → `content_block_delta`* → `content_block_stop`),
/// may interleave `message_delta` updates, and end with `message_stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Announces the streamed message: id, model, role, initial usage.
    MessageStart {
        /// The message skeleton.
        message: MessageStart,
    },

    /// Opens content block `index`.
    ContentBlockStart {
        /// Block index; deltas and the stop event reference it.
        index: u32,
        /// The block being opened.
        content_block: ContentBlock,
    },

    /// Incremental update for block `index`.
    ContentBlockDelta {
        /// Block index previously opened.
        index: u32,
        /// The delta payload.
        delta: BlockDelta,
    },

    /// Closes content block `index`.
    ContentBlockStop {
        /// Block index.
        index: u32,
    },

    /// Top-level message update: stop reason and cumulative usage.
    MessageDelta {
        /// Stop reason / stop sequence update.
        delta: MessageDeltaPayload,
        /// Cumulative usage snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Terminal event.
    MessageStop,

    /// Heartbeat; ignorable.
    Ping,

    /// Stream-level error.
    Error {
        /// The error payload.
        error: ErrorPayload,
    },
}

/// Message metadata carried by `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStart {
    /// Message identifier.
    pub id: String,
    /// Always `message`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Always assistant.
    pub role: Role,
    /// Content observed at start; empty, filled through block events.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Model emitting the stream.
    pub model: String,
    /// Stop reason if already known (never, in practice).
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Stop sequence if already known.
    #[serde(default)]
    pub stop_sequence: Option<String>,
    /// Usage snapshot; input tokens arrive here.
    pub usage: Usage,
}

/// Delta payload of a `content_block_delta` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    /// Text fragment for a text block.
    TextDelta {
        /// Fragment to append.
        text: String,
    },
    /// Partial JSON for a tool_use block's input.
    InputJsonDelta {
        /// JSON fragment to append.
        partial_json: String,
    },
    /// Thinking fragment for a thinking block.
    ThinkingDelta {
        /// Fragment to append.
        thinking: String,
    },
    /// Signature for a thinking block.
    SignatureDelta {
        /// Signature fragment.
        signature: String,
    },
}

/// Payload of a `message_delta` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    /// Stop reason, once known.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Matched stop sequence, if any.
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// Request body for token counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensRequest {
    /// The model whose tokenizer applies.
    pub model: String,
    /// The messages to count.
    pub messages: Vec<Message>,
    /// System prompt, counted as input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    /// Tools, counted as input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Token counting response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CountTokensResponse {
    /// Input tokens the request would consume.
    pub input_tokens: u32,
}

/// Error envelope of this dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `error`.
    #[serde(rename = "type")]
    pub response_type: String,
    /// The error payload.
    pub error: ErrorPayload,
}

/// Error payload: machine type plus human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error type.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
}

impl From<GatewayError> for ErrorResponse {
    fn from(error: GatewayError) -> Self {
        let error_type = match error.error_type() {
            "invalid_request_error" => "invalid_request_error",
            "api_error" => "api_error",
            "stream_error" => "api_error",
            _ => "api_error",
        };

        ErrorResponse {
            response_type: "error".to_string(),
            error: ErrorPayload {
                error_type: error_type.to_string(),
                message: error.client_message(),
            },
        }
    }
}

/// One model entry in this dialect's models listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Always `model`.
    #[serde(rename = "type")]
    pub info_type: String,
    /// Model identifier.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Creation timestamp in RFC 3339, empty when unknown.
    pub created_at: String,
}

/// Models listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// The models.
    pub data: Vec<ModelInfo>,
    /// Pagination indicator; always false here.
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_accepts_string_and_blocks() {
        let text: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert!(matches!(text.content, MessageContent::Text(_)));

        let blocks: Message =
            serde_json::from_str(r#"{"role":"user","content":[{"type":"text","text":"hi"}]}"#).unwrap();
        let MessageContent::Blocks(blocks) = blocks.content else {
            panic!("expected blocks");
        };
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
    }

    #[test]
    fn system_prompt_accepts_beta_block_array() {
        let beta: SystemPrompt =
            serde_json::from_str(r#"[{"type":"text","text":"a"},{"type":"text","text":"b"}]"#).unwrap();
        assert_eq!(beta.into_text(), "a\nb");
    }

    #[test]
    fn stream_events_discriminate_on_type_tag() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
        )
        .unwrap();

        let StreamEvent::ContentBlockDelta { index, delta } = event else {
            panic!("expected delta event");
        };
        assert_eq!(index, 0);
        assert!(matches!(delta, BlockDelta::TextDelta { .. }));

        let stop: StreamEvent = serde_json::from_str(r#"{"type":"message_stop"}"#).unwrap();
        assert!(matches!(stop, StreamEvent::MessageStop));
    }

    #[test]
    fn thinking_and_signature_deltas_parse() {
        let thinking: BlockDelta =
            serde_json::from_str(r#"{"type":"thinking_delta","thinking":"hmm"}"#).unwrap();
        assert!(matches!(thinking, BlockDelta::ThinkingDelta { .. }));

        let signature: BlockDelta =
            serde_json::from_str(r#"{"type":"signature_delta","signature":"c2ln"}"#).unwrap();
        assert!(matches!(signature, BlockDelta::SignatureDelta { .. }));
    }

    #[test]
    fn unknown_stop_reason_round_trips_verbatim() {
        let parsed: StopReason = serde_json::from_str(r#""pause_turn""#).unwrap();
        assert_eq!(parsed, StopReason::Other("pause_turn".to_string()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#""pause_turn""#);
    }

    #[test]
    fn unknown_content_block_is_preserved() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type":"server_tool_use","id":"x","name":"web_search"}"#).unwrap();
        assert!(matches!(block, ContentBlock::Other(_)));
    }
}
