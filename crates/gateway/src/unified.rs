//! Protocol-agnostic unified message types.
//!
//! Internal pivot between the three wire dialects. Every translation pair
//! the gateway supports goes through this model:
//!
//! ```text
//! client dialect → UnifiedRequest → upstream dialect
//! upstream dialect → UnifiedResponse / UnifiedChunk → client dialect
//! ```
//!
//! The pivot is deliberately a superset: it carries the anthropic-only
//! fields (thinking, stop reasons, top_k) and the openai-only fields
//! (penalties, parallel tool calls) side by side so no pair of conversions
//! loses information the destination could express.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) mod from_anthropic;
pub(crate) mod from_openai;
pub(crate) mod google;
pub(crate) mod responses;
pub(crate) mod to_anthropic;
pub(crate) mod to_openai;

/// Unified request representation for all dialects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRequest {
    /// Model identifier; the client-visible request model until routing
    /// rewrites it to the upstream model name.
    pub model: String,

    /// Conversation messages, system prompt excluded.
    pub messages: Vec<UnifiedMessage>,

    /// System instruction, extracted from whichever spot the source
    /// dialect keeps it in (pseudo-role message, dedicated field, config
    /// field).
    pub system: Option<String>,

    /// Maximum tokens to generate. Optional here; the anthropic dialect
    /// requires it, so the forwarder fills it before conversion.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,

    /// Top-k sampling (anthropic/google only).
    pub top_k: Option<u32>,

    /// Frequency penalty (openai only).
    pub frequency_penalty: Option<f32>,

    /// Presence penalty (openai only).
    pub presence_penalty: Option<f32>,

    /// Stop sequences.
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response.
    pub stream: Option<bool>,

    /// Extended-thinking budget (anthropic only).
    pub thinking_budget: Option<u32>,

    /// Available tools.
    pub tools: Option<Vec<UnifiedTool>>,

    /// Tool usage control.
    pub tool_choice: Option<UnifiedToolChoice>,

    /// Whether parallel tool calls are allowed (openai only).
    pub parallel_tool_calls: Option<bool>,

    /// End-user identifier for tracking.
    pub user_id: Option<String>,
}

impl UnifiedRequest {
    /// Merge consecutive same-role messages into one, joining their text
    /// with blank lines. Applied when a scenario enables compaction; the
    /// result never has more messages than the input.
    pub fn compact(&mut self) {
        let mut compacted: Vec<UnifiedMessage> = Vec::with_capacity(self.messages.len());

        for message in self.messages.drain(..) {
            match compacted.last_mut() {
                Some(last) if last.role == message.role && last.is_mergeable() && message.is_mergeable() => {
                    let left = last.text_content();
                    let right = message.text_content();

                    let merged = if left.is_empty() {
                        right
                    } else if right.is_empty() {
                        left
                    } else {
                        format!("{left}\n\n{right}")
                    };

                    last.content = UnifiedContentContainer::Text(merged);
                }
                _ => compacted.push(message),
            }
        }

        self.messages = compacted;
    }
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedMessage {
    /// Sender role.
    pub role: UnifiedRole,
    /// Message content, flat text or rich blocks.
    pub content: UnifiedContentContainer,
    /// Tool calls (openai shape); in the unified model these normally live
    /// as ToolUse blocks, this field exists for lossless passthrough.
    pub tool_calls: Option<Vec<UnifiedToolCall>>,
    /// For tool-role messages: the call this answers.
    pub tool_call_id: Option<String>,
}

impl UnifiedMessage {
    /// Flat text view: text blocks concatenated in order, newline-joined.
    pub fn text_content(&self) -> String {
        match &self.content {
            UnifiedContentContainer::Text(text) => text.clone(),
            UnifiedContentContainer::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    UnifiedContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Whether compaction may merge this message with a neighbor: plain
    /// text only, no tool plumbing.
    fn is_mergeable(&self) -> bool {
        if self.tool_calls.is_some() || self.tool_call_id.is_some() {
            return false;
        }

        match &self.content {
            UnifiedContentContainer::Text(_) => true,
            UnifiedContentContainer::Blocks(blocks) => {
                blocks.iter().all(|b| matches!(b, UnifiedContent::Text { .. }))
            }
        }
    }

    /// Extract tool calls from ToolUse content blocks, on demand.
    pub fn compute_tool_calls(&self) -> Option<Vec<UnifiedToolCall>> {
        let UnifiedContentContainer::Blocks(blocks) = &self.content else {
            return self.tool_calls.clone();
        };

        let calls: Vec<UnifiedToolCall> = blocks
            .iter()
            .filter_map(|block| match block {
                UnifiedContent::ToolUse { id, name, input } => Some(UnifiedToolCall {
                    id: id.clone(),
                    function: UnifiedFunctionCall {
                        name: name.clone(),
                        arguments: UnifiedArguments::Value(input.clone()),
                    },
                }),
                _ => None,
            })
            .collect();

        if calls.is_empty() {
            self.tool_calls.clone()
        } else {
            Some(calls)
        }
    }
}

/// Content container: flat text or rich blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedContentContainer {
    /// Flat text.
    Text(String),
    /// Rich content blocks.
    Blocks(Vec<UnifiedContent>),
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnifiedRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// A content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedContent {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Extended-thinking output.
    Thinking {
        /// The thinking text.
        text: String,
        /// Integrity signature, when present.
        signature: Option<String>,
    },
    /// Image content; the source is kept as raw JSON since only the
    /// anthropic path round-trips it.
    Image {
        /// The image source object.
        source: Value,
    },
    /// Tool use request from the assistant.
    ToolUse {
        /// Call identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments as JSON.
        input: Value,
    },
    /// Tool execution result.
    ToolResult {
        /// The call this answers.
        tool_use_id: String,
        /// Result text.
        content: String,
        /// Whether execution failed.
        is_error: Option<bool>,
    },
}

/// A tool available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTool {
    /// The function specification.
    pub function: UnifiedFunction,
}

/// Function specification of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunction {
    /// Function name.
    pub name: String,
    /// What the function does.
    pub description: Option<String>,
    /// JSON Schema of the parameters.
    pub parameters: Value,
}

/// How the model should use tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedToolChoice {
    /// Mode keyword.
    Mode(UnifiedToolChoiceMode),
    /// Force a specific function.
    Specific {
        /// The function to force.
        function: UnifiedFunctionChoice,
    },
}

/// Tool choice modes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedToolChoiceMode {
    /// Never call tools.
    None,
    /// Model decides.
    Auto,
    /// At least one tool call required (`required` / `any`).
    #[serde(alias = "required", alias = "any")]
    Required,
}

/// Named function selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunctionChoice {
    /// Function name.
    pub name: String,
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedToolCall {
    /// Call identifier.
    pub id: String,
    /// The invoked function.
    pub function: UnifiedFunctionCall,
}

/// Function name plus arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunctionCall {
    /// Function name.
    pub name: String,
    /// The arguments.
    pub arguments: UnifiedArguments,
}

/// Arguments in either wire shape, to avoid re-parsing during conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedArguments {
    /// JSON string (openai shape).
    String(String),
    /// Parsed JSON (anthropic/google shape).
    Value(Value),
}

impl UnifiedArguments {
    /// The arguments as a JSON string.
    pub fn into_string(self) -> String {
        match self {
            UnifiedArguments::String(s) => s,
            UnifiedArguments::Value(v) => serde_json::to_string(&v).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    /// The arguments as parsed JSON; invalid strings become an empty object.
    pub fn into_value(self) -> Value {
        match self {
            UnifiedArguments::String(s) => {
                serde_json::from_str(&s).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
            }
            UnifiedArguments::Value(Value::Null) => Value::Object(serde_json::Map::new()),
            UnifiedArguments::Value(v) => v,
        }
    }
}

/// Complete response in the unified model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    /// Completion identifier.
    pub id: String,
    /// Model label echoed to the client.
    pub model: String,
    /// Generated choices; index 0 is the primary one.
    pub choices: Vec<UnifiedChoice>,
    /// Token accounting.
    pub usage: UnifiedUsage,
    /// Unix timestamp of creation.
    pub created: u64,
    /// Detailed stop reason (anthropic vocabulary), preserved alongside
    /// the coarser finish reason.
    pub stop_reason: Option<UnifiedStopReason>,
    /// Matched stop sequence, if any.
    pub stop_sequence: Option<String>,
}

impl UnifiedResponse {
    /// Concatenated text of the primary choice.
    pub fn primary_text(&self) -> String {
        self.choices
            .first()
            .map(|choice| choice.message.text_content())
            .unwrap_or_default()
    }
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChoice {
    /// Choice index.
    pub index: u32,
    /// The generated message.
    pub message: UnifiedMessage,
    /// Why generation stopped.
    pub finish_reason: Option<UnifiedFinishReason>,
}

/// Token accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

/// Coarse finish reason (openai vocabulary).
///
/// The bijection with [`UnifiedStopReason`] covers the common subset;
/// unknown vendor values travel verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedFinishReason {
    /// Natural stop.
    Stop,
    /// Hit the max-tokens limit.
    #[serde(alias = "max_tokens")]
    Length,
    /// Content was filtered.
    ContentFilter,
    /// The model emitted tool calls.
    ToolCalls,
    /// Verbatim passthrough.
    #[serde(untagged)]
    Other(String),
}

/// Detailed stop reason (anthropic vocabulary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnifiedStopReason {
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
    /// Verbatim passthrough.
    #[serde(untagged)]
    Other(String),
}

impl From<UnifiedStopReason> for UnifiedFinishReason {
    fn from(reason: UnifiedStopReason) -> Self {
        match reason {
            UnifiedStopReason::EndTurn => UnifiedFinishReason::Stop,
            UnifiedStopReason::MaxTokens => UnifiedFinishReason::Length,
            UnifiedStopReason::StopSequence => UnifiedFinishReason::Stop,
            UnifiedStopReason::ToolUse => UnifiedFinishReason::ToolCalls,
            UnifiedStopReason::Refusal => UnifiedFinishReason::ContentFilter,
            UnifiedStopReason::Other(s) => UnifiedFinishReason::Other(s),
        }
    }
}

impl From<UnifiedFinishReason> for UnifiedStopReason {
    fn from(reason: UnifiedFinishReason) -> Self {
        match reason {
            UnifiedFinishReason::Stop => UnifiedStopReason::EndTurn,
            UnifiedFinishReason::Length => UnifiedStopReason::MaxTokens,
            UnifiedFinishReason::ContentFilter => UnifiedStopReason::Refusal,
            UnifiedFinishReason::ToolCalls => UnifiedStopReason::ToolUse,
            UnifiedFinishReason::Other(s) => UnifiedStopReason::Other(s),
        }
    }
}

/// One streaming chunk in the unified model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChunk {
    /// Completion identifier, stable across chunks.
    pub id: String,
    /// Model label.
    pub model: String,
    /// Incremental choice updates.
    pub choices: Vec<UnifiedChoiceDelta>,
    /// Usage snapshot; carried by the final usage-bearing event.
    pub usage: Option<UnifiedUsage>,
    /// Unix timestamp.
    pub created: u64,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedChoiceDelta {
    /// Choice index.
    pub index: u32,
    /// The delta payload.
    pub delta: UnifiedMessageDelta,
    /// Set once generation for this choice stopped.
    pub finish_reason: Option<UnifiedFinishReason>,
}

/// Delta payload of a streaming chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedMessageDelta {
    /// Present on the first chunk only.
    pub role: Option<UnifiedRole>,
    /// Text fragment to append.
    pub content: Option<String>,
    /// Thinking fragment to append (anthropic upstreams).
    pub thinking: Option<String>,
    /// Thinking signature fragment (anthropic upstreams).
    pub signature: Option<String>,
    /// Incremental tool call updates.
    pub tool_calls: Option<Vec<UnifiedStreamingToolCall>>,
}

impl UnifiedMessageDelta {
    /// True when the delta carries nothing to forward.
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.content.is_none()
            && self.thinking.is_none()
            && self.signature.is_none()
            && self.tool_calls.is_none()
    }
}

/// Tool call updates arriving incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnifiedStreamingToolCall {
    /// Establishes a new tool call.
    Start {
        /// Position in the tool_calls array.
        index: usize,
        /// Call identifier.
        id: String,
        /// Function name plus initial arguments.
        function: UnifiedFunctionStart,
    },
    /// Appends argument bytes.
    Delta {
        /// Position matching the call to update.
        index: usize,
        /// The fragment.
        function: UnifiedFunctionDelta,
    },
}

/// Initial function information of a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunctionStart {
    /// Function name.
    pub name: String,
    /// Initial arguments, usually empty.
    pub arguments: String,
}

/// Incremental arguments of a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedFunctionDelta {
    /// Fragment to append.
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(role: UnifiedRole, text: &str) -> UnifiedMessage {
        UnifiedMessage {
            role,
            content: UnifiedContentContainer::Text(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn stop_reason_bijection_on_common_subset() {
        for (stop, finish) in [
            (UnifiedStopReason::EndTurn, UnifiedFinishReason::Stop),
            (UnifiedStopReason::MaxTokens, UnifiedFinishReason::Length),
            (UnifiedStopReason::ToolUse, UnifiedFinishReason::ToolCalls),
        ] {
            assert_eq!(UnifiedFinishReason::from(stop.clone()), finish);
            assert_eq!(UnifiedStopReason::from(finish), stop);
        }
    }

    #[test]
    fn unknown_reasons_stay_verbatim_through_the_bijection() {
        let finish = UnifiedFinishReason::from(UnifiedStopReason::Other("pause_turn".into()));
        assert_eq!(finish, UnifiedFinishReason::Other("pause_turn".into()));

        let stop = UnifiedStopReason::from(finish);
        assert_eq!(stop, UnifiedStopReason::Other("pause_turn".into()));
    }

    #[test]
    fn compact_merges_consecutive_same_role_messages() {
        let mut request = UnifiedRequest {
            model: "alpha".to_string(),
            messages: vec![
                text_message(UnifiedRole::User, "first"),
                text_message(UnifiedRole::User, "second"),
                text_message(UnifiedRole::Assistant, "reply"),
                text_message(UnifiedRole::User, "third"),
            ],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: None,
            thinking_budget: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            user_id: None,
        };

        request.compact();

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].text_content(), "first\n\nsecond");
        assert_eq!(request.messages[1].text_content(), "reply");
    }

    #[test]
    fn compact_never_merges_tool_plumbing() {
        let mut with_tool = UnifiedMessage {
            role: UnifiedRole::User,
            content: UnifiedContentContainer::Blocks(vec![UnifiedContent::ToolResult {
                tool_use_id: "call_1".to_string(),
                content: "42".to_string(),
                is_error: None,
            }]),
            tool_calls: None,
            tool_call_id: None,
        };
        assert!(!with_tool.is_mergeable());

        with_tool.content = UnifiedContentContainer::Text("plain".to_string());
        with_tool.tool_call_id = Some("call_1".to_string());
        assert!(!with_tool.is_mergeable());
    }

    #[test]
    fn text_content_joins_blocks_with_newlines() {
        let message = UnifiedMessage {
            role: UnifiedRole::Assistant,
            content: UnifiedContentContainer::Blocks(vec![
                UnifiedContent::Text { text: "one".into() },
                UnifiedContent::Thinking {
                    text: "ignored".into(),
                    signature: None,
                },
                UnifiedContent::Text { text: "two".into() },
            ]),
            tool_calls: None,
            tool_call_id: None,
        };

        assert_eq!(message.text_content(), "one\ntwo");
    }
}
