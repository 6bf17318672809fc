//! OpenAI chat-completions wire types (dialect A).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// The model to use for the completion.
    pub model: String,

    /// The conversation so far. System instructions travel as a
    /// pseudo-role message at the front of this list.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate. Optional; the provider default applies
    /// when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Penalty on token frequency.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    /// Penalty on token presence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Whether to stream the response as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Streaming options; `include_usage` asks for a final usage chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,

    /// Tools available to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    /// Controls how the model uses tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// Whether multiple tool calls may be emitted in one response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,

    /// End-user identifier forwarded for abuse tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Streaming options on the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Ask for a usage-bearing chunk before the terminator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_usage: Option<bool>,
}

/// One conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender role.
    pub role: ChatRole,

    /// Flat text content. `None` for tool-call-only assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For `tool` role messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message sender role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
    /// Forward-compatible catch-all preserving the wire value.
    #[serde(untagged)]
    Other(String),
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: ToolCallType,
    /// The function specification.
    pub function: FunctionDefinition,
}

/// Function specification inside a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name.
    pub name: String,
    /// What the function does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the parameters.
    #[serde(default)]
    pub parameters: Value,
}

/// Tool call type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallType {
    /// The only variant currently defined by the API.
    Function,
}

/// Tool choice configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// Mode keyword: `none`, `auto`, `required`.
    Mode(ToolChoiceMode),
    /// Force a specific function by name.
    Specific {
        /// Always `function`.
        #[serde(rename = "type")]
        tool_type: ToolCallType,
        /// The function to force.
        function: ToolChoiceFunction,
    },
}

/// Mode keyword for tool choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    /// Never call tools.
    None,
    /// Model decides.
    Auto,
    /// At least one tool call is required.
    #[serde(alias = "any")]
    Required,
    /// Forward-compatible catch-all.
    #[serde(untagged)]
    Other(String),
}

/// Named function selection for tool choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    /// Function name, case-sensitive.
    pub name: String,
}

/// A tool call in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier, echoed by the matching tool message.
    pub id: String,
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: ToolCallType,
    /// The invoked function and its arguments.
    pub function: FunctionCall,
}

/// Function name and serialized arguments of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Why the model stopped generating.
///
/// Unknown values pass through verbatim via the untagged variant so
/// translation never invents a vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Hit the max-tokens limit.
    Length,
    /// Content was filtered.
    ContentFilter,
    /// The model emitted tool calls.
    ToolCalls,
    /// Verbatim passthrough of an unrecognized value.
    #[serde(untagged)]
    Other(String),
}

/// Response object type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// A single model entry.
    Model,
    /// A list container.
    List,
    /// A complete chat completion.
    #[serde(rename = "chat.completion")]
    ChatCompletion,
    /// One chunk of a streamed chat completion.
    #[serde(rename = "chat.completion.chunk")]
    ChatCompletionChunk,
}

/// Complete (non-streaming) chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Completion identifier.
    pub id: String,
    /// Always `chat.completion`.
    pub object: ObjectType,
    /// Unix timestamp of creation.
    pub created: u64,
    /// Model label echoed to the client.
    pub model: String,
    /// Generated choices; index 0 is the primary response.
    pub choices: Vec<ChatChoice>,
    /// Token accounting.
    pub usage: Usage,
}

/// One generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index.
    pub index: u32,
    /// The generated message.
    pub message: ChatMessage,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

/// Token usage accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated.
    pub completion_tokens: u32,
    /// Sum of the two.
    pub total_tokens: u32,
}

/// One chunk of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Completion identifier, stable across chunks.
    pub id: String,
    /// Always `chat.completion.chunk`.
    pub object: ObjectType,
    /// Unix timestamp.
    pub created: u64,
    /// Model label.
    pub model: String,
    /// Fingerprint passthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_fingerprint: Option<String>,
    /// Incremental choice updates.
    pub choices: Vec<ChatChoiceDelta>,
    /// Present only on the final usage-bearing chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoiceDelta {
    /// Choice index.
    pub index: u32,
    /// The content delta.
    pub delta: ChatMessageDelta,
    /// Set on the final chunk for this choice.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    /// Logprobs passthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

/// Delta payload of a streamed chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessageDelta {
    /// Present on the first chunk only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    /// Text fragment to append.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incremental tool call updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
    /// Refusal text, when the model declines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

/// Tool call updates arriving incrementally over the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamingToolCall {
    /// Establishes a new tool call.
    Start {
        /// Position in the tool_calls array.
        index: usize,
        /// Call identifier.
        id: String,
        /// Always `function`.
        #[serde(rename = "type")]
        r#type: ToolCallType,
        /// Function name plus initial (usually empty) arguments.
        function: FunctionStart,
    },
    /// Appends argument bytes to an established call.
    Delta {
        /// Position matching the call to update.
        index: usize,
        /// The argument fragment.
        function: FunctionDelta,
    },
}

/// Initial function information of a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionStart {
    /// Function name.
    pub name: String,
    /// Initial arguments content, usually empty.
    #[serde(default)]
    pub arguments: String,
}

/// Incremental arguments of a streamed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDelta {
    /// Fragment to append to the arguments string.
    pub arguments: String,
}

/// One model entry in a models listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier to use in requests.
    pub id: String,
    /// Always `model`.
    pub object: ObjectType,
    /// Unix timestamp, 0 when unknown.
    pub created: u64,
    /// Owning organization.
    pub owned_by: String,
}

/// Models listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always `list`.
    pub object: ObjectType,
    /// The models.
    pub data: Vec<Model>,
}
