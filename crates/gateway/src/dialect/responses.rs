//! OpenAI `responses` endpoint-family wire types.
//!
//! The newer sibling of chat completions. The gateway only exercises the
//! message-shaped subset: text input items in, output_text items out. The
//! adaptive probe decides per (provider, model) whether this family or
//! chat completions is used.

use serde::{Deserialize, Serialize};

/// Request body for the responses endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// The model to use.
    pub model: String,

    /// Message-shaped input items.
    pub input: Vec<InputItem>,

    /// System instructions; this family hoists them out of the input list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Maximum output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Nucleus sampling cutoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Whether to stream the response as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// One message-shaped input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    /// Sender role: `user` or `assistant`.
    pub role: String,
    /// Flat text content.
    pub content: String,
}

/// Complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response identifier (`resp_…`).
    pub id: String,
    /// Always `response`.
    #[serde(default)]
    pub object: Option<String>,
    /// Unix timestamp of creation.
    #[serde(default)]
    pub created_at: Option<u64>,
    /// Model label.
    pub model: String,
    /// Terminal status: `completed`, `incomplete`, `failed`.
    #[serde(default)]
    pub status: Option<String>,
    /// Output items.
    #[serde(default)]
    pub output: Vec<OutputItem>,
    /// Token accounting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponsesUsage>,
}

impl ResponsesResponse {
    /// Concatenated text of all output_text parts, in order.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.part_type == "output_text")
            .map(|part| part.text.as_str())
            .collect()
    }
}

/// One output item; the gateway consumes `message` items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputItem {
    /// Item type, `message` for text output.
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    /// Sender role, `assistant`.
    #[serde(default)]
    pub role: Option<String>,
    /// Content parts of the item.
    #[serde(default)]
    pub content: Vec<OutputContent>,
}

/// One content part of an output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputContent {
    /// Part type, `output_text` for text.
    #[serde(rename = "type")]
    pub part_type: String,
    /// The text.
    #[serde(default)]
    pub text: String,
}

/// Token accounting; note the different field names from chat completions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    /// Tokens in the input.
    #[serde(default)]
    pub input_tokens: u32,
    /// Tokens generated.
    #[serde(default)]
    pub output_tokens: u32,
    /// Sum of the two.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Streaming events of the responses family. Only the subset the gateway
/// translates is modeled; everything else is skipped by the ingress loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    /// Incremental output text.
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        /// The text fragment.
        delta: String,
    },
    /// Terminal event carrying the completed response.
    #[serde(rename = "response.completed")]
    Completed {
        /// The full response object, with usage.
        response: ResponsesResponse,
    },
    /// Terminal event for a failed response.
    #[serde(rename = "response.failed")]
    Failed {
        /// The response object describing the failure.
        response: ResponsesResponse,
    },
    /// Any event type the gateway does not translate.
    #[serde(untagged)]
    Other(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_text_concatenates_message_parts() {
        let response: ResponsesResponse = serde_json::from_str(
            r#"{
                "id": "resp_1",
                "object": "response",
                "model": "gpt-4o-mini",
                "status": "completed",
                "output": [
                    {
                        "type": "message",
                        "role": "assistant",
                        "content": [
                            { "type": "output_text", "text": "Hello" },
                            { "type": "output_text", "text": ", world" }
                        ]
                    }
                ],
                "usage": { "input_tokens": 3, "output_tokens": 2, "total_tokens": 5 }
            }"#,
        )
        .unwrap();

        assert_eq!(response.output_text(), "Hello, world");
        assert_eq!(response.usage.unwrap().output_tokens, 2);
    }

    #[test]
    fn stream_events_parse_known_and_unknown() {
        let delta: ResponsesStreamEvent =
            serde_json::from_str(r#"{"type":"response.output_text.delta","delta":"Hi"}"#).unwrap();
        assert!(matches!(delta, ResponsesStreamEvent::OutputTextDelta { .. }));

        let other: ResponsesStreamEvent =
            serde_json::from_str(r#"{"type":"response.in_progress","sequence_number":2}"#).unwrap();
        assert!(matches!(other, ResponsesStreamEvent::Other(_)));
    }
}
