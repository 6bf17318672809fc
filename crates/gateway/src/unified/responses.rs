//! Conversions between the unified model and the openai responses
//! endpoint family.
//!
//! The family is message-shaped but flatter than chat completions: text
//! input items in, output_text parts out. Tool traffic stays on the chat
//! endpoint, so these conversions flatten rich content to text.

use crate::{dialect::responses, unified};

impl From<unified::UnifiedRequest> for responses::ResponsesRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let input = req
            .messages
            .iter()
            .map(|msg| responses::InputItem {
                role: match msg.role {
                    unified::UnifiedRole::Assistant => "assistant".to_string(),
                    _ => "user".to_string(),
                },
                content: msg.text_content(),
            })
            .collect();

        Self {
            model: req.model,
            input,
            instructions: req.system,
            max_output_tokens: req.max_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stream: req.stream,
        }
    }
}

impl From<responses::ResponsesResponse> for unified::UnifiedResponse {
    fn from(resp: responses::ResponsesResponse) -> Self {
        let text = resp.output_text();

        let finish_reason = match resp.status.as_deref() {
            Some("incomplete") => Some(unified::UnifiedFinishReason::Length),
            Some("failed") => Some(unified::UnifiedFinishReason::ContentFilter),
            _ => Some(unified::UnifiedFinishReason::Stop),
        };

        let usage = resp
            .usage
            .map(|usage| unified::UnifiedUsage {
                prompt_tokens: usage.input_tokens,
                completion_tokens: usage.output_tokens,
                total_tokens: usage.total_tokens,
            })
            .unwrap_or_default();

        Self {
            id: resp.id,
            model: resp.model,
            choices: vec![unified::UnifiedChoice {
                index: 0,
                message: unified::UnifiedMessage {
                    role: unified::UnifiedRole::Assistant,
                    content: unified::UnifiedContentContainer::Text(text),
                    tool_calls: None,
                    tool_call_id: None,
                },
                finish_reason,
            }],
            usage,
            created: resp.created_at.unwrap_or(0),
            stop_reason: None,
            stop_sequence: None,
        }
    }
}
