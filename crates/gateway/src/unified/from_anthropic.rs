//! Conversions from anthropic-dialect types to the unified model.

use crate::{dialect::anthropic, unified};

impl From<anthropic::MessagesRequest> for unified::UnifiedRequest {
    fn from(req: anthropic::MessagesRequest) -> Self {
        let thinking_budget = req.thinking.and_then(|t| match t {
            anthropic::ThinkingConfig::Enabled { budget_tokens } => Some(budget_tokens),
            anthropic::ThinkingConfig::Disabled => None,
        });

        Self {
            model: req.model,
            messages: req.messages.into_iter().map(unified::UnifiedMessage::from).collect(),
            system: req.system.map(anthropic::SystemPrompt::into_text),
            max_tokens: Some(req.max_tokens),
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            thinking_budget,
            tools: req
                .tools
                .map(|t| t.into_iter().map(unified::UnifiedTool::from).collect()),
            tool_choice: req.tool_choice.map(unified::UnifiedToolChoice::from),
            parallel_tool_calls: None,
            user_id: req.metadata.and_then(|m| m.user_id),
        }
    }
}

impl From<anthropic::Message> for unified::UnifiedMessage {
    fn from(msg: anthropic::Message) -> Self {
        let role = match msg.role {
            anthropic::Role::User => unified::UnifiedRole::User,
            anthropic::Role::Assistant => unified::UnifiedRole::Assistant,
        };

        let content = match msg.content {
            anthropic::MessageContent::Text(text) => unified::UnifiedContentContainer::Text(text),
            anthropic::MessageContent::Blocks(blocks) => unified::UnifiedContentContainer::Blocks(
                blocks.into_iter().filter_map(unified_block).collect(),
            ),
        };

        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

fn unified_block(block: anthropic::ContentBlock) -> Option<unified::UnifiedContent> {
    match block {
        anthropic::ContentBlock::Text { text } => Some(unified::UnifiedContent::Text { text }),
        anthropic::ContentBlock::Thinking { thinking, signature } => Some(unified::UnifiedContent::Thinking {
            text: thinking,
            signature,
        }),
        anthropic::ContentBlock::Image { source } => Some(unified::UnifiedContent::Image { source }),
        anthropic::ContentBlock::ToolUse { id, name, input } => {
            Some(unified::UnifiedContent::ToolUse { id, name, input })
        }
        anthropic::ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(unified::UnifiedContent::ToolResult {
            tool_use_id,
            content: content.map(flatten_tool_result).unwrap_or_default(),
            is_error,
        }),
        anthropic::ContentBlock::Other(raw) => {
            log::debug!("Skipping unrecognized content block during conversion: {raw}");
            None
        }
    }
}

fn flatten_tool_result(content: anthropic::MessageContent) -> String {
    match content {
        anthropic::MessageContent::Text(text) => text,
        anthropic::MessageContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| match block {
                anthropic::ContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

impl From<anthropic::ToolDefinition> for unified::UnifiedTool {
    fn from(tool: anthropic::ToolDefinition) -> Self {
        Self {
            function: unified::UnifiedFunction {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            },
        }
    }
}

impl From<anthropic::ToolChoice> for unified::UnifiedToolChoice {
    fn from(choice: anthropic::ToolChoice) -> Self {
        match choice {
            anthropic::ToolChoice::Auto => {
                unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Auto)
            }
            anthropic::ToolChoice::Any => {
                unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Required)
            }
            anthropic::ToolChoice::None => {
                unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::None)
            }
            anthropic::ToolChoice::Tool { name } => unified::UnifiedToolChoice::Specific {
                function: unified::UnifiedFunctionChoice { name },
            },
        }
    }
}

impl From<anthropic::StopReason> for unified::UnifiedStopReason {
    fn from(reason: anthropic::StopReason) -> Self {
        match reason {
            anthropic::StopReason::EndTurn => unified::UnifiedStopReason::EndTurn,
            anthropic::StopReason::MaxTokens => unified::UnifiedStopReason::MaxTokens,
            anthropic::StopReason::StopSequence => unified::UnifiedStopReason::StopSequence,
            anthropic::StopReason::ToolUse => unified::UnifiedStopReason::ToolUse,
            anthropic::StopReason::Refusal => unified::UnifiedStopReason::Refusal,
            anthropic::StopReason::Other(s) => unified::UnifiedStopReason::Other(s),
        }
    }
}

impl From<anthropic::MessagesResponse> for unified::UnifiedResponse {
    fn from(resp: anthropic::MessagesResponse) -> Self {
        let content: Vec<unified::UnifiedContent> =
            resp.content.into_iter().filter_map(unified_block).collect();

        let stop_reason = resp.stop_reason.map(unified::UnifiedStopReason::from);
        let finish_reason = stop_reason.clone().map(unified::UnifiedFinishReason::from);

        let message = unified::UnifiedMessage {
            role: unified::UnifiedRole::Assistant,
            content: unified::UnifiedContentContainer::Blocks(content),
            tool_calls: None,
            tool_call_id: None,
        };

        let input_tokens = resp.usage.input_tokens.unwrap_or(0);
        let output_tokens = resp.usage.output_tokens.unwrap_or(0);

        Self {
            id: resp.id,
            model: resp.model,
            choices: vec![unified::UnifiedChoice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: unified::UnifiedUsage {
                prompt_tokens: input_tokens,
                completion_tokens: output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            created: 0,
            stop_reason,
            stop_sequence: resp.stop_sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_moves_system_and_requires_max_tokens() {
        let request: anthropic::MessagesRequest = serde_json::from_str(
            r#"{
                "model": "claude-3-5-haiku-latest",
                "system": "be brief",
                "max_tokens": 256,
                "messages": [{ "role": "user", "content": "hi" }]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedRequest::from(request);

        assert_eq!(unified.system.as_deref(), Some("be brief"));
        assert_eq!(unified.max_tokens, Some(256));
    }

    #[test]
    fn response_preserves_stop_reason_and_usage() {
        let response: anthropic::MessagesResponse = serde_json::from_str(
            r#"{
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "model": "claude-3-5-haiku-latest",
                "content": [
                    { "type": "text", "text": "Hello" },
                    { "type": "text", "text": "world" }
                ],
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": { "input_tokens": 10, "output_tokens": 4 }
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedResponse::from(response);

        assert_eq!(unified.stop_reason, Some(unified::UnifiedStopReason::EndTurn));
        assert_eq!(
            unified.choices[0].finish_reason,
            Some(unified::UnifiedFinishReason::Stop)
        );
        assert_eq!(unified.usage.prompt_tokens, 10);
        assert_eq!(unified.usage.total_tokens, 14);
        assert_eq!(unified.primary_text(), "Hello\nworld");
    }

    #[test]
    fn tool_result_blocks_flatten_to_text() {
        let message: anthropic::Message = serde_json::from_str(
            r#"{
                "role": "user",
                "content": [
                    {
                        "type": "tool_result",
                        "tool_use_id": "toolu_1",
                        "content": [{ "type": "text", "text": "42" }]
                    }
                ]
            }"#,
        )
        .unwrap();

        let unified = unified::UnifiedMessage::from(message);
        let unified::UnifiedContentContainer::Blocks(blocks) = &unified.content else {
            panic!("expected blocks");
        };

        let unified::UnifiedContent::ToolResult { content, .. } = &blocks[0] else {
            panic!("expected tool result");
        };
        assert_eq!(content, "42");
    }
}
