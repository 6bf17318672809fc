//! Conversions from the unified model to anthropic-dialect types.

use serde_json::Value;

use crate::{dialect::anthropic, unified};

/// Fallback when neither the client nor the forwarder set `max_tokens`.
/// The forwarder normally fills the field from configuration before this
/// conversion runs; this constant only backstops direct conversions.
pub(crate) const FALLBACK_MAX_TOKENS: u32 = 4096;

impl From<unified::UnifiedRequest> for anthropic::MessagesRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let thinking = req.thinking_budget.map(|budget_tokens| {
            anthropic::ThinkingConfig::Enabled { budget_tokens }
        });

        let messages = req.messages.into_iter().map(anthropic::Message::from).collect();

        Self {
            model: req.model,
            messages,
            max_tokens: req.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            system: req.system.map(anthropic::SystemPrompt::Text),
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            stop_sequences: req.stop_sequences,
            stream: req.stream,
            thinking,
            metadata: req.user_id.map(|user_id| anthropic::Metadata {
                user_id: Some(user_id),
            }),
            tools: req
                .tools
                .map(|t| t.into_iter().map(anthropic::ToolDefinition::from).collect()),
            tool_choice: req.tool_choice.map(anthropic::ToolChoice::from),
        }
    }
}

impl From<unified::UnifiedMessage> for anthropic::Message {
    fn from(msg: unified::UnifiedMessage) -> Self {
        // This dialect only knows user and assistant; tool results ride in
        // user messages, system never reaches here (it was extracted into
        // the dedicated field).
        let role = match msg.role {
            unified::UnifiedRole::Assistant => anthropic::Role::Assistant,
            unified::UnifiedRole::User | unified::UnifiedRole::System | unified::UnifiedRole::Tool => {
                anthropic::Role::User
            }
        };

        let mut blocks: Vec<anthropic::ContentBlock> = Vec::new();

        match msg.content {
            unified::UnifiedContentContainer::Text(text) => {
                if let Some(id) = msg.tool_call_id.clone() {
                    // An openai tool-role message: the text is the result
                    // of the referenced call.
                    blocks.push(anthropic::ContentBlock::ToolResult {
                        tool_use_id: id,
                        content: Some(anthropic::MessageContent::Text(text)),
                        is_error: None,
                    });
                } else if !text.is_empty() {
                    blocks.push(anthropic::ContentBlock::Text { text });
                }
            }
            unified::UnifiedContentContainer::Blocks(content_blocks) => {
                for block in content_blocks {
                    blocks.push(anthropic_block(block));
                }
            }
        }

        // Tool calls carried in the explicit openai-shaped field become
        // tool_use blocks appended after the text.
        if let Some(calls) = msg.tool_calls {
            for call in calls {
                blocks.push(anthropic::ContentBlock::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input: call.function.arguments.into_value(),
                });
            }
        }

        if blocks.is_empty() {
            blocks.push(anthropic::ContentBlock::Text { text: String::new() });
        }

        Self {
            role,
            content: anthropic::MessageContent::Blocks(blocks),
        }
    }
}

fn anthropic_block(block: unified::UnifiedContent) -> anthropic::ContentBlock {
    match block {
        unified::UnifiedContent::Text { text } => anthropic::ContentBlock::Text { text },
        unified::UnifiedContent::Thinking { text, signature } => anthropic::ContentBlock::Thinking {
            thinking: text,
            signature,
        },
        unified::UnifiedContent::Image { source } => anthropic::ContentBlock::Image { source },
        unified::UnifiedContent::ToolUse { id, name, input } => anthropic::ContentBlock::ToolUse {
            id,
            name,
            input: normalize_tool_input(input),
        },
        unified::UnifiedContent::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => anthropic::ContentBlock::ToolResult {
            tool_use_id,
            content: Some(anthropic::MessageContent::Text(content)),
            is_error,
        },
    }
}

fn normalize_tool_input(input: Value) -> Value {
    if input.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        input
    }
}

impl From<unified::UnifiedTool> for anthropic::ToolDefinition {
    fn from(tool: unified::UnifiedTool) -> Self {
        Self {
            name: tool.function.name,
            description: tool.function.description,
            input_schema: tool.function.parameters,
        }
    }
}

impl From<unified::UnifiedToolChoice> for anthropic::ToolChoice {
    fn from(choice: unified::UnifiedToolChoice) -> Self {
        match choice {
            unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Auto) => anthropic::ToolChoice::Auto,
            unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::Required) => anthropic::ToolChoice::Any,
            unified::UnifiedToolChoice::Mode(unified::UnifiedToolChoiceMode::None) => anthropic::ToolChoice::None,
            unified::UnifiedToolChoice::Specific { function } => {
                anthropic::ToolChoice::Tool { name: function.name }
            }
        }
    }
}

impl From<unified::UnifiedStopReason> for anthropic::StopReason {
    fn from(reason: unified::UnifiedStopReason) -> Self {
        match reason {
            unified::UnifiedStopReason::EndTurn => anthropic::StopReason::EndTurn,
            unified::UnifiedStopReason::MaxTokens => anthropic::StopReason::MaxTokens,
            unified::UnifiedStopReason::StopSequence => anthropic::StopReason::StopSequence,
            unified::UnifiedStopReason::ToolUse => anthropic::StopReason::ToolUse,
            unified::UnifiedStopReason::Refusal => anthropic::StopReason::Refusal,
            unified::UnifiedStopReason::Other(s) => anthropic::StopReason::Other(s),
        }
    }
}

impl From<unified::UnifiedResponse> for anthropic::MessagesResponse {
    fn from(resp: unified::UnifiedResponse) -> Self {
        // The detailed stop reason wins when present; otherwise derive it
        // from the coarse finish reason through the bijection.
        let stop_reason = resp.stop_reason.clone().or_else(|| {
            resp.choices
                .first()
                .and_then(|c| c.finish_reason.clone())
                .map(unified::UnifiedStopReason::from)
        });

        let content = resp
            .choices
            .into_iter()
            .next()
            .map(|choice| response_blocks(choice.message))
            .unwrap_or_default();

        Self {
            id: resp.id,
            response_type: "message".to_string(),
            role: anthropic::Role::Assistant,
            content,
            model: resp.model,
            stop_reason: stop_reason.map(anthropic::StopReason::from),
            stop_sequence: resp.stop_sequence,
            usage: anthropic::Usage {
                input_tokens: Some(resp.usage.prompt_tokens),
                output_tokens: Some(resp.usage.completion_tokens),
            },
        }
    }
}

fn response_blocks(message: unified::UnifiedMessage) -> Vec<anthropic::ContentBlock> {
    let mut blocks = Vec::new();

    match message.content {
        unified::UnifiedContentContainer::Text(text) if !text.is_empty() => {
            blocks.push(anthropic::ContentBlock::Text { text });
        }
        unified::UnifiedContentContainer::Blocks(content_blocks) => {
            blocks.extend(content_blocks.into_iter().filter_map(|block| match block {
                // Tool results never appear in responses.
                unified::UnifiedContent::ToolResult { .. } => None,
                other => Some(anthropic_block(other)),
            }));
        }
        _ => {}
    }

    if let Some(calls) = message.tool_calls {
        for call in calls {
            blocks.push(anthropic::ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input: call.function.arguments.into_value(),
            });
        }
    }

    blocks
}
