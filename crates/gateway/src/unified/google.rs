//! Conversions between the unified model and google-dialect types, both
//! directions. Only the openai-facing path exercises these: clients never
//! speak this dialect directly.

use crate::{dialect::google, unified};

impl From<unified::UnifiedRequest> for google::GenerateContentRequest {
    fn from(req: unified::UnifiedRequest) -> Self {
        let generation_config = google::GenerationConfig {
            temperature: req.temperature,
            top_p: req.top_p,
            top_k: req.top_k,
            max_output_tokens: req.max_tokens,
            stop_sequences: req.stop_sequences,
        };

        // This dialect keeps system instructions in a config-level field.
        let system_instruction = req.system.map(|text| google::Content {
            role: None,
            parts: vec![google::Part::text(text)],
        });

        let tools = req.tools.map(|tools| {
            vec![google::Tool {
                function_declarations: tools
                    .into_iter()
                    .map(|tool| google::FunctionDeclaration {
                        name: tool.function.name,
                        description: tool.function.description,
                        parameters: Some(tool.function.parameters),
                    })
                    .collect(),
            }]
        });

        Self {
            contents: req.messages.into_iter().map(google::Content::from).collect(),
            system_instruction,
            generation_config: Some(generation_config),
            tools,
        }
    }
}

impl From<unified::UnifiedMessage> for google::Content {
    fn from(msg: unified::UnifiedMessage) -> Self {
        let role = match msg.role {
            unified::UnifiedRole::Assistant => Some("model".to_string()),
            _ => Some("user".to_string()),
        };

        let mut parts: Vec<google::Part> = Vec::new();

        match msg.content {
            unified::UnifiedContentContainer::Text(text) => {
                if let Some(id) = msg.tool_call_id.clone() {
                    // Tool-role message: this dialect answers calls by
                    // function name, the id only names the response.
                    parts.push(google::Part {
                        function_response: Some(google::FunctionResponse {
                            name: id,
                            response: serde_json::json!({ "result": text }),
                        }),
                        ..Default::default()
                    });
                } else if !text.is_empty() {
                    parts.push(google::Part::text(text));
                }
            }
            unified::UnifiedContentContainer::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        unified::UnifiedContent::Text { text } => parts.push(google::Part::text(text)),
                        unified::UnifiedContent::ToolUse { name, input, .. } => parts.push(google::Part {
                            function_call: Some(google::FunctionCall {
                                name,
                                args: input,
                            }),
                            ..Default::default()
                        }),
                        unified::UnifiedContent::ToolResult {
                            tool_use_id, content, ..
                        } => parts.push(google::Part {
                            function_response: Some(google::FunctionResponse {
                                name: tool_use_id,
                                response: serde_json::json!({ "result": content }),
                            }),
                            ..Default::default()
                        }),
                        unified::UnifiedContent::Thinking { .. } => {
                            log::debug!("Dropping thinking block on conversion to google dialect");
                        }
                        unified::UnifiedContent::Image { .. } => {
                            log::warn!("Dropping image block on conversion to google dialect");
                        }
                    }
                }
            }
        }

        if let Some(calls) = msg.tool_calls {
            for call in calls {
                parts.push(google::Part {
                    function_call: Some(google::FunctionCall {
                        name: call.function.name,
                        args: call.function.arguments.into_value(),
                    }),
                    ..Default::default()
                });
            }
        }

        if parts.is_empty() {
            parts.push(google::Part::text(String::new()));
        }

        Self { role, parts }
    }
}

/// Map this dialect's all-caps finish vocabulary into the unified one.
/// Unknown values travel verbatim.
pub(crate) fn finish_reason(reason: &str) -> unified::UnifiedFinishReason {
    match reason {
        "STOP" => unified::UnifiedFinishReason::Stop,
        "MAX_TOKENS" => unified::UnifiedFinishReason::Length,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => unified::UnifiedFinishReason::ContentFilter,
        other => unified::UnifiedFinishReason::Other(other.to_string()),
    }
}

impl From<google::GenerateContentResponse> for unified::UnifiedResponse {
    fn from(resp: google::GenerateContentResponse) -> Self {
        let usage = resp
            .usage_metadata
            .map(|usage| unified::UnifiedUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            })
            .unwrap_or_default();

        let choices = resp
            .candidates
            .into_iter()
            .enumerate()
            .map(|(position, candidate)| {
                let mut blocks: Vec<unified::UnifiedContent> = Vec::new();

                for part in candidate.content.into_iter().flat_map(|c| c.parts) {
                    if let Some(text) = part.text {
                        blocks.push(unified::UnifiedContent::Text { text });
                    }

                    if let Some(call) = part.function_call {
                        blocks.push(unified::UnifiedContent::ToolUse {
                            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                            name: call.name,
                            input: call.args,
                        });
                    }
                }

                let finish = candidate.finish_reason.as_deref().map(finish_reason);

                unified::UnifiedChoice {
                    index: candidate.index.unwrap_or(position as u32),
                    message: unified::UnifiedMessage {
                        role: unified::UnifiedRole::Assistant,
                        content: unified::UnifiedContentContainer::Blocks(blocks),
                        tool_calls: None,
                        tool_call_id: None,
                    },
                    finish_reason: finish,
                }
            })
            .collect();

        Self {
            id: format!("gen_{}", uuid::Uuid::new_v4().simple()),
            model: resp.model_version.unwrap_or_default(),
            choices,
            usage,
            created: 0,
            stop_reason: None,
            stop_sequence: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_hoists_system_into_system_instruction() {
        let request = unified::UnifiedRequest {
            model: "gemini-2.0-flash".to_string(),
            messages: vec![unified::UnifiedMessage {
                role: unified::UnifiedRole::User,
                content: unified::UnifiedContentContainer::Text("hi".to_string()),
                tool_calls: None,
                tool_call_id: None,
            }],
            system: Some("be brief".to_string()),
            max_tokens: Some(64),
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

        let converted = google::GenerateContentRequest::from(request);

        assert!(converted.system_instruction.is_some());
        assert_eq!(
            converted.generation_config.unwrap().max_output_tokens,
            Some(64)
        );
        assert_eq!(converted.contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn finish_reason_vocabulary_maps_with_verbatim_fallback() {
        assert_eq!(finish_reason("STOP"), unified::UnifiedFinishReason::Stop);
        assert_eq!(finish_reason("MAX_TOKENS"), unified::UnifiedFinishReason::Length);
        assert_eq!(
            finish_reason("RECITATION"),
            unified::UnifiedFinishReason::Other("RECITATION".to_string())
        );
    }
}
