//! Request feature extraction for smart routing.

use sha2::{Digest, Sha256};

use crate::{token_count, unified::UnifiedRequest};

/// The request facts smart-routing matchers operate on.
#[derive(Debug, Clone)]
pub struct RequestFeatures {
    /// Number of conversation messages.
    pub message_count: usize,
    /// Names of the declared tools.
    pub tool_names: Vec<String>,
    /// Hex SHA-256 of the system prompt, when one is present.
    pub system_prompt_sha256: Option<String>,
    /// Role of the last message.
    pub last_role: Option<String>,
    /// Token-length estimate of the whole input.
    pub token_estimate: u32,
}

impl RequestFeatures {
    /// Extract features from a request. Infallible by design; anything
    /// that cannot be computed becomes an absent feature.
    pub fn extract(request: &UnifiedRequest) -> RequestFeatures {
        let tool_names = request
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(|tool| tool.function.name.clone()).collect())
            .unwrap_or_default();

        let system_prompt_sha256 = request.system.as_deref().map(|system| {
            let digest = Sha256::digest(system.as_bytes());
            format!("{digest:x}")
        });

        let last_role = request.messages.last().map(|message| {
            match message.role {
                crate::unified::UnifiedRole::System => "system",
                crate::unified::UnifiedRole::User => "user",
                crate::unified::UnifiedRole::Assistant => "assistant",
                crate::unified::UnifiedRole::Tool => "tool",
            }
            .to_string()
        });

        RequestFeatures {
            message_count: request.messages.len(),
            tool_names,
            system_prompt_sha256,
            last_role,
            token_estimate: token_count::estimate_input_tokens(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::{
        UnifiedContentContainer, UnifiedFunction, UnifiedMessage, UnifiedRole, UnifiedTool,
    };

    #[test]
    fn extraction_covers_all_feature_axes() {
        let request = UnifiedRequest {
            model: "alpha".to_string(),
            messages: vec![
                UnifiedMessage {
                    role: UnifiedRole::User,
                    content: UnifiedContentContainer::Text("question".to_string()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                UnifiedMessage {
                    role: UnifiedRole::Assistant,
                    content: UnifiedContentContainer::Text("answer".to_string()),
                    tool_calls: None,
                    tool_call_id: None,
                },
            ],
            system: Some("be brief".to_string()),
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: None,
            thinking_budget: None,
            tools: Some(vec![UnifiedTool {
                function: UnifiedFunction {
                    name: "search".to_string(),
                    description: None,
                    parameters: serde_json::json!({}),
                },
            }]),
            tool_choice: None,
            parallel_tool_calls: None,
            user_id: None,
        };

        let features = RequestFeatures::extract(&request);

        assert_eq!(features.message_count, 2);
        assert_eq!(features.tool_names, vec!["search"]);
        assert_eq!(features.last_role.as_deref(), Some("assistant"));
        assert!(features.token_estimate >= 1);

        // SHA-256 of "be brief", stable across runs.
        assert_eq!(
            features.system_prompt_sha256.as_deref(),
            Some("b0d336336bae9756708102764ccc977778d8c408df38d7050d69f9e4d22c9a43")
        );
    }
}
