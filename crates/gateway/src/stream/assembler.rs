//! Stream assembler: folds a stream of block events into a complete
//! response object, equivalent to what a non-stream call would have
//! returned. Feeds the scenario recorder; indifferent to the client's
//! output dialect.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::dialect::anthropic::{
    BlockDelta, ContentBlock, MessagesResponse, Role, StopReason, StreamEvent, Usage,
};

#[derive(Debug)]
enum AssembledBlock {
    Text {
        content: String,
    },
    Thinking {
        text: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
    Other {
        raw: Value,
    },
}

/// Folds block events into message-level and block-level state.
///
/// Every delta must reference a block previously started; violations are
/// dropped with a log. The finished content array is ordered by block
/// index ascending and dense.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    message_id: String,
    message_type: String,
    role: Option<Role>,
    model: String,
    stop_reason: Option<StopReason>,
    stop_sequence: Option<String>,
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    blocks: BTreeMap<u32, AssembledBlock>,
}

impl StreamAssembler {
    /// Fresh assembler for one stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message } => {
                self.message_id = message.id.clone();
                self.message_type = message.message_type.clone();
                self.role = Some(message.role);
                self.model = message.model.clone();

                if message.usage.input_tokens.is_some() {
                    self.input_tokens = message.usage.input_tokens;
                }
                if message.usage.output_tokens.is_some() {
                    self.output_tokens = message.usage.output_tokens;
                }
            }

            StreamEvent::ContentBlockStart { index, content_block } => {
                let block = match content_block {
                    ContentBlock::Text { text } => AssembledBlock::Text {
                        content: text.clone(),
                    },
                    ContentBlock::Thinking { thinking, signature } => AssembledBlock::Thinking {
                        text: thinking.clone(),
                        signature: signature.clone(),
                    },
                    ContentBlock::ToolUse { id, name, .. } => AssembledBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input_json: String::new(),
                    },
                    other => AssembledBlock::Other {
                        raw: serde_json::to_value(other).unwrap_or(Value::Null),
                    },
                };

                self.blocks.insert(*index, block);
            }

            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = self.blocks.get_mut(index) else {
                    log::warn!("Assembler got a delta for unopened block {index}");
                    return;
                };

                match (block, delta) {
                    (AssembledBlock::Text { content }, BlockDelta::TextDelta { text }) => {
                        content.push_str(text);
                    }
                    (AssembledBlock::Thinking { text, .. }, BlockDelta::ThinkingDelta { thinking }) => {
                        text.push_str(thinking);
                    }
                    (AssembledBlock::Thinking { signature, .. }, BlockDelta::SignatureDelta { signature: s }) => {
                        *signature = Some(signature.take().unwrap_or_default() + s);
                    }
                    (AssembledBlock::ToolUse { input_json, .. }, BlockDelta::InputJsonDelta { partial_json }) => {
                        input_json.push_str(partial_json);
                    }
                    (block, delta) => {
                        log::warn!("Assembler got a mismatched delta {delta:?} for block {block:?}");
                    }
                }
            }

            StreamEvent::ContentBlockStop { .. } => {}

            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason.clone();
                }
                if delta.stop_sequence.is_some() {
                    self.stop_sequence = delta.stop_sequence.clone();
                }

                if let Some(usage) = usage {
                    if usage.input_tokens.is_some() {
                        self.input_tokens = usage.input_tokens;
                    }
                    if usage.output_tokens.is_some() {
                        self.output_tokens = usage.output_tokens;
                    }
                }
            }

            StreamEvent::MessageStop | StreamEvent::Ping => {}

            StreamEvent::Error { error } => {
                log::debug!("Assembler observed stream error: {}", error.message);
            }
        }
    }

    /// Concatenated text of all text blocks, in block-index order.
    pub fn text(&self) -> String {
        self.blocks
            .values()
            .filter_map(|block| match block {
                AssembledBlock::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Produce the materialized response.
    pub fn finish(self) -> MessagesResponse {
        let content = self
            .blocks
            .into_values()
            .map(|block| match block {
                AssembledBlock::Text { content } => ContentBlock::Text { text: content },
                AssembledBlock::Thinking { text, signature } => ContentBlock::Thinking {
                    thinking: text,
                    signature,
                },
                AssembledBlock::ToolUse { id, name, input_json } => ContentBlock::ToolUse {
                    id,
                    name,
                    input: serde_json::from_str(&input_json)
                        .unwrap_or_else(|_| Value::Object(serde_json::Map::new())),
                },
                AssembledBlock::Other { raw } => ContentBlock::Other(raw),
            })
            .collect();

        MessagesResponse {
            id: self.message_id,
            response_type: if self.message_type.is_empty() {
                "message".to_string()
            } else {
                self.message_type
            },
            role: self.role.unwrap_or(Role::Assistant),
            content,
            model: self.model,
            stop_reason: self.stop_reason,
            stop_sequence: self.stop_sequence,
            usage: Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(assembler: &mut StreamAssembler, events: &[&str]) {
        for raw in events {
            let event: StreamEvent = serde_json::from_str(raw).unwrap();
            assembler.apply(&event);
        }
    }

    #[test]
    fn reassembles_text_per_block_in_index_order() {
        let mut assembler = StreamAssembler::new();

        apply_all(
            &mut assembler,
            &[
                r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"m","usage":{"input_tokens":7,"output_tokens":0}}}"#,
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}"#,
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"lo!"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"…"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
                r#"{"type":"content_block_stop","index":1}"#,
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#,
                r#"{"type":"message_stop"}"#,
            ],
        );

        assert_eq!(assembler.text(), "Hel…lo!");

        let response = assembler.finish();
        assert_eq!(response.id, "msg_1");
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.usage.input_tokens, Some(7));
        assert_eq!(response.usage.output_tokens, Some(5));
        assert_eq!(response.content.len(), 2);
    }

    #[test]
    fn tool_use_input_parses_from_accumulated_json() {
        let mut assembler = StreamAssembler::new();

        apply_all(
            &mut assembler,
            &[
                r#"{"type":"message_start","message":{"id":"msg_2","type":"message","role":"assistant","content":[],"model":"m","usage":{"input_tokens":1,"output_tokens":0}}}"#,
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"lookup","input":{}}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"rust\"}"}}"#,
                r#"{"type":"content_block_stop","index":0}"#,
            ],
        );

        let response = assembler.finish();

        let ContentBlock::ToolUse { input, .. } = &response.content[0] else {
            panic!("expected tool use block");
        };
        assert_eq!(input["q"], "rust");
    }

    #[test]
    fn thinking_blocks_accumulate_text_and_signature() {
        let mut assembler = StreamAssembler::new();

        apply_all(
            &mut assembler,
            &[
                r#"{"type":"message_start","message":{"id":"msg_3","type":"message","role":"assistant","content":[],"model":"m","usage":{"input_tokens":1,"output_tokens":0}}}"#,
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"let me "}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"think"}}"#,
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"c2ln"}}"#,
            ],
        );

        let response = assembler.finish();

        let ContentBlock::Thinking { thinking, signature } = &response.content[0] else {
            panic!("expected thinking block");
        };
        assert_eq!(thinking, "let me think");
        assert_eq!(signature.as_deref(), Some("c2ln"));
    }

    #[test]
    fn orphan_deltas_are_ignored() {
        let mut assembler = StreamAssembler::new();

        apply_all(
            &mut assembler,
            &[r#"{"type":"content_block_delta","index":3,"delta":{"type":"text_delta","text":"x"}}"#],
        );

        assert_eq!(assembler.text(), "");
        assert!(assembler.finish().content.is_empty());
    }
}
