//! Anthropic-dialect SSE egress: synthesizes the explicit block framing
//! this dialect requires from the flat unified chunk stream.
//!
//! Opens a block when the first delta of its kind arrives, closes it when
//! the kind changes, and finishes the message with `message_delta` (stop
//! reason + usage) followed by `message_stop`.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{
    dialect::anthropic::{
        BlockDelta, ContentBlock, MessageDeltaPayload, MessageStart, Role, StopReason, StreamEvent, Usage,
    },
    unified::{UnifiedChunk, UnifiedStopReason, UnifiedStreamingToolCall, UnifiedUsage},
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    Text,
    Thinking,
    ToolUse,
}

/// Egress state machine for anthropic-dialect clients.
pub struct AnthropicEgress {
    response_model: String,
    message_id: String,
    started: bool,
    open_block: Option<OpenBlock>,
    next_index: u32,
    tool_blocks: HashMap<usize, u32>,
    stop_reason: Option<StopReason>,
    usage: Option<UnifiedUsage>,
    input_tokens_hint: u32,
}

impl AnthropicEgress {
    /// Create an egress relabeling the stream with `response_model`. The
    /// input-token hint seeds `message_start` when the upstream never
    /// reports usage.
    pub fn new(response_model: String, input_tokens_hint: u32) -> Self {
        AnthropicEgress {
            response_model,
            message_id: String::new(),
            started: false,
            open_block: None,
            next_index: 0,
            tool_blocks: HashMap::new(),
            stop_reason: None,
            usage: None,
            input_tokens_hint,
        }
    }

    /// Usage observed on the stream so far.
    pub fn observed_usage(&self) -> Option<UnifiedUsage> {
        self.usage
    }

    /// Translate one unified chunk into this dialect's events.
    pub fn on_chunk(&mut self, chunk: &UnifiedChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.message_id = if chunk.id.is_empty() {
                format!("msg_{}", Uuid::new_v4().simple())
            } else {
                chunk.id.clone()
            };

            events.push(StreamEvent::MessageStart {
                message: MessageStart {
                    id: self.message_id.clone(),
                    message_type: "message".to_string(),
                    role: Role::Assistant,
                    content: Vec::new(),
                    model: self.response_model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: Some(
                            chunk
                                .usage
                                .map(|u| u.prompt_tokens)
                                .filter(|&tokens| tokens > 0)
                                .unwrap_or(self.input_tokens_hint),
                        ),
                        output_tokens: Some(0),
                    },
                },
            });

            self.started = true;
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        for choice in &chunk.choices {
            if let Some(thinking) = &choice.delta.thinking {
                self.ensure_block(OpenBlock::Thinking, &mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.current_index(),
                    delta: BlockDelta::ThinkingDelta {
                        thinking: thinking.clone(),
                    },
                });
            }

            if let Some(signature) = &choice.delta.signature {
                self.ensure_block(OpenBlock::Thinking, &mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.current_index(),
                    delta: BlockDelta::SignatureDelta {
                        signature: signature.clone(),
                    },
                });
            }

            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.ensure_block(OpenBlock::Text, &mut events);
                    events.push(StreamEvent::ContentBlockDelta {
                        index: self.current_index(),
                        delta: BlockDelta::TextDelta {
                            text: content.clone(),
                        },
                    });
                }
            }

            for call in choice.delta.tool_calls.iter().flatten() {
                match call {
                    UnifiedStreamingToolCall::Start { index, id, function } => {
                        self.close_block(&mut events);

                        let block_index = self.next_index;
                        self.next_index += 1;
                        self.open_block = Some(OpenBlock::ToolUse);
                        self.tool_blocks.insert(*index, block_index);

                        events.push(StreamEvent::ContentBlockStart {
                            index: block_index,
                            content_block: ContentBlock::ToolUse {
                                id: id.clone(),
                                name: function.name.clone(),
                                input: serde_json::Value::Object(serde_json::Map::new()),
                            },
                        });

                        if !function.arguments.is_empty() {
                            events.push(StreamEvent::ContentBlockDelta {
                                index: block_index,
                                delta: BlockDelta::InputJsonDelta {
                                    partial_json: function.arguments.clone(),
                                },
                            });
                        }
                    }
                    UnifiedStreamingToolCall::Delta { index, function } => {
                        let Some(&block_index) = self.tool_blocks.get(index) else {
                            log::warn!("Tool delta for unknown call index {index}; dropping");
                            continue;
                        };

                        events.push(StreamEvent::ContentBlockDelta {
                            index: block_index,
                            delta: BlockDelta::InputJsonDelta {
                                partial_json: function.arguments.clone(),
                            },
                        });
                    }
                }
            }

            if let Some(finish) = &choice.finish_reason {
                self.stop_reason = Some(StopReason::from(UnifiedStopReason::from(finish.clone())));
            }
        }

        events
    }

    /// Close the message: final block stop, `message_delta` with the stop
    /// reason and usage, then `message_stop`.
    pub fn finish(&mut self, final_usage: UnifiedUsage) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            // Upstream produced nothing; still emit a well-formed message.
            events.extend(self.on_chunk(&UnifiedChunk {
                id: String::new(),
                model: self.response_model.clone(),
                choices: Vec::new(),
                usage: None,
                created: 0,
            }));
        }

        self.close_block(&mut events);

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason: Some(self.stop_reason.clone().unwrap_or(StopReason::EndTurn)),
                stop_sequence: None,
            },
            usage: Some(Usage {
                input_tokens: Some(final_usage.prompt_tokens),
                output_tokens: Some(final_usage.completion_tokens),
            }),
        });

        events.push(StreamEvent::MessageStop);

        events
    }

    fn ensure_block(&mut self, kind: OpenBlock, events: &mut Vec<StreamEvent>) {
        if self.open_block == Some(kind) {
            return;
        }

        self.close_block(events);

        let index = self.next_index;
        self.next_index += 1;
        self.open_block = Some(kind);

        let content_block = match kind {
            OpenBlock::Text => ContentBlock::Text { text: String::new() },
            OpenBlock::Thinking => ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            // Tool blocks are opened explicitly with their identity.
            OpenBlock::ToolUse => return,
        };

        events.push(StreamEvent::ContentBlockStart { index, content_block });
    }

    fn close_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block.take().is_some() {
            events.push(StreamEvent::ContentBlockStop {
                index: self.current_index(),
            });
        }
    }

    fn current_index(&self) -> u32 {
        self.next_index.saturating_sub(1)
    }
}

/// The SSE `event:` name of an egress event.
pub fn event_name(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Ping => "ping",
        StreamEvent::Error { .. } => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::{UnifiedChoiceDelta, UnifiedFinishReason, UnifiedMessageDelta, UnifiedRole};

    fn chunk(delta: UnifiedMessageDelta, finish: Option<UnifiedFinishReason>) -> UnifiedChunk {
        UnifiedChunk {
            id: "chatcmpl-1".to_string(),
            model: "upstream".to_string(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
            created: 0,
        }
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(event_name).collect()
    }

    #[test]
    fn synthesizes_full_block_framing_from_flat_chunks() {
        let mut egress = AnthropicEgress::new("alpha".to_string(), 7);
        let mut all = Vec::new();

        all.extend(egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                role: Some(UnifiedRole::Assistant),
                ..Default::default()
            },
            None,
        )));
        all.extend(egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                content: Some("Hel".to_string()),
                ..Default::default()
            },
            None,
        )));
        all.extend(egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                content: Some("lo".to_string()),
                ..Default::default()
            },
            None,
        )));
        all.extend(egress.on_chunk(&chunk(
            UnifiedMessageDelta::default(),
            Some(UnifiedFinishReason::Stop),
        )));
        all.extend(egress.finish(crate::unified::UnifiedUsage {
            prompt_tokens: 7,
            completion_tokens: 2,
            total_tokens: 9,
        }));

        assert_eq!(
            names(&all),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let StreamEvent::MessageStart { message } = &all[0] else {
            panic!("expected message_start");
        };
        assert_eq!(message.model, "alpha");
        assert_eq!(message.usage.input_tokens, Some(7));

        let StreamEvent::MessageDelta { delta, usage } = &all[5] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(usage.as_ref().unwrap().output_tokens, Some(2));
    }

    #[test]
    fn kind_change_closes_the_open_block() {
        let mut egress = AnthropicEgress::new("alpha".to_string(), 1);
        let mut all = Vec::new();

        all.extend(egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                thinking: Some("hmm".to_string()),
                ..Default::default()
            },
            None,
        )));
        all.extend(egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                content: Some("answer".to_string()),
                ..Default::default()
            },
            None,
        )));

        assert_eq!(
            names(&all),
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
            ]
        );

        // Thinking block at index 0, text block at index 1.
        let StreamEvent::ContentBlockStart { index, content_block } = &all[4] else {
            panic!("expected content_block_start");
        };
        assert_eq!(*index, 1);
        assert!(matches!(content_block, ContentBlock::Text { .. }));
    }

    #[test]
    fn tool_calls_open_tool_use_blocks_with_json_deltas() {
        let mut egress = AnthropicEgress::new("alpha".to_string(), 1);

        let start = egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                tool_calls: Some(vec![UnifiedStreamingToolCall::Start {
                    index: 0,
                    id: "call_1".to_string(),
                    function: crate::unified::UnifiedFunctionStart {
                        name: "lookup".to_string(),
                        arguments: String::new(),
                    },
                }]),
                ..Default::default()
            },
            None,
        ));

        assert!(start.iter().any(|event| matches!(
            event,
            StreamEvent::ContentBlockStart {
                content_block: ContentBlock::ToolUse { .. },
                ..
            }
        )));

        let delta = egress.on_chunk(&chunk(
            UnifiedMessageDelta {
                tool_calls: Some(vec![UnifiedStreamingToolCall::Delta {
                    index: 0,
                    function: crate::unified::UnifiedFunctionDelta {
                        arguments: r#"{"q":1}"#.to_string(),
                    },
                }]),
                ..Default::default()
            },
            None,
        ));

        assert!(delta.iter().any(|event| matches!(
            event,
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::InputJsonDelta { .. },
                ..
            }
        )));
    }

    #[test]
    fn empty_stream_still_produces_a_well_formed_message() {
        let mut egress = AnthropicEgress::new("alpha".to_string(), 1);
        let events = egress.finish(crate::unified::UnifiedUsage::default());

        assert_eq!(names(&events), ["message_start", "message_delta", "message_stop"]);
    }
}
