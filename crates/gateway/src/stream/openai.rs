//! Openai-dialect SSE egress: unified chunks out to the chat-completions
//! chunk wire shape.
//!
//! Guarantees exactly one `role: assistant` chunk per message, relabels
//! the model, strips thinking deltas (no destination analog), and holds
//! the final usage back so the pipeline can emit it as the dedicated
//! usage chunk before the ` [DONE]` terminator.

use uuid::Uuid;

use crate::{
    dialect::openai,
    unified::{UnifiedChunk, UnifiedFinishReason, UnifiedRole, UnifiedUsage},
};

/// Egress state machine for openai-dialect clients.
pub struct OpenAiEgress {
    response_model: String,
    message_id: String,
    role_sent: bool,
    finish_sent: bool,
    usage: Option<UnifiedUsage>,
    created: u64,
}

impl OpenAiEgress {
    /// Create an egress relabeling chunks with `response_model`.
    pub fn new(response_model: String) -> Self {
        OpenAiEgress {
            response_model,
            message_id: String::new(),
            role_sent: false,
            finish_sent: false,
            usage: None,
            created: 0,
        }
    }

    /// Usage observed on the stream so far, if any event carried it.
    pub fn observed_usage(&self) -> Option<UnifiedUsage> {
        self.usage
    }

    /// Whether a finish-reason chunk went out already.
    pub fn finish_sent(&self) -> bool {
        self.finish_sent
    }

    /// Translate one unified chunk into zero or one wire chunks.
    pub fn on_chunk(&mut self, mut chunk: UnifiedChunk) -> Option<openai::ChatCompletionChunk> {
        if self.message_id.is_empty() {
            self.message_id = if chunk.id.is_empty() {
                format!("chatcmpl-{}", Uuid::new_v4().simple())
            } else {
                chunk.id.clone()
            };
            self.created = chunk.created;
        }

        if let Some(usage) = chunk.usage.take() {
            self.usage = Some(usage);
        }

        let mut has_payload = false;

        for choice in &mut chunk.choices {
            // Thinking has no analog on this wire; strip it.
            choice.delta.thinking = None;
            choice.delta.signature = None;

            if choice.delta.role.is_some() {
                if self.role_sent {
                    choice.delta.role = None;
                } else {
                    self.role_sent = true;
                }
            } else if !self.role_sent && !choice.delta.is_empty() {
                // First payload-bearing chunk carries the role.
                choice.delta.role = Some(UnifiedRole::Assistant);
                self.role_sent = true;
            }

            if choice.finish_reason.is_some() {
                self.finish_sent = true;
            }

            has_payload |= !choice.delta.is_empty() || choice.finish_reason.is_some();
        }

        if !has_payload {
            return None;
        }

        chunk.id = self.message_id.clone();
        chunk.model = self.response_model.clone();
        chunk.usage = None;

        Some(openai::ChatCompletionChunk::from(chunk))
    }

    /// Close the message: a synthesized finish chunk when the upstream
    /// never sent one, then the usage chunk (unless suppressed).
    pub fn finish(
        &mut self,
        final_usage: UnifiedUsage,
        include_usage: bool,
    ) -> Vec<openai::ChatCompletionChunk> {
        let mut chunks = Vec::new();

        if !self.finish_sent {
            chunks.push(openai::ChatCompletionChunk {
                id: self.identity(),
                object: openai::ObjectType::ChatCompletionChunk,
                created: self.created,
                model: self.response_model.clone(),
                system_fingerprint: None,
                choices: vec![openai::ChatChoiceDelta {
                    index: 0,
                    delta: openai::ChatMessageDelta::default(),
                    finish_reason: Some(openai::FinishReason::from(UnifiedFinishReason::Stop)),
                    logprobs: None,
                }],
                usage: None,
            });
            self.finish_sent = true;
        }

        if include_usage {
            chunks.push(openai::ChatCompletionChunk {
                id: self.identity(),
                object: openai::ObjectType::ChatCompletionChunk,
                created: self.created,
                model: self.response_model.clone(),
                system_fingerprint: None,
                choices: Vec::new(),
                usage: Some(openai::Usage {
                    prompt_tokens: final_usage.prompt_tokens,
                    completion_tokens: final_usage.completion_tokens,
                    total_tokens: final_usage.total_tokens,
                }),
            });
        }

        chunks
    }

    fn identity(&self) -> String {
        if self.message_id.is_empty() {
            format!("chatcmpl-{}", Uuid::new_v4().simple())
        } else {
            self.message_id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unified::{UnifiedChoiceDelta, UnifiedMessageDelta};

    fn chunk(delta: UnifiedMessageDelta, finish: Option<UnifiedFinishReason>) -> UnifiedChunk {
        UnifiedChunk {
            id: "msg_1".to_string(),
            model: "upstream-model".to_string(),
            choices: vec![UnifiedChoiceDelta {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
            created: 1,
        }
    }

    #[test]
    fn role_goes_out_exactly_once_and_model_is_relabeled() {
        let mut egress = OpenAiEgress::new("alpha".to_string());

        let first = egress
            .on_chunk(chunk(
                UnifiedMessageDelta {
                    role: Some(UnifiedRole::Assistant),
                    ..Default::default()
                },
                None,
            ))
            .unwrap();

        assert_eq!(first.model, "alpha");
        assert!(matches!(
            first.choices[0].delta.role,
            Some(openai::ChatRole::Assistant)
        ));

        let second = egress
            .on_chunk(chunk(
                UnifiedMessageDelta {
                    role: Some(UnifiedRole::Assistant),
                    content: Some("hi".to_string()),
                    ..Default::default()
                },
                None,
            ))
            .unwrap();

        assert!(second.choices[0].delta.role.is_none());
        assert_eq!(second.choices[0].delta.content.as_deref(), Some("hi"));
    }

    #[test]
    fn role_is_injected_when_upstream_never_sent_one() {
        let mut egress = OpenAiEgress::new("alpha".to_string());

        let first = egress
            .on_chunk(chunk(
                UnifiedMessageDelta {
                    content: Some("Hello".to_string()),
                    ..Default::default()
                },
                None,
            ))
            .unwrap();

        assert!(matches!(
            first.choices[0].delta.role,
            Some(openai::ChatRole::Assistant)
        ));
    }

    #[test]
    fn thinking_only_chunks_are_swallowed() {
        let mut egress = OpenAiEgress::new("alpha".to_string());

        let swallowed = egress.on_chunk(chunk(
            UnifiedMessageDelta {
                thinking: Some("hmm".to_string()),
                ..Default::default()
            },
            None,
        ));

        assert!(swallowed.is_none());
    }

    #[test]
    fn usage_is_withheld_until_finish() {
        let mut egress = OpenAiEgress::new("alpha".to_string());

        let mut with_usage = chunk(
            UnifiedMessageDelta::default(),
            Some(UnifiedFinishReason::Stop),
        );
        with_usage.usage = Some(UnifiedUsage {
            prompt_tokens: 9,
            completion_tokens: 3,
            total_tokens: 12,
        });

        let finish_chunk = egress.on_chunk(with_usage).unwrap();
        assert!(finish_chunk.usage.is_none());
        assert!(egress.finish_sent());

        let tail = egress.finish(egress.observed_usage().unwrap(), true);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].usage.unwrap().total_tokens, 12);
        assert!(tail[0].choices.is_empty());
    }

    #[test]
    fn finish_synthesizes_stop_when_upstream_omitted_it() {
        let mut egress = OpenAiEgress::new("alpha".to_string());

        egress.on_chunk(chunk(
            UnifiedMessageDelta {
                content: Some("partial".to_string()),
                ..Default::default()
            },
            None,
        ));

        let tail = egress.finish(UnifiedUsage::default(), false);
        assert_eq!(tail.len(), 1);
        assert!(matches!(
            tail[0].choices[0].finish_reason,
            Some(openai::FinishReason::Stop)
        ));
    }
}
