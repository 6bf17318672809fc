//! The stream pipeline: pulls unified chunks from the upstream, runs the
//! handle-context hooks, translates into the client's dialect, frames SSE,
//! extracts usage, and guarantees exactly one usage record per stream no
//! matter how the stream ends.

use std::{sync::Arc, time::Instant};

use axum::response::{IntoResponse, Response, Sse, sse::Event};
use futures::StreamExt;
use http::{HeaderValue, header};
use jiff::Timestamp;
use tokio::sync::mpsc;

use crate::{
    context::HandleContext,
    record::RecorderHandle,
    stream::{
        AnthropicEgress, OpenAiEgress,
        anthropic::event_name,
        assembler::StreamAssembler,
    },
    token_count,
    unified::{UnifiedChunk, UnifiedUsage},
    upstream::ChunkStream,
    usage::{UsageRecord, UsageStatus, UsageTracker},
};

/// The dialect the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDialect {
    /// Chat-completions chunks terminated by ` [DONE]`.
    Openai,
    /// Named message events terminated by `message_stop`.
    Anthropic,
}

/// Usage accounting for one stream.
///
/// Input tokens come from the first usage-bearing event, output tokens
/// from the last; when the upstream never reports usage both sides are
/// estimated. Exactly one record is written: explicitly on the terminal
/// paths, or by the drop guard when the client disconnects mid-stream.
pub struct StreamAccounting {
    tracker: Arc<UsageTracker>,
    record: UsageRecord,
    window_seconds: u64,
    input_estimate: u32,
    input_seen: Option<u32>,
    output_seen: Option<u32>,
    output_text: String,
    started: Instant,
    finished: bool,
}

impl StreamAccounting {
    /// Create accounting for a stream routed by `context`.
    pub fn new(
        tracker: Arc<UsageTracker>,
        context: &HandleContext,
        input_estimate: u32,
        window_seconds: u64,
    ) -> Self {
        StreamAccounting {
            tracker,
            record: UsageRecord {
                provider: context.provider,
                model: context.model.clone(),
                scenario: context.scenario.clone(),
                rule: context.rule,
                request_model: context.request_model.clone(),
                timestamp: Timestamp::now(),
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                status: UsageStatus::Partial,
                error_code: None,
                latency_ms: 0,
                streamed: true,
            },
            window_seconds,
            input_estimate,
            input_seen: None,
            output_seen: None,
            output_text: String::new(),
            started: Instant::now(),
            finished: false,
        }
    }

    fn observe(&mut self, chunk: &UnifiedChunk) {
        if let Some(usage) = chunk.usage {
            if self.input_seen.is_none() && usage.prompt_tokens > 0 {
                self.input_seen = Some(usage.prompt_tokens);
            }
            if usage.completion_tokens > 0 {
                self.output_seen = Some(usage.completion_tokens);
            }
        }

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                self.output_text.push_str(content);
            }
            if let Some(thinking) = &choice.delta.thinking {
                self.output_text.push_str(thinking);
            }
        }
    }

    /// Final usage: observed where available, estimated otherwise.
    pub fn final_usage(&self) -> UnifiedUsage {
        let prompt = self.input_seen.unwrap_or(self.input_estimate).max(1);
        let completion = self
            .output_seen
            .unwrap_or_else(|| token_count::estimate_output_tokens(&self.output_text));

        UnifiedUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    fn finalize(&mut self, status: UsageStatus, error_code: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let usage = self.final_usage();

        let mut record = self.record.clone();
        record.timestamp = Timestamp::now();
        record.input_tokens = usage.prompt_tokens;
        record.output_tokens = usage.completion_tokens;
        record.total_tokens = usage.total_tokens;
        record.status = status;
        record.error_code = error_code.map(str::to_string);
        record.latency_ms = self.started.elapsed().as_millis() as u64;

        let tracker = Arc::clone(&self.tracker);
        let window_seconds = self.window_seconds;

        tokio::spawn(async move {
            tracker.record(record, window_seconds).await;
        });
    }
}

impl Drop for StreamAccounting {
    fn drop(&mut self) {
        // Client went away (or the task died) before a terminal path ran.
        self.finalize(UsageStatus::Partial, Some("context_canceled"));
    }
}

/// Build the SSE response for a streaming request and spawn its driver.
pub fn sse_response(
    chunks: ChunkStream,
    dialect: ClientDialect,
    context: HandleContext,
    accounting: StreamAccounting,
    recorder: Option<RecorderHandle>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    tokio::spawn(drive(chunks, dialect, context, accounting, recorder, tx));

    let event_stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, std::convert::Infallible>(event), rx))
    });

    let mut response = Sse::new(event_stream).into_response();

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    response
}

fn data_event(json: String) -> Event {
    Event::default().data(json)
}

fn named_event(name: &str, json: String) -> Event {
    Event::default().event(name).data(json)
}

fn error_frame(dialect: ClientDialect, message: &str) -> Event {
    let payload = serde_json::json!({
        "error": {
            "message": message,
            "type": "stream_error",
            "code": "stream_failed",
        }
    });

    let json = payload.to_string();

    match dialect {
        ClientDialect::Openai => data_event(json),
        ClientDialect::Anthropic => named_event("error", json),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> String {
    sonic_rs::to_string(value).unwrap_or_else(|error| {
        log::error!("Failed to serialize stream frame: {error}");
        r#"{"error":"serialization failed"}"#.to_string()
    })
}

async fn drive(
    mut chunks: ChunkStream,
    dialect: ClientDialect,
    mut context: HandleContext,
    mut accounting: StreamAccounting,
    recorder: Option<RecorderHandle>,
    tx: mpsc::UnboundedSender<Event>,
) {
    let include_usage = !context.flags.disable_stream_usage;

    let mut openai_egress = OpenAiEgress::new(context.response_model.clone());
    let mut anthropic_egress = AnthropicEgress::new(context.response_model.clone(), accounting.input_estimate);

    // The recording tap always works in block events: for anthropic
    // clients they are the frames already going out, for openai clients a
    // shadow egress synthesizes them.
    let mut assembler = recorder.as_ref().map(|_| StreamAssembler::new());

    loop {
        tokio::select! {
            // Client disconnect: the response body (and receiver) were
            // dropped. Stop pulling; dropping the upstream stream closes
            // the connection, the accounting guard records partial usage.
            _ = tx.closed() => {
                log::debug!("Client disconnected mid-stream; cancelling upstream");
                return;
            }

            next = chunks.next() => match next {
                Some(Ok(chunk)) => {
                    accounting.observe(&chunk);

                    if context.dispatch_event(&chunk).is_err() {
                        let _ = tx.send(error_frame(dialect, "stream handler panic"));
                        accounting.finalize(UsageStatus::Partial, Some("panic"));
                        return;
                    }

                    let closed = match dialect {
                        ClientDialect::Openai => {
                            if let (Some(assembler), Some(recorder)) = (assembler.as_mut(), recorder.as_ref()) {
                                for event in anthropic_egress.on_chunk(&chunk) {
                                    assembler.apply(&event);
                                    recorder.chunk(event_name(&event), serde_json::to_value(&event).unwrap_or_default());
                                }
                            }

                            match openai_egress.on_chunk(chunk) {
                                Some(wire) => tx.send(data_event(encode(&wire))).is_err(),
                                None => false,
                            }
                        }
                        ClientDialect::Anthropic => {
                            let mut closed = false;

                            for event in anthropic_egress.on_chunk(&chunk) {
                                if let Some(assembler) = assembler.as_mut() {
                                    assembler.apply(&event);
                                }
                                if let Some(recorder) = recorder.as_ref() {
                                    recorder.chunk(event_name(&event), serde_json::to_value(&event).unwrap_or_default());
                                }

                                closed |= tx
                                    .send(named_event(event_name(&event), encode(&event)))
                                    .is_err();
                            }

                            closed
                        }
                    };

                    if closed {
                        return;
                    }
                }

                Some(Err(error)) => {
                    log::error!("Upstream stream failed: {error}");
                    context.dispatch_error(&error);

                    let _ = tx.send(error_frame(dialect, &error.client_message()));
                    accounting.finalize(UsageStatus::Partial, Some("stream_error"));
                    return;
                }

                None => {
                    let final_usage = accounting.final_usage();

                    match dialect {
                        ClientDialect::Openai => {
                            if let (Some(assembler), Some(recorder)) = (assembler.as_mut(), recorder.as_ref()) {
                                for event in anthropic_egress.finish(final_usage) {
                                    assembler.apply(&event);
                                    recorder.chunk(event_name(&event), serde_json::to_value(&event).unwrap_or_default());
                                }
                            }

                            for wire in openai_egress.finish(final_usage, include_usage) {
                                if tx.send(data_event(encode(&wire))).is_err() {
                                    return;
                                }
                            }

                            // Terminator, leading space preserved for
                            // byte-compatibility with known clients.
                            let _ = tx.send(data_event(" [DONE]".to_string()));
                        }
                        ClientDialect::Anthropic => {
                            for event in anthropic_egress.finish(final_usage) {
                                if let Some(assembler) = assembler.as_mut() {
                                    assembler.apply(&event);
                                }
                                if let Some(recorder) = recorder.as_ref() {
                                    recorder.chunk(event_name(&event), serde_json::to_value(&event).unwrap_or_default());
                                }

                                if tx.send(named_event(event_name(&event), encode(&event))).is_err() {
                                    return;
                                }
                            }
                        }
                    }

                    if let (Some(assembler), Some(recorder)) = (assembler.take(), recorder.as_ref()) {
                        let assembled = assembler.finish();
                        recorder.complete(serde_json::to_value(&assembled).unwrap_or_default());
                    }

                    context.dispatch_complete();
                    accounting.finalize(UsageStatus::Success, None);
                    return;
                }
            }
        }
    }
}
