//! Streaming lifecycle: upstream chunk ingestion, per-dialect SSE egress,
//! usage extraction, cancellation, and recording taps.

pub mod assembler;

mod anthropic;
mod openai;
mod pipeline;

pub use anthropic::AnthropicEgress;
pub use openai::OpenAiEgress;
pub use pipeline::{ClientDialect, StreamAccounting, sse_response};
