//! Token estimation for upstreams that omit usage accounting.
//!
//! Uses the cl100k tokenizer as a uniform approximation; exact counts are
//! the upstream's job, these numbers only back usage records and smart
//! routing thresholds.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

use crate::unified::UnifiedRequest;

/// Per-message constant covering role markers and separators.
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();

    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("bundled cl100k tokenizer data"))
}

/// Token count of a single text.
pub fn count_text(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    bpe().encode_with_special_tokens(text).len() as u32
}

/// Estimated input tokens of a request: system prompt plus every message's
/// flattened text plus a small per-message overhead. Never zero for a
/// request with any content.
pub fn estimate_input_tokens(request: &UnifiedRequest) -> u32 {
    let mut total = request.system.as_deref().map(count_text).unwrap_or(0);

    for message in &request.messages {
        total += count_text(&message.text_content()) + MESSAGE_OVERHEAD_TOKENS;
    }

    total.max(1)
}

/// Estimated output tokens from the concatenated output text. Never zero
/// for non-empty output.
pub fn estimate_output_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }

    count_text(text).max(1)
}
