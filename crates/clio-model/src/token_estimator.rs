// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Character-count token approximation with a learned, process-wide ratio.
//!
//! The ratio starts at the OpenAI-ish default of 4 chars/token and is
//! refined from the provider's reported `prompt_tokens` after every turn
//! (`set_learned_ratio`). It is a single process-global value — not a
//! per-session field — because the spec's concurrency model calls it out as
//! "a process-global guarded value updated from any worker" (§5): every
//! session's estimates should benefit from what any other session's traffic
//! has taught the ratio.

use std::sync::RwLock;

use once_cell::sync::Lazy;

use crate::types::Message;

pub const DEFAULT_RATIO: f32 = 4.0;
const MIN_RATIO: f32 = 1.5;
const MAX_RATIO: f32 = 5.0;

/// Flat overhead charged per message in the wire payload (role framing,
/// message delimiters), independent of content length.
const PER_MESSAGE_OVERHEAD: usize = 3;
/// Extra overhead for a message that carries a `name` or `tool_call_id`
/// field alongside its content.
const NAME_OR_TOOL_CALL_ID_OVERHEAD: usize = 1;
/// Constant added once per request for the assistant's completion priming.
const COMPLETION_PRIMING: usize = 3;
/// Extra overhead per tool-call JSON blob (function name + argument framing
/// beyond what the raw character count already captures).
const TOOL_CALL_BLOB_OVERHEAD: usize = 10;

static LEARNED_RATIO: Lazy<RwLock<f32>> = Lazy::new(|| RwLock::new(DEFAULT_RATIO));

/// Current chars/token ratio used by [`crate::Message::approx_tokens`].
pub fn current_ratio() -> f32 {
    *LEARNED_RATIO.read().unwrap()
}

/// Update the process-wide ratio from an observed `(actual_tokens,
/// char_count)` pair reported by a provider response, clamped to
/// `[1.5, 5.0]`. Called from any worker thread; safe for concurrent
/// sessions to update concurrently.
pub fn set_learned_ratio(actual_tokens: u32, char_count: usize) {
    if actual_tokens == 0 || char_count == 0 {
        return;
    }
    let observed = char_count as f32 / actual_tokens as f32;
    let mut ratio = LEARNED_RATIO.write().unwrap();
    *ratio = (*ratio * 0.7 + observed * 0.3).clamp(MIN_RATIO, MAX_RATIO);
}

/// Reset the global ratio to its default. Exposed for tests that need a
/// known starting point; not part of the runtime contract.
pub fn reset_learned_ratio() {
    *LEARNED_RATIO.write().unwrap() = DEFAULT_RATIO;
}

fn has_tool_linkage(msg: &Message) -> bool {
    use crate::types::MessageContent::*;
    matches!(&msg.content, ToolCall { .. } | ToolResult { .. })
}

fn is_tool_call(msg: &Message) -> bool {
    matches!(&msg.content, crate::types::MessageContent::ToolCall { .. })
}

/// Estimate the total token cost of a message list: per-message content
/// estimates plus framing overhead, a name/tool_call_id surcharge, a
/// tool-call blob surcharge, and one completion-priming constant for the
/// whole request.
pub fn estimate_messages(messages: &[Message]) -> usize {
    let mut total = COMPLETION_PRIMING;
    for msg in messages {
        total += msg.approx_tokens();
        total += PER_MESSAGE_OVERHEAD;
        if has_tool_linkage(msg) {
            total += NAME_OR_TOOL_CALL_ID_OVERHEAD;
        }
        if is_tool_call(msg) {
            total += TOOL_CALL_BLOB_OVERHEAD;
        }
    }
    total
}

/// Split `text` on line boundaries into chunks that each stay within
/// `chunk_limit` estimated tokens. A single line longer than the limit is
/// emitted as its own (oversized) chunk rather than being split mid-line.
pub fn split_into_chunks(text: &str, chunk_limit: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let ratio = current_ratio();
    let est_tokens = |s: &str| -> usize { ((s.len() as f32 / ratio) as usize).max(1) };

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for line in text.split_inclusive('\n') {
        let line_tokens = est_tokens(line);
        if !current.is_empty() && current_tokens + line_tokens > chunk_limit {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push_str(line);
        current_tokens += line_tokens;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
