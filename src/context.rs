//! Context-window helpers: manual token estimation, history truncation, and
//! the compaction-threshold decision shared by the agent loop's built-in
//! compaction step and [`crate::hooks::CompactionHook`].
//!
//! `estimate_tokens`/`is_approaching_limit`/`truncate_messages` are carried
//! over from the reference crate's `context` module as a fallback manual-
//! compaction path for callers that don't attach a [`crate::session::Session`]
//! with a model-driven summarizer (`SPEC_FULL.md` §1.1).

use crate::message::{Message, Usage};

/// Characters per token used by the approximation below. This mirrors the
/// reference crate's constant: ~70-85% accurate across model families,
/// good enough for proactive truncation decisions, not for billing.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the number of tokens in a message history using a
/// character-based approximation (~1 token per 4 characters).
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages
        .iter()
        .map(|m| m.content.iter().map(content_chars).sum::<usize>())
        .sum();
    chars.div_ceil(CHARS_PER_TOKEN)
}

fn content_chars(content: &crate::message::Content) -> usize {
    use crate::message::Content;
    match content {
        Content::Text { text } => text.len(),
        Content::Thinking { text, .. } => text.len(),
        Content::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
        Content::ToolResult { content, .. } => content
            .iter()
            .map(|c| c.text.as_deref().map(str::len).unwrap_or(0))
            .sum(),
        // Images/documents are not meaningfully estimated by character count;
        // callers relying on precise context budgeting should size those
        // from actual provider usage instead.
        Content::Image { .. } | Content::Document { .. } => 0,
    }
}

/// True if `estimate_tokens(messages)` meets or exceeds `limit`.
pub fn is_approaching_limit(messages: &[Message], limit: usize) -> bool {
    estimate_tokens(messages) >= limit
}

/// Keep only the most recent `keep_turns` messages, optionally always
/// preserving a leading system message regardless of turn count.
pub fn truncate_messages(
    messages: &[Message],
    keep_turns: usize,
    preserve_system: bool,
) -> Vec<Message> {
    if messages.len() <= keep_turns {
        return messages.to_vec();
    }
    let mut result = Vec::new();
    if preserve_system {
        if let Some(first) = messages.first() {
            if first.role == crate::message::Role::System {
                result.push(first.clone());
            }
        }
    }
    let tail_start = messages.len().saturating_sub(keep_turns);
    result.extend_from_slice(&messages[tail_start..]);
    result
}

/// Whether compaction should run now, given the provider's own usage
/// counters (authoritative over the character estimate above), the
/// configured threshold, and the last message in history.
///
/// `spec.md` §4.1 step 5 / §8 invariant 5: compaction is deferred while the
/// last assistant message has unresolved `ToolUse` blocks, and is a no-op
/// (idempotent) below the threshold.
pub fn should_compact(usage: &Usage, threshold_tokens: u64, last_message: Option<&Message>) -> bool {
    if usage.context_tokens() < threshold_tokens {
        return false;
    }
    !last_message.map(Message::has_tool_use).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn estimate_tokens_counts_text_blocks() {
        let messages = vec![Message::user("a".repeat(40))];
        assert_eq!(estimate_tokens(&messages), 10);
    }

    #[test]
    fn is_approaching_limit_compares_against_limit() {
        let messages = vec![Message::user("a".repeat(400))];
        assert!(is_approaching_limit(&messages, 50));
        assert!(!is_approaching_limit(&messages, 1000));
    }

    #[test]
    fn truncate_messages_keeps_most_recent_and_optional_system() {
        let messages = vec![
            Message::system("sys"),
            Message::user("1"),
            Message::user("2"),
            Message::user("3"),
        ];
        let truncated = truncate_messages(&messages, 2, true);
        assert_eq!(truncated.len(), 3);
        assert_eq!(truncated[0].role, Role::System);
        assert_eq!(truncated[1].text(), "2");
        assert_eq!(truncated[2].text(), "3");
    }

    #[test]
    fn truncate_messages_is_noop_when_under_limit() {
        let messages = vec![Message::user("1"), Message::user("2")];
        let truncated = truncate_messages(&messages, 5, false);
        assert_eq!(truncated, messages);
    }

    #[test]
    fn should_compact_defers_on_pending_tool_use() {
        let usage = Usage {
            input_tokens: 1000,
            ..Default::default()
        };
        let pending = Message::assistant(vec![crate::message::Content::tool_use(
            "t1",
            "echo",
            serde_json::json!({}),
        )]);
        assert!(!should_compact(&usage, 10, Some(&pending)));
    }

    #[test]
    fn should_compact_true_when_over_threshold_and_no_pending_tool_use() {
        let usage = Usage {
            input_tokens: 1000,
            ..Default::default()
        };
        let done = Message::assistant(vec![crate::message::Content::text("done")]);
        assert!(should_compact(&usage, 10, Some(&done)));
    }

    #[test]
    fn should_compact_false_below_threshold() {
        let usage = Usage {
            input_tokens: 5,
            ..Default::default()
        };
        assert!(!should_compact(&usage, 1000, None));
    }
}
