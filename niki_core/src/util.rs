//! Small helpers shared across crates.

use chrono::Utc;

/// Default system prompt used when the configuration supplies none.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a friendly in-game companion. Stay in character and keep replies concise.";

/// Current time as seconds since the Unix epoch.
#[must_use]
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Truncate `text` to at most `max_bytes` without splitting a UTF-8 character.
#[must_use]
pub fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
