use std::fmt::Write;
use std::path::{Path, PathBuf};

use niki_core::{ConversationKey, HistoryError};

/// Encode one key component as a single, collision-free path segment.
///
/// ASCII letters, digits, `-` and `_` pass through; every other byte becomes
/// `%XX`. The result never contains a separator and never starts with `.`.
#[must_use]
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

pub fn conversation_dir(base: &Path, key: &ConversationKey) -> Result<PathBuf, HistoryError> {
    if key.player_id.is_empty() {
        return Err(HistoryError::InvalidKey("player_id is empty".to_string()));
    }
    if key.niki_id.is_empty() {
        return Err(HistoryError::InvalidKey("niki_id is empty".to_string()));
    }
    Ok(base
        .join(encode_segment(&key.player_id))
        .join(encode_segment(&key.niki_id)))
}
