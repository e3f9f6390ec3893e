#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Conversation history persistence.
//!
//! Each (player, Niki) conversation gets its own directory holding an
//! append-only `history.jsonl` log and a replaceable `summary.json`.
//!
//! # Guarantees
//! - Appends to one key are serialized; different keys never contend
//! - A reader sees either the state before or after an append, never a mix
//! - Summary writes and clears are atomic renames
//! - A torn trailing line left by a crash is skipped on read and cut off on
//!   the next append; any other undecodable line is reported as corrupt

mod file_store;
mod key_path;
mod noop;

pub use file_store::FileHistoryStore;
pub use key_path::encode_segment;
pub use noop::NoopHistoryStore;
