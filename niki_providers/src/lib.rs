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

//! Completion backends behind [`niki_core::ChatProvider`].

pub mod noop;
pub mod openai;
pub mod scripted;
pub mod sse;

pub use noop::NoopProvider;
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use scripted::{RecordedRequest, ScriptedProvider};
