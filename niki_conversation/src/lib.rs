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

//! Chat turn handling: prompt assembly, context fitting and the streaming
//! orchestrator that ties them to a history store and a provider.
//!
//! # Key Features
//! - Fixed prompt ordering with blank messages dropped
//! - Pluggable context window strategies that never reorder messages
//! - Deltas forwarded to the caller one at a time, in arrival order
//! - The new turn is persisted only after the reply completes

mod context;
mod orchestrator;
mod prompt;

pub use context::{
    ContextError, ContextManager, PassthroughContext, WindowConfig, WindowedContext,
};
pub use orchestrator::{
    ChatOutcome, ChatRequest, ErrorKind, Orchestrator, OrchestratorConfig, OrchestratorError,
    Stage,
};
pub use prompt::{
    BuildContext, BuiltPrompt, PromptBuilder, PromptConfig, PromptError, SimplePromptBuilder,
    persona_directive,
};
