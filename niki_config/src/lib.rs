//! Process configuration: a JSON file plus environment overrides, loaded once at startup.

mod schema;

pub use schema::{
    Config, ContextSection, ContextStrategy, ConversationSection, PromptSection, ProviderKind,
    ProviderSection, ServerSection, StorageBackend, StorageSection,
};
