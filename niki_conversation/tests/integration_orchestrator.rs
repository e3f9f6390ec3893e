//! Integration tests for the chat orchestrator.
//!
//! These tests verify that:
//! - Deltas reach the caller in order and the turn is persisted afterwards
//! - Failures at each stage leave history untouched
//! - A persistence failure after streaming is reported as its own kind
//! - Cancellation stops delivery and skips persistence

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use niki_conversation::{
    ChatRequest, ErrorKind, Orchestrator, OrchestratorConfig, OrchestratorError,
    PassthroughContext, PromptConfig, SimplePromptBuilder, Stage, WindowConfig, WindowedContext,
};
use niki_core::{
    ChatProvider, ChunkSink, ConversationKey, HistoryError, HistoryStore, Message, MessageBatch,
    PartialChunk, ProviderError, ReadOptions, Role, SinkError, StreamError,
};
use niki_history::FileHistoryStore;
use niki_providers::{OpenAiConfig, OpenAiProvider, ScriptedProvider};
use tokio_util::sync::CancellationToken;

fn request(input: &str) -> ChatRequest {
    ChatRequest {
        player_id: "p1".into(),
        player_nickname: "Sam".into(),
        niki_id: "n1".into(),
        niki_name: "Mira".into(),
        input_text: input.into(),
    }
}

fn key() -> ConversationKey {
    ConversationKey::new("p1", "n1")
}

fn orchestrator<H: HistoryStore, P: ChatProvider>(store: H, provider: P) -> Orchestrator<H, P> {
    Orchestrator::new(
        OrchestratorConfig {
            system_prompts: vec!["You live in the game world.".into()],
        },
        store,
        Arc::new(SimplePromptBuilder::new(
            PromptConfig::default()
                .with_model("gpt-test")
                .with_default_system(vec!["Be friendly.".into()]),
        )),
        Arc::new(PassthroughContext),
        provider,
    )
}

async fn temp_store() -> (tempfile::TempDir, Arc<FileHistoryStore>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = FileHistoryStore::open(dir.path())
        .await
        .expect("Failed to open store");
    (dir, Arc::new(store))
}

async fn stored(store: &FileHistoryStore) -> Vec<(Role, String)> {
    store
        .get_history(&key(), ReadOptions::default())
        .await
        .expect("Read should succeed")
        .into_iter()
        .map(|m| (m.role, m.content))
        .collect()
}

/// Counts every call and can be told to fail appends.
#[derive(Default)]
struct RecordingStore {
    reads: AtomicUsize,
    appends: AtomicUsize,
    fail_appends: bool,
}

#[async_trait]
impl HistoryStore for RecordingStore {
    async fn get_history(
        &self,
        _key: &ConversationKey,
        _opts: ReadOptions,
    ) -> Result<MessageBatch, HistoryError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    async fn append_messages(
        &self,
        _key: &ConversationKey,
        _messages: MessageBatch,
    ) -> Result<(), HistoryError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends {
            return Err(HistoryError::unavailable(
                "append history",
                std::io::Error::other("disk full"),
            ));
        }
        Ok(())
    }

    async fn upsert_summary(
        &self,
        _key: &ConversationKey,
        _summary: Message,
    ) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn get_summary(&self, _key: &ConversationKey) -> Result<Option<Message>, HistoryError> {
        Ok(None)
    }

    async fn clear(&self, _key: &ConversationKey) -> Result<(), HistoryError> {
        Ok(())
    }
}

/// Cancels the request as soon as the first chunk arrives.
struct CancellingSink {
    received: Vec<String>,
    cancel: CancellationToken,
}

#[async_trait]
impl ChunkSink for CancellingSink {
    async fn send_chunk(&mut self, text: &str) -> Result<(), SinkError> {
        self.received.push(text.to_owned());
        self.cancel.cancel();
        Ok(())
    }
}

#[tokio::test]
async fn test_first_turn_streams_and_persists() {
    let (_dir, store) = temp_store().await;
    let provider = Arc::new(ScriptedProvider::from_deltas(["Hello ", "world"]));
    let orchestrator = orchestrator(Arc::clone(&store), Arc::clone(&provider));

    let mut sink: Vec<String> = Vec::new();
    let outcome = orchestrator
        .handle_chat(&request("Hi there!"), &mut sink, &CancellationToken::new())
        .await
        .expect("Chat should succeed");

    assert_eq!(sink, ["Hello ", "world"]);
    assert_eq!(outcome.reply, "Hello world");
    assert_eq!(outcome.chunks, 2);
    assert_eq!(outcome.persisted_messages, 2);
    assert_eq!(
        stored(&store).await,
        vec![
            (Role::User, "Hi there!".to_string()),
            (Role::Assistant, "Hello world".to_string()),
        ]
    );

    // The prompt carries system text, persona, then the new turn.
    let requests = provider.requests();
    let sent = &requests[0];
    let roles: Vec<_> = sent.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::System, Role::System, Role::System, Role::User]
    );
    assert_eq!(sent.messages[0].content, "Be friendly.");
    assert_eq!(sent.messages[1].content, "You live in the game world.");
    assert!(sent.messages[2].content.contains("Mira"));
    assert!(sent.messages[2].content.contains("Sam"));
    assert_eq!(sent.messages[3].content, "Hi there!");
    assert_eq!(sent.params.model, "gpt-test");
}

#[tokio::test]
async fn test_second_turn_sees_prior_history() {
    let (_dir, store) = temp_store().await;

    let first = orchestrator(
        Arc::clone(&store),
        ScriptedProvider::from_deltas(["Hello ", "world"]),
    );
    first
        .handle_chat(&request("Hi there!"), &mut Vec::<String>::new(), &CancellationToken::new())
        .await
        .expect("First turn should succeed");

    let provider = Arc::new(ScriptedProvider::from_deltas(["Fine, thanks."]));
    let second = orchestrator(Arc::clone(&store), Arc::clone(&provider));
    second
        .handle_chat(&request("How are you?"), &mut Vec::<String>::new(), &CancellationToken::new())
        .await
        .expect("Second turn should succeed");

    let requests = provider.requests();
    let sent = &requests[0].messages;
    let tail: Vec<_> = sent[sent.len() - 3..]
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        tail,
        [
            (Role::User, "Hi there!"),
            (Role::Assistant, "Hello world"),
            (Role::User, "How are you?"),
        ]
    );

    let history = stored(&store).await;
    assert_eq!(history.len(), 4);
    assert_eq!(history[2], (Role::User, "How are you?".to_string()));
    assert_eq!(history[3], (Role::Assistant, "Fine, thanks.".to_string()));
}

#[tokio::test]
async fn test_empty_input_is_rejected_without_io() {
    let store = Arc::new(RecordingStore::default());
    let provider = Arc::new(ScriptedProvider::from_deltas(["unused"]));
    let orchestrator = orchestrator(Arc::clone(&store), Arc::clone(&provider));

    let result = orchestrator
        .handle_chat(&request(""), &mut Vec::<String>::new(), &CancellationToken::new())
        .await;

    match result {
        Err(err @ OrchestratorError::Validation { .. }) => {
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert!(err.to_string().contains("input_text"));
        }
        other => panic!("Expected validation error, got {other:?}"),
    }
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    assert_eq!(store.appends.load(Ordering::SeqCst), 0);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_upstream_status_error_leaves_store_unchanged() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(
            wiremock::ResponseTemplate::new(400)
                .set_body_string(r#"{"error":{"message":"bad request"}}"#),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(
        OpenAiConfig::new("test-key").with_base_url(format!("{}/v1", server.uri())),
    )
    .expect("Provider should build");
    let (_dir, store) = temp_store().await;
    let orchestrator = orchestrator(Arc::clone(&store), provider);

    let mut sink: Vec<String> = Vec::new();
    let result = orchestrator
        .handle_chat(&request("Hi there!"), &mut sink, &CancellationToken::new())
        .await;

    match result {
        Err(err @ OrchestratorError::Upstream(ProviderError::Status { status: 400, .. })) => {
            assert!(err.kind().is_retry_safe());
        }
        other => panic!("Expected upstream error, got {other:?}"),
    }
    assert!(sink.is_empty());
    assert!(stored(&store).await.is_empty());
}

#[tokio::test]
async fn test_mid_stream_decode_error_skips_persistence() {
    let (_dir, store) = temp_store().await;
    let provider = ScriptedProvider::new(vec![
        PartialChunk::delta("partial"),
        PartialChunk::Error(StreamError::Decode("unexpected token".into())),
    ]);
    let orchestrator = orchestrator(Arc::clone(&store), provider);

    let mut sink: Vec<String> = Vec::new();
    let result = orchestrator
        .handle_chat(&request("Hi there!"), &mut sink, &CancellationToken::new())
        .await;

    assert_eq!(sink, ["partial"]);
    match result {
        Err(err @ OrchestratorError::StreamDecode { delivered: 1, .. }) => {
            assert!(!err.kind().is_retry_safe());
        }
        other => panic!("Expected stream decode error, got {other:?}"),
    }
    assert!(stored(&store).await.is_empty());
}

#[tokio::test]
async fn test_persistence_failure_is_distinct() {
    let store = Arc::new(RecordingStore {
        fail_appends: true,
        ..RecordingStore::default()
    });
    let orchestrator = orchestrator(
        Arc::clone(&store),
        ScriptedProvider::from_deltas(["All ", "done"]),
    );

    let mut sink: Vec<String> = Vec::new();
    let result = orchestrator
        .handle_chat(&request("Hi there!"), &mut sink, &CancellationToken::new())
        .await;

    assert_eq!(sink, ["All ", "done"]);
    match result {
        Err(err @ OrchestratorError::Persistence(_)) => {
            assert_eq!(err.kind(), ErrorKind::Persistence);
        }
        other => panic!("Expected persistence error, got {other:?}"),
    }
    assert_eq!(store.appends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_reply_persists_only_user_turn() {
    let (_dir, store) = temp_store().await;
    let orchestrator = orchestrator(Arc::clone(&store), ScriptedProvider::from_deltas(["  "]));

    let outcome = orchestrator
        .handle_chat(&request("Anyone there?"), &mut Vec::<String>::new(), &CancellationToken::new())
        .await
        .expect("Chat should succeed");

    assert_eq!(outcome.persisted_messages, 1);
    assert_eq!(
        stored(&store).await,
        vec![(Role::User, "Anyone there?".to_string())]
    );
}

#[tokio::test]
async fn test_stream_without_terminal_chunk_completes() {
    let (_dir, store) = temp_store().await;
    let orchestrator = orchestrator(
        Arc::clone(&store),
        ScriptedProvider::new(vec![PartialChunk::delta("no end marker")]),
    );

    let outcome = orchestrator
        .handle_chat(&request("Hi"), &mut Vec::<String>::new(), &CancellationToken::new())
        .await
        .expect("Chat should succeed");
    assert_eq!(outcome.reply, "no end marker");
    assert_eq!(stored(&store).await.len(), 2);
}

#[tokio::test]
async fn test_closed_sink_aborts_without_persisting() {
    let (_dir, store) = temp_store().await;
    let orchestrator = orchestrator(Arc::clone(&store), ScriptedProvider::from_deltas(["lost"]));

    let (mut tx, rx) = tokio::sync::mpsc::channel::<String>(1);
    drop(rx);

    let result = orchestrator
        .handle_chat(&request("Hi"), &mut tx, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(OrchestratorError::Sink(SinkError::Closed))));
    assert!(stored(&store).await.is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_delivery_and_persistence() {
    let (_dir, store) = temp_store().await;
    let provider = ScriptedProvider::from_deltas(["one", "two", "three"])
        .with_chunk_delay(Duration::from_millis(10));
    let orchestrator = orchestrator(Arc::clone(&store), provider);

    let cancel = CancellationToken::new();
    let mut sink = CancellingSink {
        received: Vec::new(),
        cancel: cancel.clone(),
    };
    let result = orchestrator
        .handle_chat(&request("Hi"), &mut sink, &cancel)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Cancelled {
            stage: Stage::Streaming
        })
    ));
    assert_eq!(sink.received, ["one"]);
    assert!(stored(&store).await.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let store = Arc::new(RecordingStore::default());
    let provider = Arc::new(ScriptedProvider::from_deltas(["unused"]));
    let orchestrator = orchestrator(Arc::clone(&store), Arc::clone(&provider));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = orchestrator
        .handle_chat(&request("Hi"), &mut Vec::<String>::new(), &cancel)
        .await;

    assert!(matches!(result, Err(OrchestratorError::Cancelled { .. })));
    assert_eq!(store.appends.load(Ordering::SeqCst), 0);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_windowed_context_trims_long_history() {
    let (_dir, store) = temp_store().await;
    let old: MessageBatch = (0..10)
        .map(|i| Message::with_timestamp(Role::User, format!("old {i}"), i))
        .collect();
    store
        .append_messages(&key(), old)
        .await
        .expect("Seeding history should succeed");

    let provider = Arc::new(ScriptedProvider::from_deltas(["ok"]));
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::clone(&store),
        Arc::new(SimplePromptBuilder::new(
            PromptConfig::default().with_model("gpt-test"),
        )),
        Arc::new(WindowedContext::new(
            WindowConfig::default().with_max_messages(4),
        )),
        Arc::clone(&provider),
    );

    orchestrator
        .handle_chat(&request("new"), &mut Vec::<String>::new(), &CancellationToken::new())
        .await
        .expect("Chat should succeed");

    let sent: Vec<_> = provider.requests()[0]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect();
    // persona + two newest history messages + current input
    assert_eq!(sent.len(), 4);
    assert_eq!(&sent[1..], ["old 8", "old 9", "new"]);
    // Full history is still stored.
    assert_eq!(stored(&store).await.len(), 12);
}

#[tokio::test]
async fn test_concurrent_turns_on_one_key_do_not_interleave() {
    let (_dir, store) = temp_store().await;
    let orchestrator = Arc::new(orchestrator(
        Arc::clone(&store),
        ScriptedProvider::from_deltas(["reply"]),
    ));

    let mut tasks = Vec::new();
    for i in 0..6 {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.push(tokio::spawn(async move {
            orchestrator
                .handle_chat(
                    &request(&format!("turn {i}")),
                    &mut Vec::<String>::new(),
                    &CancellationToken::new(),
                )
                .await
        }));
    }
    for task in tasks {
        task.await
            .expect("Task should not panic")
            .expect("Chat should succeed");
    }

    let history = stored(&store).await;
    assert_eq!(history.len(), 12);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].0, Role::User);
        assert_eq!(pair[1], (Role::Assistant, "reply".to_string()));
    }
}
