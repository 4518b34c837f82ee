//! End-to-end cross-module coverage: a forwarded message routed through
//! `MessageRouter` and `UserContextCache` reaches a dispatched group,
//! gets handed to `NoteService`, and the reply lands on the chat adapter —
//! exercising C5 (aggregation), C6 (context cache), C8 (routing), and C9
//! (note service) together rather than each in isolation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use noteforge_core::agent::{Agent, AgentRequest, AgentResponse};
use noteforge_core::chat_adapter::{ChatAdapter, SentMessageId};
use noteforge_core::context_cache::UserContextCache;
use noteforge_core::error::{AgentError, TransientTransportError};
use noteforge_core::event_bus::EventBus;
use noteforge_core::git_ops::GitOperations;
use noteforge_core::kb::KbRepositoryManager;
use noteforge_core::rate_limiter::RateLimiter;
use noteforge_core::router::{InMemoryKbConfigStore, KbConfigStore, MessageRouter};
use noteforge_core::services::note::NoteService;
use noteforge_core::types::{BotMode, ContentType, IncomingMessage, KbType, MessageGroup, UserKbConfig};

struct CannedAgent;

#[async_trait]
impl Agent for CannedAgent {
    async fn process(&self, _req: AgentRequest) -> Result<AgentResponse, AgentError> {
        Ok(AgentResponse {
            text: "Saved a note about the forwarded article.".into(),
            exit_code: 0,
        })
    }
}

#[derive(Default)]
struct RecordingChatAdapter {
    sent: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl ChatAdapter for RecordingChatAdapter {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessageId, TransientTransportError> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(SentMessageId(self.sent.lock().unwrap().len() as i64))
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        _message_id: SentMessageId,
        _text: &str,
    ) -> Result<(), TransientTransportError> {
        Ok(())
    }

    async fn reply_to(&self, msg: &IncomingMessage, text: &str) -> Result<SentMessageId, TransientTransportError> {
        self.send_message(msg.chat_id, text).await
    }
}

fn forwarded_message(user_id: i64) -> IncomingMessage {
    IncomingMessage {
        message_id: 1,
        chat_id: user_id,
        user_id,
        text: "An interesting article about Rust async runtimes.".into(),
        content_type: ContentType::Text,
        timestamp: 0,
        caption: None,
        forward_date: Some(1_700_000_000),
        forward_sender_name: Some("Some Blog".into()),
        forward_from_chat_id: None,
        forward_from_message_id: None,
        media_handles: Vec::new(),
    }
}

#[tokio::test]
async fn forwarded_message_flows_through_to_a_note_reply() {
    let dir = TempDir::new().unwrap();
    let user_id = 42;

    let kb_manager = Arc::new(KbRepositoryManager::new(dir.path().to_path_buf()));
    let kb_configs: Arc<dyn KbConfigStore> = Arc::new(InMemoryKbConfigStore::new());
    kb_configs.set(UserKbConfig {
        user_id,
        kb_name: "default".into(),
        kb_type: KbType::Local,
        github_url: None,
        has_credentials: false,
        mode: BotMode::Note,
    });

    let chat_adapter = Arc::new(RecordingChatAdapter::default());
    let note_service = Arc::new(NoteService::new(
        Arc::new(CannedAgent),
        Arc::new(GitOperations::new(EventBus::new(1, 8))),
        Arc::new(RateLimiter::new(10, Duration::from_secs(60))),
    ));

    let dispatch_adapter = chat_adapter.clone();
    let dispatch_kb_configs = kb_configs.clone();
    let dispatch_kb_manager = kb_manager.clone();
    let dispatch_note_service = note_service.clone();

    let context_cache = Arc::new(UserContextCache::new(
        Duration::from_millis(30),
        Duration::from_millis(5),
        move |uid, group: MessageGroup| {
            let adapter = dispatch_adapter.clone();
            let kb_config = dispatch_kb_configs.get(uid).unwrap();
            let kb_path = dispatch_kb_manager.get_kb_path(uid, &kb_config.kb_name);
            let note_service = dispatch_note_service.clone();
            let chat_id = group.chat_id;
            tokio::spawn(async move {
                let outcome = note_service.create(group, chat_id, uid, kb_path, &kb_config, None).await;
                let _ = adapter.send_message(chat_id, &outcome.reply_text).await;
            });
        },
        |_user_id| Arc::new(CannedAgent) as Arc<dyn Agent>,
    ));

    let mut allow_list = HashSet::new();
    allow_list.insert(user_id);

    let router = MessageRouter::new(allow_list, kb_configs, kb_manager, context_cache, chat_adapter.clone());
    router.handle(forwarded_message(user_id)).await;

    // Give the aggregator's debounce ticker time to fire and the spawned
    // dispatch task time to run.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let sent = chat_adapter.sent.lock().unwrap();
    assert!(
        sent.iter().any(|(_, text)| text.contains("note")),
        "expected a note confirmation, got {sent:?}"
    );
}
