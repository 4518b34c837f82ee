//! Message routing (C8): the entry point `noteforge-bot` calls for every
//! inbound message. Allow-lists the sender, resolves (or prompts for) KB
//! config, and feeds the per-user aggregator.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::chat_adapter::ChatAdapter;
use crate::context_cache::UserContextCache;
use crate::kb::KbRepositoryManager;
use crate::types::{BotMode, IncomingMessage, KbType, UserKbConfig};

/// Looks up (or records) a user's KB configuration. `noteforge-bot` backs
/// this with a small JSON-file store; tests use an in-memory map.
pub trait KbConfigStore: Send + Sync {
    fn get(&self, user_id: i64) -> Option<UserKbConfig>;
    fn set(&self, config: UserKbConfig);
}

/// Routes inbound messages: allow-list, KB-config resolution, and handoff
/// into the per-user aggregator.
pub struct MessageRouter<A: ChatAdapter> {
    allow_list: HashSet<i64>,
    kb_configs: Arc<dyn KbConfigStore>,
    kb_manager: Arc<KbRepositoryManager>,
    context_cache: Arc<UserContextCache>,
    chat_adapter: Arc<A>,
}

impl<A: ChatAdapter> MessageRouter<A> {
    pub fn new(
        allow_list: HashSet<i64>,
        kb_configs: Arc<dyn KbConfigStore>,
        kb_manager: Arc<KbRepositoryManager>,
        context_cache: Arc<UserContextCache>,
        chat_adapter: Arc<A>,
    ) -> Self {
        Self {
            allow_list,
            kb_configs,
            kb_manager,
            context_cache,
            chat_adapter,
        }
    }

    /// Handle one inbound message: silently ignore non-allow-listed
    /// senders, prompt for setup when no KB is configured, otherwise feed
    /// the per-user aggregator.
    pub async fn handle(&self, msg: IncomingMessage) {
        if !self.allow_list.contains(&msg.user_id) {
            warn!(user_id = msg.user_id, "message from non-allow-listed user ignored");
            return;
        }

        let kb_config = match self.kb_configs.get(msg.user_id) {
            Some(cfg) => cfg,
            None => {
                let default = UserKbConfig {
                    user_id: msg.user_id,
                    kb_name: "default".to_string(),
                    kb_type: KbType::Local,
                    github_url: None,
                    has_credentials: false,
                    mode: BotMode::Note,
                };
                self.kb_configs.set(default.clone());
                let _ = self
                    .chat_adapter
                    .reply_to(
                        &msg,
                        "No knowledge base configured yet — starting you on a local one. \
                         Use the setup command to connect a GitHub-backed KB instead.",
                    )
                    .await;
                default
            }
        };

        let kb_path = match self.kb_manager.init_local(msg.user_id, &kb_config.kb_name) {
            Ok(path) => path,
            Err(err) => {
                warn!(user_id = msg.user_id, "kb init failed: {err}");
                let _ = self
                    .chat_adapter
                    .reply_to(&msg, "Could not prepare your knowledge base right now.")
                    .await;
                return;
            }
        };

        self.context_cache
            .get_or_create_aggregator(msg.user_id, kb_path, kb_config.mode)
            .await;

        if !self.context_cache.add_message(msg.user_id, msg) {
            info!("message dropped: aggregator vanished between creation and add");
        }
    }
}

/// In-memory KB config store used by tests and by callers that don't need
/// persistence across restarts.
#[derive(Default)]
pub struct InMemoryKbConfigStore {
    configs: std::sync::Mutex<std::collections::HashMap<i64, UserKbConfig>>,
}

impl InMemoryKbConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KbConfigStore for InMemoryKbConfigStore {
    fn get(&self, user_id: i64) -> Option<UserKbConfig> {
        self.configs.lock().expect("kb config store poisoned").get(&user_id).cloned()
    }

    fn set(&self, config: UserKbConfig) {
        self.configs
            .lock()
            .expect("kb config store poisoned")
            .insert(config.user_id, config);
    }
}

/// Data directory under which per-user KBs live when no explicit config
/// overrides it.
pub fn default_data_root() -> PathBuf {
    directories::ProjectDirs::from("dev", "noteforge", "noteforge")
        .map(|dirs| dirs.data_dir().join("kbs"))
        .unwrap_or_else(|| PathBuf::from("./data/kbs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::ScriptedAgent;
    use crate::agent::Agent;
    use crate::chat_adapter::test_support::FakeChatAdapter;
    use tempfile::TempDir;

    fn make_message(user_id: i64) -> IncomingMessage {
        IncomingMessage {
            message_id: 1,
            chat_id: user_id,
            user_id,
            text: "hello".into(),
            content_type: crate::types::ContentType::Text,
            timestamp: 0,
            caption: None,
            forward_date: None,
            forward_sender_name: None,
            forward_from_chat_id: None,
            forward_from_message_id: None,
            media_handles: Vec::new(),
        }
    }

    #[tokio::test]
    async fn non_allow_listed_user_is_ignored() {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(FakeChatAdapter::new());
        let router = MessageRouter::new(
            HashSet::new(),
            Arc::new(InMemoryKbConfigStore::new()),
            Arc::new(KbRepositoryManager::new(dir.path().to_path_buf())),
            Arc::new(UserContextCache::new(
                std::time::Duration::from_millis(30),
                std::time::Duration::from_millis(5),
                |_, _| {},
                |_user_id| Arc::new(ScriptedAgent::new(vec![])) as Arc<dyn Agent>,
            )),
            adapter.clone(),
        );
        router.handle(make_message(1)).await;
        assert!(adapter.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn allow_listed_user_gets_default_kb_prompt_on_first_message() {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(FakeChatAdapter::new());
        let mut allow = HashSet::new();
        allow.insert(1);
        let router = MessageRouter::new(
            allow,
            Arc::new(InMemoryKbConfigStore::new()),
            Arc::new(KbRepositoryManager::new(dir.path().to_path_buf())),
            Arc::new(UserContextCache::new(
                std::time::Duration::from_millis(30),
                std::time::Duration::from_millis(5),
                |_, _| {},
                |_user_id| Arc::new(ScriptedAgent::new(vec![])) as Arc<dyn Agent>,
            )),
            adapter.clone(),
        );
        router.handle(make_message(1)).await;
        assert_eq!(adapter.sent.lock().unwrap().len(), 1);
    }
}
