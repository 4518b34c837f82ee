//! Chat-ingestion process (C1/C5-C11): aggregates inbound console messages
//! per user, dispatches completed groups to the note/ask/agent-task
//! services, and supervises the MCP Hub. CLI/tracing/dotenv idiom grounded
//! on `rustant-cli/src/main.rs`.

mod agent;
mod console_adapter;
mod kb_config_store;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use noteforge_core::agent::Agent;
use noteforge_core::chat_adapter::ChatAdapter;
use noteforge_core::config::Config;
use noteforge_core::context_cache::UserContextCache;
use noteforge_core::credentials::CredentialsStore;
use noteforge_core::event_bus::EventBus;
use noteforge_core::git_ops::{CredentialResolver, GitOperations};
use noteforge_core::kb::KbRepositoryManager;
use noteforge_core::mcp_manager::McpServerManager;
use noteforge_core::rate_limiter::RateLimiter;
use noteforge_core::reindex::ReindexManager;
use noteforge_core::router::{KbConfigStore, MessageRouter};
use noteforge_core::services::ask::AskService;
use noteforge_core::services::agent_task::AgentTaskService;
use noteforge_core::services::note::{NoteService, RemoteTarget};
use noteforge_core::types::{GitPlatform, KbType, MessageGroup};

use agent::ExternalAgent;
use console_adapter::{ConsoleChatAdapter, ConsoleInbound};
use kb_config_store::JsonKbConfigStore;

const EVENT_WORKER_POOL_SIZE: usize = 4;
const EVENT_QUEUE_CAPACITY: usize = 256;
const CONSOLE_CHAT_ID: i64 = 1;
const CONSOLE_USER_ID: i64 = 1;

/// Noteforge: chat-driven Markdown knowledge-base curation bot.
#[derive(Parser, Debug)]
#[command(name = "noteforge-bot", version, about, long_about = None)]
struct Cli {
    /// Path to the bot's TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(noteforge_core::config::default_config_path);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("configuration error: {err}");
            return 1;
        }
    };

    match run_with_config(config).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("fatal runtime error: {err}");
            2
        }
    }
}

async fn run_with_config(config: Config) -> anyhow::Result<()> {
    let data_root = config.resolved_data_root();
    std::fs::create_dir_all(&data_root)?;

    let event_bus = EventBus::new(EVENT_WORKER_POOL_SIZE, EVENT_QUEUE_CAPACITY);
    let git_ops = Arc::new(GitOperations::new(event_bus.clone()));
    let credentials = Arc::new(CredentialsStore::open(&data_root)?);
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_requests,
        Duration::from_secs(config.rate_limit.window_seconds),
    ));
    let kb_manager = Arc::new(KbRepositoryManager::new(data_root.clone()));
    let kb_configs = Arc::new(JsonKbConfigStore::load(data_root.join("kb_configs.json"))?);
    let chat_adapter = ConsoleChatAdapter::new();

    let dispatcher = Arc::new(Dispatcher {
        context_cache: OnceLock::new(),
        git_ops,
        rate_limiter,
        kb_configs: kb_configs.clone(),
        kb_manager: kb_manager.clone(),
        credentials,
        chat_adapter: chat_adapter.clone(),
    });

    let agent_command = config.agent_command.clone();
    let context_cache = Arc::new(UserContextCache::new(
        Duration::from_secs(config.message_group_timeout_secs),
        Duration::from_millis(250),
        {
            let dispatcher = dispatcher.clone();
            move |user_id, group| dispatcher.clone().dispatch(user_id, group)
        },
        move |_user_id| Arc::new(ExternalAgent::new(&agent_command)) as Arc<dyn Agent>,
    ));
    dispatcher.set_context_cache(Arc::downgrade(&context_cache));

    let mut allow_list: HashSet<i64> = std::env::var("NOTEFORGE_ALLOWED_USERS")
        .ok()
        .map(|raw| raw.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    if allow_list.is_empty() {
        allow_list.insert(CONSOLE_USER_ID);
    }

    let router = Arc::new(MessageRouter::new(
        allow_list,
        kb_configs.clone(),
        kb_manager,
        context_cache,
        chat_adapter,
    ));

    let mcp_manager = McpServerManager::start(&config.hub_binary).await?;
    let _reindex_manager = ReindexManager::spawn(&event_bus, mcp_manager, move |user_id| kb_configs.resolve_kb_id(user_id));

    tracing::info!("noteforge-bot ready, type a message and press enter");
    let mut inbound = ConsoleInbound {
        chat_id: CONSOLE_CHAT_ID,
        user_id: CONSOLE_USER_ID,
    }
    .spawn();

    while let Some(message) = inbound.recv().await {
        router.handle(message).await;
    }

    Ok(())
}

/// Routes a completed [`MessageGroup`] to the service matching the user's
/// configured [`noteforge_core::types::BotMode`], pulling that user's agent
/// handle from the [`UserContextCache`] (C6) rather than sharing one across
/// every user. Holds a `Weak` back-reference to the cache it is itself the
/// `on_dispatch` callback of, set once via [`Self::set_context_cache`]
/// immediately after both are constructed.
struct Dispatcher {
    context_cache: OnceLock<Weak<UserContextCache>>,
    git_ops: Arc<GitOperations>,
    rate_limiter: Arc<RateLimiter>,
    kb_configs: Arc<JsonKbConfigStore>,
    kb_manager: Arc<KbRepositoryManager>,
    credentials: Arc<CredentialsStore>,
    chat_adapter: Arc<ConsoleChatAdapter>,
}

impl Dispatcher {
    fn set_context_cache(&self, context_cache: Weak<UserContextCache>) {
        let _ = self.context_cache.set(context_cache);
    }

    fn dispatch(self: Arc<Self>, user_id: i64, group: MessageGroup) {
        tokio::spawn(async move {
            let Some(context_cache) = self.context_cache.get().and_then(Weak::upgrade) else {
                tracing::warn!(user_id, "dispatched group with no context cache available");
                return;
            };
            let Some(kb_config) = self.kb_configs.get(user_id) else {
                tracing::warn!(user_id, "dispatched group for a user with no kb config");
                return;
            };
            let chat_id = group.chat_id;
            let kb_path = self.kb_manager.get_kb_path(user_id, &kb_config.kb_name);
            let agent = context_cache.get_or_create_agent(user_id);

            match kb_config.mode {
                noteforge_core::types::BotMode::Note => {
                    let note_service = NoteService::new(agent, self.git_ops.clone(), self.rate_limiter.clone());
                    let remote = remote_target(&self.credentials, user_id, &kb_config);
                    let outcome = note_service
                        .create(group, chat_id, user_id, kb_path, &kb_config, remote)
                        .await;
                    let _ = self.chat_adapter.send_message(chat_id, &outcome.reply_text).await;
                }
                noteforge_core::types::BotMode::Ask => {
                    let ask_service = AskService::new(agent, self.rate_limiter.clone());
                    let answer = ask_service.answer(group, user_id, kb_path).await;
                    let _ = self.chat_adapter.send_message(chat_id, &answer).await;
                }
                noteforge_core::types::BotMode::Agent => {
                    let agent_task_service =
                        AgentTaskService::new(agent, self.chat_adapter.clone(), self.rate_limiter.clone());
                    let prompt = group
                        .messages
                        .iter()
                        .map(|m| m.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");
                    if let Ok(processing_id) = self.chat_adapter.send_message(chat_id, "Working on it...").await {
                        agent_task_service.run(prompt, user_id, chat_id, kb_path, processing_id).await;
                    }
                }
            }
        });
    }
}

fn remote_target(
    credentials: &CredentialsStore,
    user_id: i64,
    kb_config: &noteforge_core::types::UserKbConfig,
) -> Option<RemoteTarget> {
    if kb_config.kb_type != KbType::Github {
        return None;
    }
    let url = kb_config.github_url.clone()?;
    let resolver = CredentialResolver {
        store: credentials,
        global_fallback: None,
    };
    Some(RemoteTarget {
        url,
        branch: "main".to_string(),
        platform: GitPlatform::Github,
        credentials: resolver.resolve(user_id, GitPlatform::Github),
    })
}
