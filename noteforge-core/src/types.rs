//! Core domain entities shared across the aggregation pipeline, the MCP
//! hub, and the storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// The kind of content carried by an [`IncomingMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Photo,
    Document,
    Video,
    Audio,
    Voice,
    Animation,
    Sticker,
    Other,
}

/// Platform-independent message DTO handed to the core by a `ChatAdapter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
    pub content_type: ContentType,
    pub timestamp: i64,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub forward_date: Option<i64>,
    #[serde(default)]
    pub forward_sender_name: Option<String>,
    #[serde(default)]
    pub forward_from_chat_id: Option<i64>,
    #[serde(default)]
    pub forward_from_message_id: Option<i64>,
    #[serde(default)]
    pub media_handles: Vec<String>,
}

impl IncomingMessage {
    /// `isForwarded = forwardDate>0 ∨ forwardFromChatId≠nil ∨
    /// (forwardSenderName≠nil ∧ nonblank)`.
    pub fn is_forwarded(&self) -> bool {
        self.forward_date.is_some_and(|d| d > 0)
            || self.forward_from_chat_id.is_some()
            || self
                .forward_sender_name
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty())
    }
}

/// Append-only ordered sequence of messages belonging to one chat, owned
/// exclusively by the [`crate::aggregator::MessageAggregator`] until
/// dispatch.
#[derive(Debug, Clone)]
pub struct MessageGroup {
    pub chat_id: i64,
    pub messages: Vec<IncomingMessage>,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
}

impl MessageGroup {
    pub fn new(message: IncomingMessage) -> Self {
        let ts = message.timestamp;
        Self {
            chat_id: message.chat_id,
            messages: vec![message],
            first_timestamp: ts,
            last_timestamp: ts,
        }
    }

    pub fn push(&mut self, message: IncomingMessage) {
        self.last_timestamp = self.last_timestamp.max(message.timestamp);
        self.messages.push(message);
    }

    /// Content fingerprint used only for diagnostics/dedup hints; not a
    /// cryptographic digest.
    pub fn hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for m in &self.messages {
            m.message_id.hash(&mut hasher);
            m.text.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// The routing mode a user's chat is operating in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotMode {
    Note,
    Ask,
    Agent,
}

impl Default for BotMode {
    fn default() -> Self {
        BotMode::Note
    }
}

/// The KB backend a user has configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbType {
    Local,
    Github,
}

/// Per-user KB configuration, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserKbConfig {
    pub user_id: i64,
    pub kb_name: String,
    pub kb_type: KbType,
    #[serde(default)]
    pub github_url: Option<String>,
    #[serde(default)]
    pub has_credentials: bool,
    #[serde(default)]
    pub mode: BotMode,
}

/// Type-validated per-user settings override. Credential fields are never
/// representable here (enforced by the field set, not a runtime check).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettingsOverride {
    pub user_id: i64,
    pub overrides: HashMap<String, serde_json::Value>,
}

/// A single platform credential: username plus the base64-encoded
/// ciphertext produced by [`crate::credentials::CredentialsStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub username: String,
    pub encrypted_token: String,
}

/// Git hosting platform a credential is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitPlatform {
    Github,
    Gitlab,
}

/// On-disk shape of the encrypted credentials file:
/// `userId -> platform -> { username, encryptedToken }`.
pub type UserCredentials = HashMap<i64, HashMap<GitPlatform, StoredCredential>>;

/// In-memory per-user cache entry. Owned exclusively by
/// [`crate::context_cache::UserContextCache`].
pub struct UserContext {
    pub user_id: i64,
    pub kb_path: PathBuf,
    pub mode: BotMode,
    pub agent: std::sync::Arc<dyn crate::agent::Agent>,
}

/// A memory record stored per-user; never shared across users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: i64,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(user_id: i64, content: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            content: content.into(),
            category: category.into(),
            tags: Vec::new(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }
}

/// Events published on [`crate::event_bus::EventBus`] in reaction to KB
/// file changes and git activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KbChangeEvent {
    FileCreated {
        path: PathBuf,
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    FileModified {
        path: PathBuf,
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    FileDeleted {
        path: PathBuf,
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    FolderCreated {
        path: PathBuf,
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    FolderDeleted {
        path: PathBuf,
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    BatchChanges {
        paths: Vec<PathBuf>,
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    GitCommit {
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    GitPush {
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
    GitPull {
        user_id: Option<i64>,
        source: String,
        ts: DateTime<Utc>,
    },
}

impl KbChangeEvent {
    /// Discriminant name, used as the event-bus subscription key.
    pub fn kind(&self) -> &'static str {
        match self {
            KbChangeEvent::FileCreated { .. } => "FileCreated",
            KbChangeEvent::FileModified { .. } => "FileModified",
            KbChangeEvent::FileDeleted { .. } => "FileDeleted",
            KbChangeEvent::FolderCreated { .. } => "FolderCreated",
            KbChangeEvent::FolderDeleted { .. } => "FolderDeleted",
            KbChangeEvent::BatchChanges { .. } => "BatchChanges",
            KbChangeEvent::GitCommit { .. } => "GitCommit",
            KbChangeEvent::GitPush { .. } => "GitPush",
            KbChangeEvent::GitPull { .. } => "GitPull",
        }
    }

    /// The `kb_id` this event concerns, used by the reindex manager to key
    /// its per-kb debounce state.
    pub fn kb_id(&self, user_id_to_kb: impl Fn(i64) -> Option<String>) -> Option<String> {
        let uid = match self {
            KbChangeEvent::FileCreated { user_id, .. }
            | KbChangeEvent::FileModified { user_id, .. }
            | KbChangeEvent::FileDeleted { user_id, .. }
            | KbChangeEvent::FolderCreated { user_id, .. }
            | KbChangeEvent::FolderDeleted { user_id, .. }
            | KbChangeEvent::BatchChanges { user_id, .. }
            | KbChangeEvent::GitCommit { user_id, .. }
            | KbChangeEvent::GitPush { user_id, .. }
            | KbChangeEvent::GitPull { user_id, .. } => *user_id,
        };
        uid.and_then(user_id_to_kb)
    }
}

/// Terminal/non-terminal states of a background reindex job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexStatus {
    Started,
    Processing,
    Completed,
    Failed,
}

impl ReindexStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReindexStatus::Completed | ReindexStatus::Failed)
    }
}

/// Aggregate stats reported on a completed/failed reindex job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReindexStats {
    pub docs: u64,
    pub chunks: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// A background reindex job, owned exclusively by the MCP Hub; at most one
/// non-terminal job exists per `kb_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexJob {
    pub kb_id: String,
    pub status: ReindexStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: ReindexStats,
    pub message: String,
}

impl ReindexJob {
    pub fn started(kb_id: impl Into<String>) -> Self {
        Self {
            kb_id: kb_id.into(),
            status: ReindexStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            stats: ReindexStats::default(),
            message: "reindex started".to_string(),
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = ReindexStatus::Processing;
        self.message = "reindex in progress".to_string();
    }

    pub fn mark_completed(&mut self, stats: ReindexStats) {
        self.status = ReindexStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.message = format!("indexed {} docs, {} chunks", stats.docs, stats.chunks);
        self.stats = stats;
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = ReindexStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.message = message.into();
    }
}

/// Transport-tagged MCP server configuration. Transport is determined by
/// the variant, not by inspecting an optional field, so "stdio command plus
/// a url" is unrepresentable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum McpServerConfig {
    Sse {
        url: String,
        #[serde(default = "default_timeout_ms", rename = "timeoutMs")]
        timeout_ms: u64,
        #[serde(default)]
        trust: bool,
        #[serde(default)]
        description: String,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_timeout_ms", rename = "timeoutMs")]
        timeout_ms: u64,
        #[serde(default)]
        trust: bool,
        #[serde(default)]
        description: String,
    },
}

fn default_timeout_ms() -> u64 {
    10_000
}
