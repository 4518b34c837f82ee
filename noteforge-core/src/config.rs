//! Layered startup configuration.
//!
//! Grounded on `rustant-core::config`'s figment pipeline, narrowed to the
//! knobs this bot actually has: `Serialized::defaults` -> `Toml::file` ->
//! `Env::prefixed("NOTEFORGE_").split("__")`. `.env` loading and CLI
//! override merging happen in `noteforge-bot` before [`Config::load`] runs;
//! this module only owns the shape and the file/env layers. `MCP_HUB_URL`
//! is read directly from the process environment at startup rather than
//! through this figment pipeline, since its presence decides whether
//! [`crate::mcp_manager::McpServerManager`] spawns a subprocess at all —
//! that branch has to happen before the rest of configuration is settled.

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Backend a user's memory store is persisted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    Json,
    Vector,
    MemAgent,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Json
    }
}

/// Git settings for the per-user knowledge-base repository (C2/C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbGitConfig {
    /// Commit author name used for local commits.
    pub commit_author_name: String,
    /// Commit author email used for local commits.
    pub commit_author_email: String,
    /// Whether to push to the remote after every commit.
    pub auto_push: bool,
}

impl Default for KbGitConfig {
    fn default() -> Self {
        Self {
            commit_author_name: "noteforge-bot".to_string(),
            commit_author_email: "bot@noteforge.local".to_string(),
            auto_push: true,
        }
    }
}

/// Vector-store endpoint and embedding model settings, used only when
/// [`StorageType::Vector`] is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Backend endpoint URL (local `rusqlite` file URI, or Qdrant HTTP URL).
    pub endpoint: String,
    /// Embedding model identifier passed to the configured embedding
    /// provider.
    pub embedding_model: String,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "sqlite://./data/vector/index.db".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Sliding-window rate limiting (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_seconds: 60,
        }
    }
}

/// Hub process health-check schedule (C14), the exponential-with-cap
/// schedule resolved in SPEC_FULL's Open Questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub interval_secs: u64,
    pub max_failures: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            max_failures: 5,
        }
    }
}

/// Top-level configuration for the Noteforge bot process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chat-adapter bot token. The only required credential; missing it is
    /// a fatal startup error.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Root directory under which per-user KBs are checked out.
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    #[serde(default)]
    pub storage_type: StorageType,
    #[serde(default)]
    pub kb_git: KbGitConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Debounce window for the message aggregator, in seconds (C5).
    #[serde(default = "default_message_group_timeout")]
    pub message_group_timeout_secs: u64,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Path to the `noteforge-hub` binary, used only when `MCP_HUB_URL` is
    /// unset (standalone mode).
    #[serde(default = "default_hub_binary")]
    pub hub_binary: String,
    /// Command line of the external `Agent` process, split on whitespace
    /// into a program and its fixed argument list. The prompt itself is
    /// never part of this line; it is written to the child's stdin per
    /// invocation.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
    /// Statically configured external MCP servers (C13), in addition to
    /// whatever the Hub registers at runtime.
    #[serde(default)]
    pub mcp_servers: std::collections::HashMap<String, crate::types::McpServerConfig>,
}

fn default_message_group_timeout() -> u64 {
    10
}

fn default_hub_binary() -> String {
    "noteforge-hub".to_string()
}

fn default_agent_command() -> String {
    "noteforge-agent".to_string()
}

impl Config {
    /// Assembles configuration from defaults, an optional TOML file, and
    /// `NOTEFORGE_`-prefixed environment variables (double underscore as
    /// the nesting separator, e.g. `NOTEFORGE_RATE_LIMIT__MAX_REQUESTS`).
    ///
    /// `config_path` is probed but not required to exist: a missing file
    /// simply contributes nothing to the layered figment, matching
    /// `rustant-core::config`'s tolerance of a first-run environment with
    /// no config file on disk yet.
    pub fn load(config_path: &std::path::Path) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("NOTEFORGE_").split("__"));

        let config: Config = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let token_is_blank = match self.bot_token.as_deref() {
            Some(t) => t.trim().is_empty(),
            None => true,
        };
        if token_is_blank {
            return Err(ConfigError::MissingField {
                field: "bot_token".to_string(),
            });
        }
        Ok(())
    }

    /// Resolves the KB data root, falling back to the OS data directory
    /// (see [`crate::router::default_data_root`]) when unset.
    pub fn resolved_data_root(&self) -> PathBuf {
        self.data_root
            .clone()
            .unwrap_or_else(crate::router::default_data_root)
    }
}

/// Well-known config file search path: `~/.config/noteforge/config.toml`,
/// falling back to `./config.toml` in the working directory when no home
/// directory can be resolved.
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "noteforge", "noteforge")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("./config.toml"))
}
