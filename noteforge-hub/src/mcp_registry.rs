//! Registry of externally-reachable MCP servers the Hub can proxy to
//! (`list_mcp_servers`/`get_mcp_server`/`register_mcp_server`/
//! `enable_mcp_server`/`disable_mcp_server`), persisted the same
//! write-temp-then-rename way as `noteforge_storage::json_store`.
//!
//! This registry only tracks *configuration*; it doesn't itself dial the
//! servers it knows about; a client still connects with
//! `noteforge_mcp::McpClient::connect_stdio`/`connect_sse` using the entry
//! it looked up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use noteforge_core::types::McpServerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub name: String,
    pub config: McpServerConfig,
    pub enabled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum McpRegistryError {
    #[error("no mcp server registered under '{name}'")]
    NotFound { name: String },
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub struct McpServerRegistry {
    path: PathBuf,
    entries: Mutex<HashMap<String, McpServerEntry>>,
}

impl McpServerRegistry {
    /// Loads (or creates) the registry file at `path`, seeded with
    /// `statically` configured servers from startup configuration that
    /// aren't already present on disk.
    pub fn load(path: PathBuf, statically: HashMap<String, McpServerConfig>) -> Result<Self, McpRegistryError> {
        let mut entries: HashMap<String, McpServerEntry> = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| McpRegistryError::Io(e.to_string()))?;
            serde_json::from_str(&raw).map_err(|e| McpRegistryError::Serialization(e.to_string()))?
        } else {
            HashMap::new()
        };

        for (name, config) in statically {
            entries.entry(name.clone()).or_insert(McpServerEntry {
                name,
                config,
                enabled: true,
            });
        }

        let registry = Self {
            path,
            entries: Mutex::new(entries),
        };
        registry.persist()?;
        Ok(registry)
    }

    fn persist(&self) -> Result<(), McpRegistryError> {
        let entries = self.entries.lock().unwrap();
        let serialized =
            serde_json::to_string_pretty(&*entries).map_err(|e| McpRegistryError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| McpRegistryError::Io(e.to_string()))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized).map_err(|e| McpRegistryError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| McpRegistryError::Io(e.to_string()))?;
        Ok(())
    }

    pub fn list(&self) -> Vec<McpServerEntry> {
        let mut list: Vec<McpServerEntry> = self.entries.lock().unwrap().values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn get(&self, name: &str) -> Option<McpServerEntry> {
        self.entries.lock().unwrap().get(name).cloned()
    }

    pub fn register(&self, name: String, config: McpServerConfig) -> Result<(), McpRegistryError> {
        self.entries.lock().unwrap().insert(
            name.clone(),
            McpServerEntry {
                name,
                config,
                enabled: true,
            },
        );
        self.persist()
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), McpRegistryError> {
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(name).ok_or_else(|| McpRegistryError::NotFound {
                name: name.to_string(),
            })?;
            entry.enabled = enabled;
        }
        self.persist()
    }
}
