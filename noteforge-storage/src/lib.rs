//! Pluggable per-user memory storage backends (C16).
//!
//! Three backends share one trait, selected by a tagged-variant factory:
//! `json` (per-user flat file, substring search), `vector` (embeddings +
//! cosine similarity over a local or remote index), `mem-agent` (delegates
//! curation to an [`Agent`](noteforge_core::agent::Agent), falling back to
//! `json` on error). Nothing outside this crate constructs a backend
//! directly — callers go through [`build_storage`].

pub mod agent_store;
pub mod json_store;
pub mod vector_store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use noteforge_core::agent::Agent;
use noteforge_core::error::StorageError;
use noteforge_core::types::MemoryRecord;

/// Uniform interface over the three memory backends.
#[async_trait]
pub trait MemoryStorage: Send + Sync {
    async fn store(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError>;

    async fn retrieve(
        &self,
        user_id: i64,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError>;

    async fn list_categories(&self, user_id: i64) -> Result<Vec<String>, StorageError>;

    async fn delete(&self, user_id: i64, id: &str) -> Result<(), StorageError>;

    async fn clear(&self, user_id: i64) -> Result<(), StorageError>;
}

/// Which [`MemoryStorage`] backend a user (or the whole deployment) has
/// configured. Mirrors `noteforge_core::config::StorageType` one-to-one;
/// kept as a separate type here so this crate has no dependency edge back
/// onto the config module's figment-specific derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Json,
    Vector,
    MemAgent,
}

/// Settings needed to build a [`vector_store::VectorMemoryStore`].
#[derive(Debug, Clone)]
pub struct VectorStoreSettings {
    pub endpoint: String,
    pub embedding_model: String,
}

/// Builds the configured [`MemoryStorage`] backend, rooted at
/// `data_root/memory`. `agent` is only required for [`StorageKind::MemAgent`].
pub fn build_storage(
    kind: StorageKind,
    data_root: &Path,
    vector: &VectorStoreSettings,
    agent: Option<Arc<dyn Agent>>,
) -> Result<Box<dyn MemoryStorage>, StorageError> {
    let memory_root = data_root.join("memory");
    match kind {
        StorageKind::Json => Ok(Box::new(json_store::JsonMemoryStore::new(memory_root))),
        StorageKind::Vector => Ok(Box::new(vector_store::VectorMemoryStore::open(
            &memory_root,
            vector,
        )?)),
        StorageKind::MemAgent => {
            let agent = agent.ok_or_else(|| StorageError::BackendUnavailable {
                message: "mem-agent storage selected but no Agent was provided".to_string(),
            })?;
            Ok(Box::new(agent_store::AgentMemoryStore::new(
                memory_root.clone(),
                agent,
                json_store::JsonMemoryStore::new(memory_root),
            )))
        }
    }
}

/// `data/memory/user_{id}` per-user directory convention, shared by all
/// three backends.
pub(crate) fn user_dir(memory_root: &Path, user_id: i64) -> PathBuf {
    memory_root.join(format!("user_{user_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_storage_json_does_not_require_agent() {
        let tmp = tempfile::tempdir().unwrap();
        let vector = VectorStoreSettings {
            endpoint: "sqlite://unused".to_string(),
            embedding_model: "unused".to_string(),
        };
        let storage = build_storage(StorageKind::Json, tmp.path(), &vector, None);
        assert!(storage.is_ok());
    }

    #[test]
    fn build_storage_mem_agent_without_agent_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let vector = VectorStoreSettings {
            endpoint: "sqlite://unused".to_string(),
            embedding_model: "unused".to_string(),
        };
        let storage = build_storage(StorageKind::MemAgent, tmp.path(), &vector, None);
        assert!(matches!(
            storage,
            Err(StorageError::BackendUnavailable { .. })
        ));
    }
}
