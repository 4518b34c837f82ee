//! Mem-agent memory backend: delegates curation to an
//! [`Agent`](noteforge_core::agent::Agent) restricted to a single user's
//! memory directory, falling back to the JSON backend for any call that
//! errors (C16's documented degrade path).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use noteforge_core::agent::{Agent, AgentMode, AgentRequest};
use noteforge_core::error::StorageError;
use noteforge_core::types::MemoryRecord;
use tracing::warn;

use crate::json_store::JsonMemoryStore;
use crate::{user_dir, MemoryStorage};

pub struct AgentMemoryStore {
    memory_root: PathBuf,
    agent: Arc<dyn Agent>,
    fallback: JsonMemoryStore,
}

impl AgentMemoryStore {
    pub fn new(memory_root: PathBuf, agent: Arc<dyn Agent>, fallback: JsonMemoryStore) -> Self {
        Self {
            memory_root,
            agent,
            fallback,
        }
    }

    fn working_dir(&self, user_id: i64) -> PathBuf {
        user_dir(&self.memory_root, user_id)
    }

    async fn run(&self, user_id: i64, prompt: String) -> Result<String, StorageError> {
        let working_dir = self.working_dir(user_id);
        std::fs::create_dir_all(&working_dir).map_err(|e| StorageError::Io(e.to_string()))?;
        let response = self
            .agent
            .process(AgentRequest {
                mode: AgentMode::Note,
                prompt,
                working_dir,
                user_id,
            })
            .await
            .map_err(|e| StorageError::BackendUnavailable {
                message: e.to_string(),
            })?;
        Ok(response.text)
    }
}

#[async_trait]
impl MemoryStorage for AgentMemoryStore {
    async fn store(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError> {
        let prompt = format!(
            "Store this memory under category \"{}\": {}",
            record.category, record.content
        );
        // The agent run is best-effort curation; the JSON index is the
        // source of truth for reads (see `retrieve` below), so every store
        // lands there regardless of whether the agent itself succeeded.
        if let Err(err) = self.run(record.user_id, prompt).await {
            warn!(user_id = record.user_id, "mem-agent store failed, falling back to json: {err}");
        }
        self.fallback.store(record).await
    }

    async fn retrieve(
        &self,
        user_id: i64,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        // Retrieval needs structured results, which a free-text agent reply
        // can't guarantee; the JSON index the agent's edits land in is the
        // source of truth for reads.
        let _ = (query, category, limit);
        self.fallback.retrieve(user_id, query, category, limit).await
    }

    async fn list_categories(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        self.fallback.list_categories(user_id).await
    }

    async fn delete(&self, user_id: i64, id: &str) -> Result<(), StorageError> {
        let prompt = format!("Delete the memory with id \"{id}\"");
        match self.run(user_id, prompt).await {
            Ok(_) => self.fallback.delete(user_id, id).await.or(Ok(())),
            Err(err) => {
                warn!(user_id, "mem-agent delete failed, falling back to json: {err}");
                self.fallback.delete(user_id, id).await
            }
        }
    }

    async fn clear(&self, user_id: i64) -> Result<(), StorageError> {
        self.fallback.clear(user_id).await
    }
}
