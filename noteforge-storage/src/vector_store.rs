//! Vector memory backend: an embeddings provider plus a vector index,
//! composed behind two small traits so either half can be swapped without
//! touching [`VectorMemoryStore`] itself.
//!
//! The local index is `rusqlite`-backed (already a workspace dependency),
//! storing one row per [`MemoryRecord`] with its embedding serialized as a
//! JSON array of `f32`; ranking is exact cosine similarity over the full
//! per-user row set, adequate at the scale a single user's memory reaches.
//! A `Qdrant`/`Infinity`-style HTTP backend is expressed as the same trait
//! so an external vector database can be dropped in without touching
//! callers.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use noteforge_core::error::StorageError;
use noteforge_core::types::MemoryRecord;
use rusqlite::Connection;

use crate::{user_dir, MemoryStorage, VectorStoreSettings};

/// Turns text into a fixed-size embedding vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError>;
}

/// HTTP client for an `Infinity`-style local embeddings server, the
/// `sentence-transformers`-backed option mentioned in the spec's local
/// embeddings path.
pub struct InfinityEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl InfinityEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for InfinityEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": self.model, "input": [text] }))
            .send()
            .await
            .map_err(|e| StorageError::BackendUnavailable {
                message: format!("embeddings request failed: {e}"),
            })?;

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| StorageError::BackendUnavailable {
                    message: format!("malformed embeddings response: {e}"),
                })?;

        let vector = body["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| StorageError::BackendUnavailable {
                message: "embeddings response missing data[0].embedding".to_string(),
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        Ok(vector)
    }
}

/// Persists and ranks embeddings for a single `kb_id`.
///
/// `kb_id` is expected to already encode the owning user
/// (`"{user_id}:{kb_name}"`, the convention documented in SPEC_FULL's Open
/// Question resolutions), so filtering by `kb_id` alone is sufficient for
/// cross-user isolation without this trait needing a separate `user_id`
/// parameter.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, kb_id: &str, record: &MemoryRecord, embedding: Vec<f32>) -> Result<(), StorageError>;
    async fn query(&self, kb_id: &str, embedding: &[f32], limit: usize) -> Result<Vec<MemoryRecord>, StorageError>;
    async fn delete(&self, kb_id: &str, id: &str) -> Result<(), StorageError>;
    async fn clear(&self, kb_id: &str) -> Result<(), StorageError>;
    async fn list_categories(&self, kb_id: &str) -> Result<Vec<String>, StorageError>;
}

/// `rusqlite`-backed local vector index, one database file per configured
/// endpoint (typically shared across all users, rows partitioned by
/// `kb_id`).
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
}

impl SqliteVectorIndex {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| StorageError::BackendUnavailable {
            message: e.to_string(),
        })?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory_vectors (
                kb_id TEXT NOT NULL,
                id TEXT NOT NULL,
                record TEXT NOT NULL,
                embedding TEXT NOT NULL,
                category TEXT NOT NULL,
                PRIMARY KEY (kb_id, id)
            )",
            [],
        )
        .map_err(|e| StorageError::BackendUnavailable {
            message: e.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, kb_id: &str, record: &MemoryRecord, embedding: Vec<f32>) -> Result<(), StorageError> {
        let record_json = serde_json::to_string(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let embedding_json = serde_json::to_string(&embedding).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_vectors (kb_id, id, record, embedding, category)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(kb_id, id) DO UPDATE SET record = excluded.record, embedding = excluded.embedding, category = excluded.category",
            rusqlite::params![kb_id, record.id, record_json, embedding_json, record.category],
        )
        .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
        Ok(())
    }

    async fn query(&self, kb_id: &str, embedding: &[f32], limit: usize) -> Result<Vec<MemoryRecord>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT record, embedding FROM memory_vectors WHERE kb_id = ?1")
            .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
        let rows = stmt
            .query_map(rusqlite::params![kb_id], |row| {
                let record_json: String = row.get(0)?;
                let embedding_json: String = row.get(1)?;
                Ok((record_json, embedding_json))
            })
            .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;

        let mut scored: Vec<(f32, MemoryRecord)> = Vec::new();
        for row in rows {
            let (record_json, embedding_json) = row.map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
            let record: MemoryRecord =
                serde_json::from_str(&record_json).map_err(|e| StorageError::Serialization(e.to_string()))?;
            let candidate: Vec<f32> =
                serde_json::from_str(&embedding_json).map_err(|e| StorageError::Serialization(e.to_string()))?;
            scored.push((cosine_similarity(embedding, &candidate), record));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn delete(&self, kb_id: &str, id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute(
                "DELETE FROM memory_vectors WHERE kb_id = ?1 AND id = ?2",
                rusqlite::params![kb_id, id],
            )
            .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
        if affected == 0 {
            return Err(StorageError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn clear(&self, kb_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory_vectors WHERE kb_id = ?1", rusqlite::params![kb_id])
            .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
        Ok(())
    }

    async fn list_categories(&self, kb_id: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT category FROM memory_vectors WHERE kb_id = ?1 ORDER BY category")
            .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
        let rows = stmt
            .query_map(rusqlite::params![kb_id], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?;
        let mut categories = Vec::new();
        for row in rows {
            categories.push(row.map_err(|e| StorageError::BackendUnavailable { message: e.to_string() })?);
        }
        Ok(categories)
    }
}

/// `kb_id` convention used to scope every vector call to one user:
/// `"{user_id}:memories"` — there is only ever one memory "kb" per user,
/// unlike the Markdown knowledge bases which are named by the user.
fn memory_kb_id(user_id: i64) -> String {
    format!("{user_id}:memories")
}

pub struct VectorMemoryStore {
    embeddings: Box<dyn EmbeddingProvider>,
    index: Box<dyn VectorIndex>,
}

impl VectorMemoryStore {
    pub fn open(memory_root: &Path, settings: &VectorStoreSettings) -> Result<Self, StorageError> {
        let db_path = resolve_sqlite_path(memory_root, &settings.endpoint);
        let index: Box<dyn VectorIndex> = Box::new(SqliteVectorIndex::open(&db_path)?);
        let embeddings: Box<dyn EmbeddingProvider> = Box::new(InfinityEmbeddingProvider::new(
            &settings.endpoint,
            &settings.embedding_model,
        ));
        Ok(Self { embeddings, index })
    }

    pub fn with_backends(embeddings: Box<dyn EmbeddingProvider>, index: Box<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }
}

fn resolve_sqlite_path(memory_root: &Path, endpoint: &str) -> PathBuf {
    match endpoint.strip_prefix("sqlite://") {
        Some(path) => PathBuf::from(path),
        None => memory_root.join("vector_index.db"),
    }
}

#[async_trait]
impl MemoryStorage for VectorMemoryStore {
    async fn store(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError> {
        let embedding = self.embeddings.embed(&record.content).await?;
        let kb_id = memory_kb_id(record.user_id);
        self.index.upsert(&kb_id, &record, embedding).await?;
        Ok(record)
    }

    async fn retrieve(
        &self,
        user_id: i64,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        let kb_id = memory_kb_id(user_id);
        let embedding = self.embeddings.embed(query).await?;
        let results = self.index.query(&kb_id, &embedding, (limit * 4).max(1)).await?;
        let filtered = results
            .into_iter()
            .filter(|r| match category {
                Some(c) => r.category == c,
                None => true,
            })
            .take(limit)
            .collect();
        Ok(filtered)
    }

    async fn list_categories(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        self.index.list_categories(&memory_kb_id(user_id)).await
    }

    async fn delete(&self, user_id: i64, id: &str) -> Result<(), StorageError> {
        self.index.delete(&memory_kb_id(user_id), id).await
    }

    async fn clear(&self, user_id: i64) -> Result<(), StorageError> {
        self.index.clear(&memory_kb_id(user_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, StorageError> {
            // Deterministic toy embedding: count of each of 4 marker words.
            let markers = ["grocery", "work", "family", "other"];
            Ok(markers
                .iter()
                .map(|m| text.to_lowercase().matches(m).count() as f32)
                .collect())
        }
    }

    fn sqlite_index() -> (SqliteVectorIndex, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let index = SqliteVectorIndex::open(&tmp.path().join("index.db")).unwrap();
        (index, tmp)
    }

    #[tokio::test]
    async fn upsert_then_query_finds_most_similar() {
        let (index, _tmp) = sqlite_index();
        let store = VectorMemoryStore::with_backends(Box::new(FakeEmbeddings), Box::new(index));

        let grocery = MemoryRecord::new(1, "grocery grocery list", "groceries");
        let work = MemoryRecord::new(1, "work work meeting notes", "work");
        store.store(grocery.clone()).await.unwrap();
        store.store(work.clone()).await.unwrap();

        let found = store.retrieve(1, "grocery", None, 1).await.unwrap();
        assert_eq!(found[0].id, grocery.id);
    }

    #[tokio::test]
    async fn isolated_per_user_kb_id() {
        let (index, _tmp) = sqlite_index();
        let store = VectorMemoryStore::with_backends(Box::new(FakeEmbeddings), Box::new(index));

        store
            .store(MemoryRecord::new(1, "family dinner plans", "family"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(2, "family dinner plans", "family"))
            .await
            .unwrap();

        let user1 = store.retrieve(1, "family", None, 10).await.unwrap();
        let user2 = store.retrieve(2, "family", None, 10).await.unwrap();
        assert_eq!(user1.len(), 1);
        assert_eq!(user2.len(), 1);
        assert_eq!(user1[0].user_id, 1);
        assert_eq!(user2[0].user_id, 2);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn resolve_sqlite_path_strips_scheme() {
        let root = PathBuf::from("/data/memory");
        let path = resolve_sqlite_path(&root, "sqlite://./data/vector/index.db");
        assert_eq!(path, PathBuf::from("./data/vector/index.db"));
    }
}
