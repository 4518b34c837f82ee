//! Per-`kb_id` Markdown document index backing `vector_search` and
//! `reindex_vector`.
//!
//! Distinct from `noteforge_storage::vector_store`'s per-user memory index:
//! that one ranks [`MemoryRecord`](noteforge_core::types::MemoryRecord)s,
//! this one ranks file paths and content snippets, so it keeps its own
//! tiny JSON-on-disk store (same write-temp-then-rename idiom as
//! `noteforge_storage::json_store`) rather than reusing
//! `noteforge_storage`'s `VectorIndex` trait. It does reuse
//! `EmbeddingProvider`, since nothing about that trait is memory-specific.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use noteforge_storage::vector_store::EmbeddingProvider;
use serde::{Deserialize, Serialize};

/// One Markdown file submitted to `reindex_vector`.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDocument {
    path: String,
    snippet: String,
    embedding: Vec<f32>,
}

/// A `vector_search` result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub score: f32,
    pub snippet: String,
}

const SNIPPET_CHARS: usize = 240;

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

pub struct KbIndex {
    root: PathBuf,
    embeddings: Box<dyn EmbeddingProvider>,
    cache: Mutex<HashMap<String, Vec<IndexedDocument>>>,
}

impl KbIndex {
    pub fn new(root: PathBuf, embeddings: Box<dyn EmbeddingProvider>) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            embeddings,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn file_for(&self, kb_id: &str) -> PathBuf {
        let safe_name = kb_id.replace([':', '/', '\\'], "_");
        self.root.join(format!("{safe_name}.json"))
    }

    fn load(&self, kb_id: &str) -> Vec<IndexedDocument> {
        if let Some(cached) = self.cache.lock().unwrap().get(kb_id) {
            return cached.clone();
        }
        let docs: Vec<IndexedDocument> = std::fs::read_to_string(self.file_for(kb_id))
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        self.cache.lock().unwrap().insert(kb_id.to_string(), docs.clone());
        docs
    }

    fn save(&self, kb_id: &str, docs: Vec<IndexedDocument>) -> std::io::Result<()> {
        let serialized = serde_json::to_string_pretty(&docs)?;
        let path = self.file_for(kb_id);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &path)?;
        self.cache.lock().unwrap().insert(kb_id.to_string(), docs);
        Ok(())
    }

    /// Replaces `kb_id`'s entire document set with freshly embedded copies
    /// of `documents`, returning the number of documents indexed.
    pub async fn reindex(&self, kb_id: &str, documents: &[DocumentInput]) -> Result<usize, String> {
        let mut indexed = Vec::with_capacity(documents.len());
        for doc in documents {
            let embedding = self.embeddings.embed(&doc.content).await.map_err(|e| e.to_string())?;
            let snippet: String = doc.content.chars().take(SNIPPET_CHARS).collect();
            indexed.push(IndexedDocument {
                path: doc.path.clone(),
                snippet,
                embedding,
            });
        }
        let count = indexed.len();
        self.save(kb_id, indexed).map_err(|e| e.to_string())?;
        Ok(count)
    }

    pub async fn search(&self, kb_id: &str, query: &str, top_k: usize) -> Result<Vec<SearchHit>, String> {
        let docs = self.load(kb_id);
        let query_embedding = self.embeddings.embed(query).await.map_err(|e| e.to_string())?;
        let mut scored: Vec<SearchHit> = docs
            .iter()
            .map(|d| SearchHit {
                path: d.path.clone(),
                score: cosine_similarity(&query_embedding, &d.embedding),
                snippet: d.snippet.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}
