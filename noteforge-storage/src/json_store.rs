//! Per-user flat-file memory backend.
//!
//! Each user's memories live in `data/memory/user_{id}/memories.json`, an
//! array of [`MemoryRecord`] written atomically (write to a `.tmp` sibling,
//! then `rename`), the same idiom `noteforge_core::credentials` uses for
//! its encrypted credentials file.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use noteforge_core::error::StorageError;
use noteforge_core::types::MemoryRecord;

use crate::{user_dir, MemoryStorage};

pub struct JsonMemoryStore {
    memory_root: PathBuf,
    // Guards the read-modify-write cycle per process; the directory layout
    // keeps users independent so a single global lock only ever serializes
    // writes that would otherwise race on the same file anyway.
    lock: Mutex<()>,
}

impl JsonMemoryStore {
    pub fn new(memory_root: PathBuf) -> Self {
        Self {
            memory_root,
            lock: Mutex::new(()),
        }
    }

    fn records_path(&self, user_id: i64) -> PathBuf {
        user_dir(&self.memory_root, user_id).join("memories.json")
    }

    fn load(&self, user_id: i64) -> Result<Vec<MemoryRecord>, StorageError> {
        let path = self.records_path(user_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn save(&self, user_id: i64, records: &[MemoryRecord]) -> Result<(), StorageError> {
        let dir = user_dir(&self.memory_root, user_id);
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::Io(e.to_string()))?;
        let path = self.records_path(user_id);
        let serialized =
            serde_json::to_string_pretty(records).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized).map_err(|e| StorageError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStorage for JsonMemoryStore {
    async fn store(&self, record: MemoryRecord) -> Result<MemoryRecord, StorageError> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.load(record.user_id)?;
        records.push(record.clone());
        self.save(record.user_id, &records)?;
        Ok(record)
    }

    async fn retrieve(
        &self,
        user_id: i64,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StorageError> {
        let _guard = self.lock.lock().unwrap();
        let records = self.load(user_id)?;
        let needle = query.to_lowercase();
        let matches = records
            .into_iter()
            .filter(|r| match category {
                Some(c) => r.category == c,
                None => true,
            })
            .filter(|r| needle.is_empty() || r.content.to_lowercase().contains(&needle))
            .take(limit)
            .collect();
        Ok(matches)
    }

    async fn list_categories(&self, user_id: i64) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock().unwrap();
        let records = self.load(user_id)?;
        let mut categories: Vec<String> = records.into_iter().map(|r| r.category).collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    async fn delete(&self, user_id: i64, id: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap();
        let mut records = self.load(user_id)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(StorageError::NotFound { id: id.to_string() });
        }
        self.save(user_id, &records)
    }

    async fn clear(&self, user_id: i64) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap();
        self.save(user_id, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (JsonMemoryStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (JsonMemoryStore::new(tmp.path().join("memory")), tmp)
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let (store, _tmp) = store();
        let record = MemoryRecord::new(1, "buy oat milk", "groceries");
        store.store(record.clone()).await.unwrap();

        let found = store.retrieve(1, "oat", None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, record.id);
    }

    #[tokio::test]
    async fn retrieve_is_scoped_per_user() {
        let (store, _tmp) = store();
        store
            .store(MemoryRecord::new(1, "user one's secret", "notes"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(2, "user two's secret", "notes"))
            .await
            .unwrap();

        let found = store.retrieve(1, "secret", None, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, 1);
    }

    #[tokio::test]
    async fn category_filter_narrows_results() {
        let (store, _tmp) = store();
        store
            .store(MemoryRecord::new(1, "call mom", "reminders"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(1, "buy milk", "groceries"))
            .await
            .unwrap();

        let found = store.retrieve(1, "", Some("reminders"), 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].category, "reminders");
    }

    #[tokio::test]
    async fn delete_missing_id_errors() {
        let (store, _tmp) = store();
        let err = store.delete(1, "does-not-exist").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn clear_empties_user_records() {
        let (store, _tmp) = store();
        store
            .store(MemoryRecord::new(1, "to be cleared", "notes"))
            .await
            .unwrap();
        store.clear(1).await.unwrap();
        let found = store.retrieve(1, "", None, 10).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn list_categories_is_sorted_and_deduped() {
        let (store, _tmp) = store();
        store
            .store(MemoryRecord::new(1, "a", "zeta"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(1, "b", "alpha"))
            .await
            .unwrap();
        store
            .store(MemoryRecord::new(1, "c", "alpha"))
            .await
            .unwrap();

        let categories = store.list_categories(1).await.unwrap();
        assert_eq!(categories, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
