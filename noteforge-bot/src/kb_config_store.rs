//! JSON-file-backed [`KbConfigStore`], the persistent counterpart to
//! `noteforge_core::router::InMemoryKbConfigStore`. Same atomic
//! write-temp-then-rename idiom as `noteforge-hub`'s `McpServerRegistry`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use noteforge_core::router::KbConfigStore;
use noteforge_core::types::UserKbConfig;

pub struct JsonKbConfigStore {
    path: PathBuf,
    configs: Mutex<HashMap<i64, UserKbConfig>>,
}

impl JsonKbConfigStore {
    pub fn load(path: PathBuf) -> std::io::Result<Self> {
        let configs = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            path,
            configs: Mutex::new(configs),
        })
    }

    fn persist(&self, configs: &HashMap<i64, UserKbConfig>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(configs)?)?;
        std::fs::rename(&tmp_path, &self.path)
    }

    /// `user_id -> kb_id` resolution handed to `ReindexManager::spawn`, using
    /// the same `"{user_id}:{kb_name}"` convention as
    /// `noteforge_storage::vector_store::memory_kb_id`.
    pub fn resolve_kb_id(&self, user_id: i64) -> Option<String> {
        self.configs
            .lock()
            .expect("kb config store poisoned")
            .get(&user_id)
            .map(|cfg| format!("{user_id}:{}", cfg.kb_name))
    }
}

impl KbConfigStore for JsonKbConfigStore {
    fn get(&self, user_id: i64) -> Option<UserKbConfig> {
        self.configs.lock().expect("kb config store poisoned").get(&user_id).cloned()
    }

    fn set(&self, config: UserKbConfig) {
        let mut configs = self.configs.lock().expect("kb config store poisoned");
        configs.insert(config.user_id, config);
        if let Err(err) = self.persist(&configs) {
            tracing::warn!("failed to persist kb config: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noteforge_core::types::{BotMode, KbType};
    use tempfile::tempdir;

    fn config(user_id: i64) -> UserKbConfig {
        UserKbConfig {
            user_id,
            kb_name: "default".into(),
            kb_type: KbType::Local,
            github_url: None,
            has_credentials: false,
            mode: BotMode::Note,
        }
    }

    #[test]
    fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonKbConfigStore::load(dir.path().join("kb_configs.json")).unwrap();
        store.set(config(1));
        assert_eq!(store.get(1).unwrap().kb_name, "default");
    }

    #[test]
    fn survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kb_configs.json");
        JsonKbConfigStore::load(path.clone()).unwrap().set(config(7));
        let reloaded = JsonKbConfigStore::load(path).unwrap();
        assert_eq!(reloaded.get(7).unwrap().user_id, 7);
    }

    #[test]
    fn resolve_kb_id_uses_user_and_kb_name() {
        let dir = tempdir().unwrap();
        let store = JsonKbConfigStore::load(dir.path().join("kb_configs.json")).unwrap();
        store.set(config(3));
        assert_eq!(store.resolve_kb_id(3).as_deref(), Some("3:default"));
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = JsonKbConfigStore::load(dir.path().join("absent.json")).unwrap();
        assert!(store.get(42).is_none());
    }
}
