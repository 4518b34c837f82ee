//! Hub startup configuration: its own layered figment pipeline, separate
//! from `noteforge_core::config::Config` since the Hub has no bot token to
//! validate and can run standalone, supervised, or reached remotely.

use std::collections::HashMap;
use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use noteforge_core::config::VectorStoreConfig;
use noteforge_core::error::ConfigError;
use noteforge_core::types::McpServerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8765".to_string()
}

impl HubConfig {
    pub fn load(config_path: &std::path::Path) -> Result<Self, ConfigError> {
        let figment = Figment::from(Serialized::defaults(HubConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("NOTEFORGE_HUB_").split("__"));

        figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    pub fn resolved_data_root(&self) -> PathBuf {
        self.data_root.clone().unwrap_or_else(noteforge_core::router::default_data_root)
    }
}

pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "noteforge", "noteforge")
        .map(|dirs| dirs.config_dir().join("hub.toml"))
        .unwrap_or_else(|| PathBuf::from("./hub.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = HubConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8765");
    }

    #[test]
    fn toml_file_overrides_bind_addr() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hub.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "bind_addr = \"127.0.0.1:9090\"").unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
    }
}
