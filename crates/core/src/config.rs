use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::Platform;

/// Settings shared by the sync model, the selection state and the store
/// adapters. Built once at startup and handed to each consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "Platform::defaults")]
    pub platforms: Vec<Platform>,
    #[serde(default = "default_waiting_grace_ms")]
    pub waiting_grace_ms: u64,
    #[serde(default = "default_mock_latency_ms")]
    pub mock_latency_ms: u64,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

const fn default_waiting_grace_ms() -> u64 {
    500
}

const fn default_mock_latency_ms() -> u64 {
    700
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            platforms: Platform::defaults(),
            waiting_grace_ms: default_waiting_grace_ms(),
            mock_latency_ms: default_mock_latency_ms(),
            layout: LayoutConfig::default(),
            server: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_base_offset")]
    pub base_offset: u32,
    #[serde(default = "default_per_platform")]
    pub per_platform: u32,
}

const fn default_base_offset() -> u32 {
    50
}

const fn default_per_platform() -> u32 {
    180
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            base_offset: default_base_offset(),
            per_platform: default_per_platform(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub base_url: String,
    pub project_id: String,
}

impl SyncConfig {
    pub fn waiting_grace(&self) -> Duration {
        Duration::from_millis(self.waiting_grace_ms)
    }

    pub fn mock_latency(&self) -> Duration {
        Duration::from_millis(self.mock_latency_ms)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Loads `path` when given, otherwise the per-user config file if it
    /// exists, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.platforms.is_empty() {
            return Err(Error::Config("at least one platform is required".into()));
        }
        let mut seen = HashSet::new();
        for platform in &self.platforms {
            if platform.as_str().trim().is_empty() {
                return Err(Error::Config("platform keys must not be blank".into()));
            }
            if !seen.insert(platform) {
                return Err(Error::Config(format!("duplicate platform: {platform}")));
            }
        }
        if let Some(server) = &self.server {
            if server.base_url.trim().is_empty() {
                return Err(Error::Config("server.base_url must not be empty".into()));
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("shotsync");
    path.push("config.json");
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.waiting_grace(), Duration::from_millis(500));
        assert_eq!(config.platforms.len(), 3);
    }

    #[test]
    fn partial_layout_keeps_other_defaults() {
        let config = SyncConfig::from_json(r#"{"layout":{"per_platform":200}}"#).unwrap();
        assert_eq!(config.layout.base_offset, 50);
        assert_eq!(config.layout.per_platform, 200);
    }

    #[test]
    fn custom_platform_list_is_accepted() {
        let config =
            SyncConfig::from_json(r#"{"platforms":["aplite","basalt","chalk","diorite"]}"#)
                .unwrap();
        assert_eq!(config.platforms.len(), 4);
        assert_eq!(config.platforms[3], Platform::new("diorite"));
    }

    #[test]
    fn duplicate_platforms_are_rejected() {
        let err = SyncConfig::from_json(r#"{"platforms":["basalt","basalt"]}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_platform_list_is_rejected() {
        assert!(SyncConfig::from_json(r#"{"platforms":[]}"#).is_err());
    }

    #[test]
    fn server_section_is_parsed() {
        let config = SyncConfig::from_json(
            r#"{"server":{"base_url":"http://127.0.0.1:8000","project_id":"12"}}"#,
        )
        .unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.project_id, "12");
    }
}
