use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

pub const DEFAULT_UPDATE_MANIFEST_URL: &str = "https://update.halley.io/halley-launcher.yaml";
pub const DEFAULT_EDITOR_ARCHIVE_BASE_URL: &str = "https://update.halley.io/editor-bins";
pub const CONFIG_FILE_NAME: &str = "config.json";

const ENV_DATA_DIR: &str = "HALLEY_LAUNCHER_DATA_DIR";
const ENV_UPDATE_URL: &str = "HALLEY_LAUNCHER_UPDATE_URL";
const ENV_EDITOR_URL: &str = "HALLEY_LAUNCHER_EDITOR_URL";
const ENV_UPDATE_KEY: &str = "HALLEY_LAUNCHER_UPDATE_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTuning {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for NetworkTuning {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 12,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    #[serde(alias = "data_dir")]
    pub data_dir: Option<PathBuf>,
    pub update_manifest_url: Option<String>,
    pub editor_archive_base_url: Option<String>,
    /// Base64 Ed25519 public key used to check launcher updates.
    pub update_public_key: Option<String>,
    pub network_tuning: Option<NetworkTuning>,
}

impl LauncherConfig {
    /// Resolves the data directory (explicit override, environment, platform
    /// default), then layers `config.json` from it and environment overrides
    /// on top.
    pub fn load(data_dir_override: Option<PathBuf>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let data_dir = data_dir_override
            .or_else(|| env(ENV_DATA_DIR).map(PathBuf::from))
            .or_else(default_data_dir)
            .ok_or(ConfigError::NoDataDir)?;

        let mut config = Self::read_file(&data_dir.join(CONFIG_FILE_NAME))?;
        config.data_dir = Some(data_dir);
        config.apply_overrides(env);
        Ok(config)
    }

    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(url) = value(ENV_UPDATE_URL) {
            self.update_manifest_url = Some(url);
        }
        if let Some(url) = value(ENV_EDITOR_URL) {
            self.editor_archive_base_url = Some(url);
        }
        if let Some(key) = value(ENV_UPDATE_KEY) {
            self.update_public_key = Some(key);
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(default_data_dir)
            .unwrap_or_else(|| PathBuf::from(".halley-launcher"))
    }

    pub fn update_manifest_url(&self) -> &str {
        self.update_manifest_url
            .as_deref()
            .unwrap_or(DEFAULT_UPDATE_MANIFEST_URL)
    }

    pub fn editor_archive_base_url(&self) -> &str {
        self.editor_archive_base_url
            .as_deref()
            .unwrap_or(DEFAULT_EDITOR_ARCHIVE_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn network_tuning(&self) -> NetworkTuning {
        self.network_tuning.clone().unwrap_or_default()
    }
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("halley-launcher"))
}
