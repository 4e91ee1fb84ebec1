//! 应用配置模块
//!
//! 所有配置保存在 `<配置目录>/config.json` 中，按段划分（`sync`、`log`），
//! 各段独立读写，缺失或损坏时使用默认值。

use crate::core::{BrokenLinkPolicy, CompareMethod};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// `sync` 段：命令行未指定时使用的默认值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDefaults {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub method: CompareMethod,
    #[serde(default)]
    pub broken_links: BrokenLinkPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyring: Option<PathBuf>,
}

fn default_threads() -> usize {
    4
}

impl Default for SyncDefaults {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            method: CompareMethod::default(),
            broken_links: BrokenLinkPolicy::default(),
            key_id: None,
            keyring: None,
        }
    }
}

impl SyncDefaults {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "sync").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "sync", self)
    }
}

/// 默认配置目录，`data_path` 指向已存在的目录时改用它
pub fn config_dir() -> PathBuf {
    let default_dir = crate::dirs::config_dir()
        .map(|p| p.join("treesync"))
        .unwrap_or_else(|| PathBuf::from(".treesync"));

    read_config(&default_dir)
        .get("data_path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
        .unwrap_or(default_dir)
}

fn read_config(config_dir: &Path) -> serde_json::Value {
    fs::read_to_string(config_dir.join(CONFIG_FILE))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_else(|| serde_json::json!({}))
}

/// 读取某一段配置
pub fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    read_config(config_dir)
        .get(key)
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
}

/// 写入某一段配置，保留其余段
pub fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;

    let mut config = read_config(config_dir);
    if !config.is_object() {
        config = serde_json::json!({});
    }
    config[key] = serde_json::to_value(value).map_err(io::Error::other)?;

    let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
    fs::write(config_dir.join(CONFIG_FILE), content)
}
