use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::templates::DEFAULT_MAX_UPLOAD_BYTES;

pub const CONFIG_FILENAME: &str = "docstencil.toml";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub limits: LimitsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StorageSection {
    /// Root directory for stored template and output blobs.
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    #[serde(default)]
    pub schema_path: Option<PathBuf>,
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LimitsSection {
    #[serde(default)]
    pub max_upload_bytes: Option<u64>,
}

impl AppConfig {
    pub fn blob_dir(&self) -> PathBuf {
        self.storage
            .blob_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/blobs"))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.storage
            .registry_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/registry.json"))
    }

    pub fn schema_path(&self) -> Option<PathBuf> {
        self.storage.schema_path.clone()
    }

    pub fn history_path(&self) -> PathBuf {
        self.storage
            .history_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/templates.json"))
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.limits.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
    }
}

fn find_file_upwards(start: &Path, filename: &str, max_depth: usize) -> Option<PathBuf> {
    let mut dir = Some(start);
    for _ in 0..max_depth {
        let d = dir?;
        let cand = d.join(filename);
        if cand.is_file() {
            return Some(cand);
        }
        dir = d.parent();
    }
    None
}

/// Search for `docstencil.toml` near the working directory and the binary.
pub fn find_default_config() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, CONFIG_FILENAME, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, CONFIG_FILENAME, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}
