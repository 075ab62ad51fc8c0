//! User configuration: where the store and keyfile live.

use anyhow::{Context, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::storage::Storage;

pub const STORE_FILE_NAME: &str = "nestsh-storage.json";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile_path: Option<PathBuf>,
}

impl Config {
    /// Loads the config at `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let storage = Storage::new(path.to_path_buf());
        if !storage.exists() {
            return Ok(Self::default());
        }

        let data = storage
            .load()
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: Config = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;

        Ok(Self {
            storage_path: cfg.storage_path.map(|p| expand_tilde(&p)),
            keyfile_path: cfg.keyfile_path.map(|p| expand_tilde(&p)),
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        Storage::new(path.to_path_buf())
            .save(&data)
            .with_context(|| format!("failed to write config {}", path.display()))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "nestsh").context("could not determine platform directories")
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}

pub fn default_store_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Expands a leading `~/` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
