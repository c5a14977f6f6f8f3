//! Store configuration.
//!
//! Every deployment generation of the app writes its collections under its
//! own keys; older generations' keys stay listed so their data can be
//! imported once.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub const RECORDS_FILE: &str = "records.db";
pub const BLOBS_FILE: &str = "blobs.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding both database files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Key of the current item collection.
    #[serde(default = "default_items_key")]
    pub items_key: String,
    /// Key of the location hierarchy.
    #[serde(default = "default_places_key")]
    pub places_key: String,
    /// Older item collection keys, highest priority first.
    #[serde(default = "default_legacy_item_keys")]
    pub legacy_item_keys: Vec<String>,
    /// Largest accepted attachment or photo payload, in bytes.
    #[serde(default)]
    pub max_blob_bytes: Option<usize>,
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "GarageMate", "garagemate")
        .map(|proj| proj.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".garagemate"))
}

fn default_items_key() -> String {
    "garagemate_items_v4".to_string()
}

fn default_places_key() -> String {
    "garagemate_places_v4".to_string()
}

fn default_legacy_item_keys() -> Vec<String> {
    [
        "garagemate_items_v3",
        "garagemate_items_v22",
        "garagemate_items_v21t",
        "garagemate_items_v21b",
        "garagemate_items_v1",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            items_key: default_items_key(),
            places_key: default_places_key(),
            legacy_item_keys: default_legacy_item_keys(),
            max_blob_bytes: None,
        }
    }
}

impl StoreConfig {
    /// Default keys, rooted at `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> StoreResult<Self> {
        let config: StoreConfig =
            toml::from_str(contents).map_err(|err| StoreError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))
            .map_err(|err| StoreError::Config(format!("{err:#}")))?;

        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), data_dir = %config.data_dir.display(), "loaded store config");
        Ok(config)
    }

    pub fn records_path(&self) -> PathBuf {
        self.data_dir.join(RECORDS_FILE)
    }

    pub fn blobs_path(&self) -> PathBuf {
        self.data_dir.join(BLOBS_FILE)
    }

    fn validate(&self) -> StoreResult<()> {
        if self.items_key.trim().is_empty() || self.places_key.trim().is_empty() {
            return Err(StoreError::Config(
                "items_key and places_key must not be empty".to_string(),
            ));
        }
        if self.items_key == self.places_key {
            return Err(StoreError::Config(
                "items_key and places_key must differ".to_string(),
            ));
        }
        if self.legacy_item_keys.iter().any(|key| key == &self.items_key) {
            return Err(StoreError::Config(format!(
                "legacy keys must not include the current items key '{}'",
                self.items_key
            )));
        }
        Ok(())
    }
}
