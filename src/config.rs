use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// tuning knobs for the object engine, persisted as config.toml
/// in the store directory
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delta: DeltaConfig,
    pub pack: PackConfig,
    pub status: StatusConfig,
}

/// delta construction and resolution policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// block size for the rolling-hash index
    pub block_size: usize,
    /// reject a delta when deltaSize/targetSize reaches this ratio
    pub max_ratio: f64,
    /// never deltify targets smaller than this
    pub min_size: usize,
    /// maximum delta chain depth during resolution
    pub max_chain_depth: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    /// sliding window of recent objects considered as delta bases
    pub window: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub detect_renames: bool,
    /// similarity percentage; only 100 (exact match) is scored
    pub rename_threshold: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delta: DeltaConfig::default(),
            pack: PackConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            block_size: 16,
            max_ratio: 0.75,
            min_size: 50,
            max_chain_depth: 10,
        }
    }
}

impl Default for PackConfig {
    fn default() -> Self {
        Self { window: 10 }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            detect_renames: true,
            rename_threshold: 100,
        }
    }
}

impl Config {
    /// load config from a toml file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_path(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// save config to a toml file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_path(path)?;
        Ok(())
    }
}
