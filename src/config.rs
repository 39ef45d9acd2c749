//! vroot configuration
//!
//! An optional TOML file, by default `/etc/vroot.toml`:
//!
//! ```toml
//! [tools]
//! avbtool = "/usr/bin/avbtool"
//!
//! [footer]
//! partition_name = "root"
//! hash_algorithm = "blake2b-256"
//! ```
//!
//! Every key is optional and falls back to the defaults below.

use crate::dm::DEFAULT_ROOT_PARAM;
use crate::error::{Error, Result};
use crate::sizing::DEFAULT_MAX_GROWTH_FACTOR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/vroot.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub cmdline: CmdlineConfig,
    pub footer: FooterConfig,
    pub sizing: SizingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub avbtool: PathBuf,
    /// Used to read the partition UUID of an image
    pub file: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            avbtool: PathBuf::from("avbtool"),
            file: PathBuf::from("file"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CmdlineConfig {
    pub root_param: String,
}

impl Default for CmdlineConfig {
    fn default() -> Self {
        Self {
            root_param: DEFAULT_ROOT_PARAM.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FooterConfig {
    pub partition_name: String,
    pub hash_algorithm: String,
}

impl Default for FooterConfig {
    fn default() -> Self {
        Self {
            partition_name: "root".to_owned(),
            hash_algorithm: "blake2b-256".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SizingConfig {
    pub max_growth_factor: u64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_growth_factor: DEFAULT_MAX_GROWTH_FACTOR,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_error = |reason: String| Error::Config {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        toml::from_str(&content).map_err(|e| config_error(e.to_string()))
    }

    /// Loads `path` if given, otherwise the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load_from_file(default)
                } else {
                    tracing::trace!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }
}
