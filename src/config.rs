//! Optional configuration file.
//!
//! Values here are defaults; command line flags always win.
//!
//! ```toml
//! concurrent = 32
//! retries = 2
//! region = "eu-west-1"
//! endpoint = "http://localhost:9000"
//! page_size = 1000
//! log_level = "info"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Concurrent transfers; zero or negative means unbounded.
    pub concurrent: Option<i64>,
    /// Extra attempts after a failed transfer.
    pub retries: Option<u32>,
    pub region: Option<String>,
    /// S3-compatible endpoint URL.
    pub endpoint: Option<String>,
    pub page_size: Option<usize>,
    pub log_level: Option<String>,
}

impl FileConfig {
    /// `<config dir>/bucketsync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bucketsync").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load an explicitly named file, or the default one if it exists.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }
}
