//! Configuration file handling
//!
//! The config file is a TOML document under the platform config directory
//! holding the alias map (name -> base URL) and per-host credentials. The
//! loaded `Config` value is passed explicitly through resolver and factory
//! calls; there is no process-global configuration cache.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONFIG_DIR: &str = "dm";
const CONFIG_FILE: &str = "config.toml";
const SESSION_DIR: &str = "sessions";

/// Credentials and connection options for one object-store host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Use path-style bucket addressing (required by most non-AWS stores).
    #[serde(default = "default_true")]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_true() -> bool {
    true
}

/// Loaded configuration: aliases plus host credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
}

impl Config {
    /// Look up credentials for a `host[:port]` string.
    pub fn host_config(&self, host: &str) -> Result<&HostConfig> {
        self.hosts
            .get(host)
            .ok_or_else(|| Error::NoMatchingHost(host.to_string()))
    }
}

/// Reads and writes the config file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Config store rooted at the platform config directory.
    pub fn new() -> Result<Self> {
        let base = dirs::config_dir()
            .ok_or_else(|| Error::Config("unable to determine config directory".to_string()))?;
        Ok(Self {
            dir: base.join(CONFIG_DIR),
        })
    }

    /// Config store rooted at an explicit directory (tests, overrides).
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Directory holding session header and data files.
    pub fn session_dir(&self) -> PathBuf {
        self.dir.join(SESSION_DIR)
    }

    /// Load the config file, or an empty config if none exists yet.
    pub fn load(&self) -> Result<Config> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = fs::read_to_string(&path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Persist the config with a temp-file write and atomic rename.
    pub fn save(&self, config: &Config) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let raw = toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
        let path = self.config_path();
        write_atomic(&path, raw.as_bytes())
    }
}

/// Write to `path` via a sibling temp file and rename over the target.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
