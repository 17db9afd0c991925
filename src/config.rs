//! Server configuration: defaults, TOML config file, CLI overrides.
//!
//! Resolution order is CLI > config file > defaults. The config file is
//! either passed explicitly or found as `server.toml` under the directory
//! named by `XFRASE_CONFIG_DIR`. `--make-config` writes the resolved
//! configuration back out as TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable naming the directory searched for a default
/// config file
pub const CONFIG_DIR_ENV: &str = "XFRASE_CONFIG_DIR";

/// Filename looked up under [`CONFIG_DIR_ENV`]
pub const DEFAULT_CONFIG_FILENAME: &str = "server.toml";

pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_RESIDENT: usize = 32;
pub const DEFAULT_THREADS: usize = 1;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_DEADLINE_SECS: u64 = 3;

/// Partial configuration: what a config file (or the CLI) may provide.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PartialServerConfig {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub methylome_dir: Option<PathBuf>,
    pub index_dir: Option<PathBuf>,
    pub max_resident: Option<usize>,
    pub threads: Option<usize>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub deadline_secs: Option<u64>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub methylome_dir: PathBuf,
    pub index_dir: PathBuf,
    pub max_resident: usize,
    pub threads: usize,
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub deadline_secs: u64,
}

impl ServerConfig {
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Writes the resolved configuration as TOML; the output re-parses as
    /// a [`PartialServerConfig`].
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|err| {
            ConfigError::Parse(path.as_ref().display().to_string(), err.to_string())
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Loads the config file: the explicit path if given, otherwise
/// `$XFRASE_CONFIG_DIR/server.toml` when that exists, otherwise nothing.
pub fn load_config_file(explicit: Option<&Path>) -> Result<PartialServerConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => std::env::var(CONFIG_DIR_ENV)
            .ok()
            .map(|dir| Path::new(&dir).join(DEFAULT_CONFIG_FILENAME))
            .filter(|path| path.exists()),
    };
    let Some(path) = path else {
        return Ok(PartialServerConfig::default());
    };
    let text = std::fs::read_to_string(&path)?;
    toml::from_str(&text)
        .map_err(|err| ConfigError::Parse(path.display().to_string(), err.to_string()).into())
}

/// Resolves the final configuration, preferring CLI values over config
/// file values over defaults. The data directories have no default and
/// must come from one of the two sources.
pub fn resolve(cli: PartialServerConfig, file: PartialServerConfig) -> Result<ServerConfig> {
    let methylome_dir = cli
        .methylome_dir
        .or(file.methylome_dir)
        .ok_or(ConfigError::MissingOption("methylome-dir"))?;
    let index_dir = cli
        .index_dir
        .or(file.index_dir)
        .ok_or(ConfigError::MissingOption("index-dir"))?;
    Ok(ServerConfig {
        hostname: cli
            .hostname
            .or(file.hostname)
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
        port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
        methylome_dir,
        index_dir,
        max_resident: cli
            .max_resident
            .or(file.max_resident)
            .unwrap_or(DEFAULT_MAX_RESIDENT),
        threads: cli.threads.or(file.threads).unwrap_or(DEFAULT_THREADS),
        log_level: cli
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        log_file: cli.log_file.or(file.log_file),
        deadline_secs: cli
            .deadline_secs
            .or(file.deadline_secs)
            .unwrap_or(DEFAULT_DEADLINE_SECS),
    })
}
