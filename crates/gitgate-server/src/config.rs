//! Server configuration types.
//!
//! Configuration is read from a YAML file. Every field has a default, so an
//! empty (or missing) file yields a working server rooted at
//! `./repositories`. Command line flags are applied on top by `main`.

use crate::observability::LogFormat;
use crate::pages::PageStyle;
use gitgate_git::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for [`Config`].
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for the gitgate server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address.
    pub listen: SocketAddr,
    /// Directory the repositories live under.
    pub content_root: PathBuf,
    /// Create missing repositories on first push.
    pub auto_create: bool,
    /// git invocation settings.
    pub git: GitConfig,
    /// Size of the chunks streamed to and from git and static files.
    pub block_size: usize,
    /// How error responses are rendered.
    pub error_pages: PageStyle,
    /// Optional static file mount.
    pub static_files: Option<StaticFilesConfig>,
    /// Logging settings.
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            content_root: PathBuf::from("./repositories"),
            auto_create: true,
            git: GitConfig::default(),
            block_size: DEFAULT_CHUNK_SIZE,
            error_pages: PageStyle::default(),
            static_files: None,
            log: LogConfig::default(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// git invocation settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// Path or name of the git executable.
    pub executable: PathBuf,
    /// Run `git update-server-info` after every successful push.
    pub update_server_info: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("git"),
            update_server_info: true,
        }
    }
}

/// A directory served as plain files under a URL prefix.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StaticFilesConfig {
    /// URL prefix, e.g. `/static`.
    pub mount: String,
    /// Directory the files are read from.
    pub root: PathBuf,
}

impl StaticFilesConfig {
    /// The mount as it is routed, without trailing slashes.
    pub fn prefix(&self) -> &str {
        self.mount.trim_end_matches('/')
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Level for the gitgate crates (trace, debug, info, warn, error).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Parses configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to a mapping.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Checks values serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be positive".into()));
        }
        if self.git.executable.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("git.executable is empty".into()));
        }
        if let Some(static_files) = &self.static_files {
            let mount = static_files.mount.as_str();
            let prefix = static_files.prefix();
            // An empty prefix would claim every path, repositories included.
            if !prefix.starts_with('/') || prefix.contains("//") {
                return Err(ConfigError::Invalid(format!(
                    "static_files.mount must be an absolute URL prefix, got {mount:?}"
                )));
            }
            if mount.contains("{") || mount.contains("}") {
                return Err(ConfigError::Invalid(format!(
                    "static_files.mount may not contain braces, got {mount:?}"
                )));
            }
        }
        Ok(())
    }
}
