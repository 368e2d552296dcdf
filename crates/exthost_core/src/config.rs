//! Host configuration loaded from TOML.
//!
//! # Responsibility
//! - Read `[extensions]` and `[logging]` settings with every field defaulted.
//! - Resolve relative search paths against the config file's directory.
//!
//! # Invariants
//! - An empty file yields `HostConfig::default()`.
//! - Disabled extension names are validated in id form at load time.

use crate::extension::descriptor::is_valid_extension_name;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Environment variable overriding `[logging] level`.
pub const LOG_LEVEL_ENV: &str = "EXTHOST_LOG_LEVEL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub extensions: ExtensionsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directories scanned for extension subdirectories, in order.
    pub search_paths: Vec<PathBuf>,
    /// Extension names switched off for every session.
    pub disabled: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; build-mode default when unset.
    pub level: Option<String>,
    /// Absolute directory for rotated log files; stderr when unset.
    pub dir: Option<PathBuf>,
}

impl HostConfig {
    /// Reads and parses a config file.
    ///
    /// # Errors
    /// - `Read` when the file cannot be read (including when it is missing).
    /// - `Parse` / `InvalidDisabledName` for bad content.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&text, base_dir)
    }

    /// Parses config text; relative search paths are joined onto `base_dir`.
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(ConfigError::Parse)?;

        for name in &config.extensions.disabled {
            if !is_valid_extension_name(name) {
                return Err(ConfigError::InvalidDisabledName(name.clone()));
            }
        }
        for path in &mut config.extensions.search_paths {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
        Ok(config)
    }

    /// Applies environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|level| !level.trim().is_empty()) {
            self.logging.level = Some(level);
        }
    }

    pub fn is_disabled(&self, extension: &str) -> bool {
        self.extensions.disabled.contains(extension)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    InvalidDisabledName(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::InvalidDisabledName(name) => {
                write!(f, "disabled extension name is invalid: `{name}`")
            }
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidDisabledName(_) => None,
        }
    }
}
