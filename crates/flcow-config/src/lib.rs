//! # flcow-config
//!
//! Configuration management for fl-cow.
//!
//! The interposition layer itself only ever consults two environment
//! variables, `FLCOW_PATH` and `HOME`, and re-reads them on every call. The
//! `flcow` launcher loads a richer [`Config`] from:
//! 1. `~/.flcow/config.toml` (global)
//! 2. `.flcow/config.toml` (project-local, overrides global)
//! 3. `$FLCOW_CONFIG` (explicit file, overrides both)
//! 4. Environment variables (highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod logging;
pub mod path;
pub mod policy;

pub use logging::{init_logging, LogLevel};
pub use path::{normalize, normalize_in, normalize_with, MAX_POLICY_PATH};
pub use policy::{in_policy, PolicyList};

/// Colon-separated list of absolute prefixes opted into copy-on-write.
pub const POLICY_ENV: &str = "FLCOW_PATH";
/// Used for `~/` expansion only.
pub const HOME_ENV: &str = "HOME";
/// Tracing filter directive (`debug`, `flcow=trace`, ...).
pub const LOG_ENV: &str = "FLCOW_LOG";
/// Explicit location of `libflcow_layer.so`.
pub const LAYER_ENV: &str = "FLCOW_LAYER";
/// Explicit config file.
pub const CONFIG_ENV: &str = "FLCOW_CONFIG";

/// File name of the preloadable layer.
pub const LAYER_LIBRARY_NAME: &str = "libflcow_layer.so";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub layer: LayerConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.flcow/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from(&global_path)?;
            }
        }

        // 2. Project config (.flcow/config.toml)
        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            config.merge(Self::load_from(&project_path)?);
        }

        // 3. Explicit file
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            let explicit = PathBuf::from(explicit);
            debug!("Loading explicit config from {:?}", explicit);
            config.merge(Self::load_from(&explicit)?);
        }

        // 4. Environment
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a single TOML file without merging or env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Global config path: ~/.flcow/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".flcow/config.toml"))
    }

    /// Project config path: .flcow/config.toml under the working directory
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".flcow/config.toml")
    }

    /// Merge another config on top of this one.
    ///
    /// Policy prefixes accumulate; scalar settings are replaced when the
    /// overriding file sets them.
    pub fn merge(&mut self, other: Config) {
        for p in other.policy.paths {
            if !self.policy.paths.contains(&p) {
                self.policy.paths.push(p);
            }
        }
        if other.layer.library.is_some() {
            self.layer.library = other.layer.library;
        }
        if other.log.level != LogLevel::default() {
            self.log.level = other.log.level;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Some(raw) = std::env::var_os(POLICY_ENV) {
            let mut merged = self.policy_list();
            merged.extend(&PolicyList::parse(&raw));
            self.policy.paths = merged.prefixes().to_vec();
        }
        if let Some(lib) = std::env::var_os(LAYER_ENV) {
            self.layer.library = Some(PathBuf::from(lib));
        }
        if let Ok(level) = std::env::var(LOG_ENV) {
            if let Ok(level) = level.parse() {
                self.log.level = level;
            }
        }
    }

    /// Configured prefixes as a policy list (order preserved, duplicates
    /// dropped).
    pub fn policy_list(&self) -> PolicyList {
        let mut list = PolicyList::default();
        for p in &self.policy.paths {
            list.push(p.clone());
        }
        list
    }

    /// Generate config TOML string
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }
}

/// Which paths the launcher opts into copy-on-write
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Absolute path prefixes exported as `FLCOW_PATH`
    pub paths: Vec<PathBuf>,
}

/// Where to find the preload library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Path to `libflcow_layer.so` (None = search next to the executable)
    pub library: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_disabled() {
        let config = Config::default();
        assert!(config.policy.paths.is_empty());
        assert!(config.policy_list().is_empty());
        assert!(config.layer.library.is_none());
        assert_eq!(config.log.level, LogLevel::Warn);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[policy]"));
        assert!(toml_str.contains("[log]"));
        assert!(toml_str.contains("level = \"warn\""));
    }

    #[test]
    fn test_merge_accumulates_paths() {
        let mut base: Config = toml::from_str(
            r#"
[policy]
paths = ["/srv/a", "/srv/b"]
"#,
        )
        .unwrap();
        let over: Config = toml::from_str(
            r#"
[policy]
paths = ["/srv/b", "/srv/c"]

[layer]
library = "/opt/flcow/libflcow_layer.so"

[log]
level = "debug"
"#,
        )
        .unwrap();
        base.merge(over);
        assert_eq!(
            base.policy_list().to_env_value(),
            std::ffi::OsString::from("/srv/a:/srv/b:/srv/c")
        );
        assert_eq!(
            base.layer.library,
            Some(PathBuf::from("/opt/flcow/libflcow_layer.so"))
        );
        assert_eq!(base.log.level, LogLevel::Debug);
    }

    #[test]
    fn test_merge_keeps_scalars_when_unset() {
        let mut base = Config::default();
        base.layer.library = Some(PathBuf::from("/lib/x.so"));
        base.log.level = LogLevel::Info;
        base.merge(Config::default());
        assert_eq!(base.layer.library, Some(PathBuf::from("/lib/x.so")));
        assert_eq!(base.log.level, LogLevel::Info);
    }
}
