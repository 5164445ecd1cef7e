//! Host configuration.
//!
//! A host describes its plugins, capability areas and static flags in one
//! TOML file. Environment variables override a few settings at startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::areas::{BackendCapabilities, CapabilityArea, ResolverOptions};
use crate::error::ConfigError;
use crate::flags::FeatureFlagVector;
use crate::loader::{RemoteDescriptor, SharedScope};

/// Default values.
pub mod defaults {
    /// Config file looked up when none is given.
    pub const CONFIG_FILE: &str = "plugport.toml";
    /// Timeout for one bundle fetch.
    pub const FETCH_TIMEOUT_SECS: u64 = 10;
    /// Log filter used when `RUST_LOG` is unset.
    pub const LOG_FILTER: &str = "plugport=info,plugport_core=info";
    /// Log filter for `--verbose`.
    pub const VERBOSE_LOG_FILTER: &str = "plugport=debug,plugport_core=debug";
}

/// Environment variable names.
pub mod env_vars {
    use std::path::PathBuf;

    use super::defaults;

    pub const CONFIG: &str = "PLUGPORT_CONFIG";
    pub const PRODUCTION: &str = "PLUGPORT_PRODUCTION";
    pub const LOG_JSON: &str = "PLUGPORT_LOG_JSON";

    /// Config path from the environment, or the default file name.
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::CONFIG_FILE))
    }

    /// `None` when unset or not a boolean.
    pub fn production() -> Option<bool> {
        std::env::var(PRODUCTION).ok().and_then(|s| parse_bool(&s))
    }

    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|s| parse_bool(&s))
            .unwrap_or(false)
    }

    pub(super) fn parse_bool(raw: &str) -> Option<bool> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> u64 {
    defaults::FETCH_TIMEOUT_SECS
}

/// One plugin the host loads at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub descriptor: RemoteDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Production hosts ignore dev flags.
    #[serde(default = "default_true")]
    pub production: bool,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Root for relative bundle locations.
    #[serde(default)]
    pub bundles_dir: Option<PathBuf>,

    /// JSON file mapping backend component ids to booleans.
    #[serde(default)]
    pub capabilities: Option<PathBuf>,

    /// Libraries the host shares with bundles.
    #[serde(default)]
    pub shared: SharedScope,

    #[serde(default)]
    pub dev_flags: FeatureFlagVector,

    /// Flags consulted by capability areas.
    #[serde(default)]
    pub feature_flags: FeatureFlagVector,

    /// Opaque flags pushed straight into the store, such as `ADMIN_USER`.
    #[serde(default)]
    pub flags: FeatureFlagVector,

    #[serde(default)]
    pub areas: Vec<CapabilityArea>,

    #[serde(default)]
    pub plugins: Vec<PluginConfig>,

    /// Directory of the loaded file; relative paths resolve against it.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            production: true,
            fetch_timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            bundles_dir: None,
            capabilities: None,
            shared: SharedScope::new(),
            dev_flags: FeatureFlagVector::new(),
            feature_flags: FeatureFlagVector::new(),
            flags: FeatureFlagVector::new(),
            areas: Vec::new(),
            plugins: Vec::new(),
            base_dir: None,
        }
    }
}

impl HostConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        tracing::debug!(path = %path.display(), plugins = config.plugins.len(), areas = config.areas.len(), "Loaded host config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for plugin in &self.plugins {
            if plugin.id.trim().is_empty() {
                return Err(ConfigError::Invalid("plugin id must not be empty".into()));
            }
            if !seen.insert(plugin.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate plugin id {}", plugin.id)));
            }
            if plugin.descriptor.location.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "plugin {} has no location",
                    plugin.id
                )));
            }
        }

        let mut areas = HashSet::new();
        for area in &self.areas {
            if area.id.trim().is_empty() {
                return Err(ConfigError::Invalid("area id must not be empty".into()));
            }
            if !areas.insert(area.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate area id {}", area.id)));
            }
        }

        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Apply `PLUGPORT_PRODUCTION`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(production) = env_vars::production() {
            self.production = production;
        }
    }

    pub fn resolver_options(&self) -> ResolverOptions {
        ResolverOptions {
            production: self.production,
            dev_flags: self.dev_flags.clone(),
            feature_flags: self.feature_flags.clone(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Resolve a path against the config file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Root used for relative file bundle locations.
    pub fn bundles_root(&self) -> Option<PathBuf> {
        match &self.bundles_dir {
            Some(dir) => Some(self.resolve_path(dir)),
            None => self.base_dir.clone(),
        }
    }

    /// Read the configured capabilities file, or nothing when none is set.
    pub fn load_capabilities(&self) -> Result<BackendCapabilities, ConfigError> {
        match &self.capabilities {
            Some(path) => read_capabilities(&self.resolve_path(path)),
            None => Ok(BackendCapabilities::new()),
        }
    }

    /// Enabled plugins as loader input.
    pub fn plugin_entries(&self) -> Vec<(String, RemoteDescriptor)> {
        self.plugins
            .iter()
            .filter(|p| p.enabled)
            .map(|p| (p.id.clone(), p.descriptor.clone()))
            .collect()
    }
}

/// Read a JSON capabilities file: `{ "component": true, ... }`.
pub fn read_capabilities(path: &Path) -> Result<BackendCapabilities, ConfigError> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}
