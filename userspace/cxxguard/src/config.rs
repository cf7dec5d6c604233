// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Guard configuration: built-in defaults, an optional TOML file, then
//! environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::GuardError;
use crate::{TARGET_LIBRARY, VERSION_NAMESPACE};

/// Shipped library file, or the directory holding it.
pub const SHIPPED_ENV: &str = "CXXGUARD_SHIPPED";
/// Path of a TOML configuration file.
pub const CONFIG_ENV: &str = "CXXGUARD_CONFIG";
/// Overrides the isolated probe program.
pub const PROBE_ENV: &str = "CXXGUARD_PROBE";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    pub target: String,
    pub version_prefix: String,
    pub shipped: Option<PathBuf>,
    pub lister: PathBuf,
    pub probe_program: PathBuf,
    pub probe_args: Vec<String>,
    pub probe_timeout_ms: u64,
    pub probe_strip_env: Vec<String>,
    pub max_dependency_depth: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            target: TARGET_LIBRARY.to_string(),
            version_prefix: VERSION_NAMESPACE.to_string(),
            shipped: None,
            lister: PathBuf::from("ldd"),
            probe_program: PathBuf::from("cxxguard"),
            probe_args: vec!["probe".to_string()],
            probe_timeout_ms: 10_000,
            probe_strip_env: vec![SHIPPED_ENV.to_string(), CONFIG_ENV.to_string()],
            max_dependency_depth: 4,
        }
    }
}

impl GuardConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, GuardError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, GuardError> {
        let text = fs::read_to_string(path).map_err(|source| GuardError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!("loaded guard configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, then `CXXGUARD_CONFIG`, then the individual variables.
    pub fn from_env() -> Result<Self, GuardError> {
        let mut config = match env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path))?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|name| env::var_os(name).filter(|value| !value.is_empty()).map(PathBuf::from));
        Ok(config)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<PathBuf>) {
        if let Some(shipped) = lookup(SHIPPED_ENV) {
            self.shipped = Some(shipped);
        }
        if let Some(program) = lookup(PROBE_ENV) {
            self.probe_program = program;
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_target_libstdcxx() {
        let config = GuardConfig::default();
        assert_eq!(config.target, "libstdc++.so.6");
        assert_eq!(config.version_prefix, "GLIBCXX_");
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_dependency_depth, 4);
        assert!(config.probe_strip_env.iter().any(|var| var == SHIPPED_ENV));
        assert!(config.shipped.is_none());
    }

    #[test]
    fn toml_overrides_only_named_keys() {
        let config = GuardConfig::from_toml_str(
            r#"
                shipped = "/opt/app/lib"
                probe_timeout_ms = 250
                probe_args = []
            "#,
        )
        .unwrap();
        assert_eq!(config.shipped.as_deref(), Some(Path::new("/opt/app/lib")));
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
        assert!(config.probe_args.is_empty());
        assert_eq!(config.lister, Path::new("ldd"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = GuardConfig::from_toml_str("shiped = \"/opt\"").unwrap_err();
        assert!(matches!(err, GuardError::Config(_)), "{err}");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "target = \"libfoo.so.1\"\nversion_prefix = \"FOO_\"").unwrap();
        let config = GuardConfig::load(file.path()).unwrap();
        assert_eq!(config.target, "libfoo.so.1");
        assert_eq!(config.version_prefix, "FOO_");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = GuardConfig::load(Path::new("/nonexistent/cxxguard.toml")).unwrap_err();
        assert!(matches!(err, GuardError::Io { .. }));
    }

    #[test]
    fn environment_overrides_shipped_and_probe() {
        let vars: HashMap<&str, PathBuf> = [
            (SHIPPED_ENV, PathBuf::from("/opt/app/lib/libstdc++.so.6")),
            (PROBE_ENV, PathBuf::from("/opt/app/bin/cxxguard")),
        ]
        .into_iter()
        .collect();
        let mut config = GuardConfig::default();
        config.apply_env_overrides(|name| vars.get(name).cloned());
        assert_eq!(config.shipped.as_deref(), Some(Path::new("/opt/app/lib/libstdc++.so.6")));
        assert_eq!(config.probe_program, Path::new("/opt/app/bin/cxxguard"));
    }

    #[test]
    fn absent_environment_keeps_configured_values() {
        let mut config = GuardConfig::from_toml_str("shipped = \"/opt/app/lib\"").unwrap();
        config.apply_env_overrides(|_| None);
        assert_eq!(config.shipped.as_deref(), Some(Path::new("/opt/app/lib")));
        assert_eq!(config.probe_program, Path::new("cxxguard"));
    }
}
