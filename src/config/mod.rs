//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a YAML file, then
//! the `--mode` flag / `XCPROBE_MODE` variable applied by the binary.
//!
//! ```yaml
//! mode: full
//! tools:
//!   xcrun: /usr/bin/xcrun
//!   idb: /opt/homebrew/bin/idb
//! limits:
//!   default_timeout_secs: 90
//!   max_output_bytes: 8388608
//! timeouts:
//!   build_project: 3600
//! profiles:
//!   minimal: [build_project, record_trace, find_text, tap]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capabilities::ProfileId;
use crate::execution::MAX_TIMEOUT;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Paths of the external programs the catalog invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub xcrun: String,
    pub xcodebuild: String,
    pub nm: String,
    pub idb: String,
    /// Text-recognition probe emitting one JSON object per line.
    pub ocr: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            xcrun: "xcrun".into(),
            xcodebuild: "xcodebuild".into(),
            nm: "nm".into(),
            idb: "idb".into(),
            ocr: "xcprobe-ocr".into(),
        }
    }
}

/// Resource bounds applied to every execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub default_timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Capture cap for capabilities returning images.
    pub image_max_output_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            max_output_bytes: 4 * 1024 * 1024,
            image_max_output_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Profile curation overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverrides {
    /// Replaces the built-in "minimal" membership when set.
    pub minimal: Option<Vec<String>>,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub mode: ProfileId,
    pub tools: ToolPaths,
    pub limits: Limits,
    /// Per-capability deadline overrides, in seconds.
    pub timeouts: BTreeMap<String, u64>,
    pub profiles: ProfileOverrides,
}

impl ServerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Defaults, or the file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn with_mode(mut self, mode: ProfileId) -> Self {
        self.mode = mode;
        self
    }

    /// Reject zero capture caps and deadlines outside `1..=MAX_TIMEOUT`.
    /// Names in `timeouts` are checked against the catalog when the registry
    /// is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout("limits.default_timeout_secs", self.limits.default_timeout_secs)?;
        if self.limits.max_output_bytes == 0 || self.limits.image_max_output_bytes == 0 {
            return Err(ConfigError::Invalid("output limits must be positive".into()));
        }
        for (name, secs) in &self.timeouts {
            check_timeout(&format!("timeouts.{}", name), *secs)?;
        }
        Ok(())
    }

    /// Deadline for `capability`: explicit override, else `builtin`, else the
    /// global default.
    pub fn timeout_for(&self, capability: &str, builtin: Option<Duration>) -> Duration {
        self.timeouts
            .get(capability)
            .map(|secs| Duration::from_secs(*secs))
            .or(builtin)
            .unwrap_or_else(|| Duration::from_secs(self.limits.default_timeout_secs))
    }
}

fn check_timeout(key: &str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 || secs > MAX_TIMEOUT.as_secs() {
        return Err(ConfigError::Invalid(format!(
            "{} must be between 1 and {} seconds",
            key,
            MAX_TIMEOUT.as_secs()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.mode, ProfileId::Minimal);
        assert_eq!(config.tools.xcrun, "xcrun");
        assert_eq!(config.limits.default_timeout_secs, 60);
        assert!(config.profiles.minimal.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let config = ServerConfig::from_yaml_str(
            r#"
mode: full
tools:
  idb: /opt/homebrew/bin/idb
timeouts:
  build_project: 3600
profiles:
  minimal: [tap]
"#,
        )
        .unwrap();
        assert_eq!(config.mode, ProfileId::Full);
        assert_eq!(config.tools.idb, "/opt/homebrew/bin/idb");
        assert_eq!(config.tools.xcodebuild, "xcodebuild");
        assert_eq!(config.profiles.minimal, Some(vec!["tap".to_string()]));
        assert_eq!(
            config.timeout_for("build_project", Some(Duration::from_secs(10))),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_timeout_precedence() {
        let config = ServerConfig::default();
        assert_eq!(config.timeout_for("tap", None), Duration::from_secs(60));
        assert_eq!(
            config.timeout_for("tap", Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_rejects_zero_and_unknown_fields() {
        assert!(ServerConfig::from_yaml_str("limits:\n  default_timeout_secs: 0\n").is_err());
        assert!(ServerConfig::from_yaml_str("timeouts:\n  tap: 0\n").is_err());
        assert!(ServerConfig::from_yaml_str("timeouts:\n  tap: 18446744073709551615\n").is_err());
        assert!(ServerConfig::from_yaml_str("limits:\n  default_timeout_secs: 86401\n").is_err());
        assert!(ServerConfig::from_yaml_str("timeouts:\n  tap: 86400\n").is_ok());
        assert!(ServerConfig::from_yaml_str("colour: blue\n").is_err());
        assert!(ServerConfig::from_yaml_str("mode: everything\n").is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(ServerConfig::from_yaml_str("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mode: full").unwrap();
        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.mode, ProfileId::Full);

        let missing = ServerConfig::load(Some(Path::new("/no/such/xcprobe.yaml")));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
