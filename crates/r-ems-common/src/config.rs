//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

/// Configuration for the flow-control primitives of a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limiters: IndexMap<String, LimiterConfig>,
}

/// Metadata describing where a [`FlowConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedFlowConfig {
    pub config: FlowConfig,
    pub source: PathBuf,
}

impl FlowConfig {
    pub const ENV_CONFIG_PATH: &str = "R_EMS_FLOW_CONFIG";

    /// Load configuration from disk, respecting the `R_EMS_FLOW_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedFlowConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedFlowConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedFlowConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading flow configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<FlowConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Retrieve a limiter entry by name.
    pub fn limiter(&self, name: &str) -> Option<&LimiterConfig> {
        self.limiters.get(name)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        for (name, limiter) in &self.limiters {
            limiter.validate(name)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for FlowConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: FlowConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// The two call-rate limiters.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LimiterKind {
    /// Runs once after a quiet period, with the latest call.
    Debounce,
    /// Runs at most once per window, with the call that opened it.
    Throttle,
}

impl LimiterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterKind::Debounce => "debounce",
            LimiterKind::Throttle => "throttle",
        }
    }
}

impl fmt::Display for LimiterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LimiterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debounce" => Ok(LimiterKind::Debounce),
            "throttle" => Ok(LimiterKind::Throttle),
            other => Err(format!("unknown limiter kind: {}", other)),
        }
    }
}

/// A named debounce or throttle entry.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LimiterConfig {
    pub kind: LimiterKind,
    /// Quiet period for debounce, window length for throttle.
    #[serde(rename = "period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub period: Duration,
    /// Throttle only: run the last call seen while the window was closed.
    #[serde(default)]
    pub trailing: bool,
}

impl LimiterConfig {
    pub fn debounce(period: Duration) -> Self {
        Self {
            kind: LimiterKind::Debounce,
            period,
            trailing: false,
        }
    }

    pub fn throttle(period: Duration, trailing: bool) -> Self {
        Self {
            kind: LimiterKind::Throttle,
            period,
            trailing,
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.period.is_zero() {
            return Err(anyhow!(
                "limiter '{}' must declare a period_ms greater than zero",
                name
            ));
        }
        if self.trailing && self.kind == LimiterKind::Debounce {
            return Err(anyhow!(
                "limiter '{}' is a debounce; trailing only applies to throttles",
                name
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [logging]
        directory = "target/test-logs"
        format = "pretty"

        [limiters.search]
        kind = "debounce"
        period_ms = 300

        [limiters.scroll]
        kind = "throttle"
        period_ms = 100
        trailing = true
    "#;

    #[test]
    fn parses_limiters_in_declaration_order() {
        let config: FlowConfig = SAMPLE.parse().unwrap();
        let names: Vec<_> = config.limiters.keys().cloned().collect();
        assert_eq!(names, vec!["search", "scroll"]);
        assert_eq!(
            config.limiter("search"),
            Some(&LimiterConfig::debounce(Duration::from_millis(300)))
        );
        assert_eq!(
            config.limiter("scroll"),
            Some(&LimiterConfig::throttle(Duration::from_millis(100), true))
        );
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: FlowConfig = "".parse().unwrap();
        assert!(config.limiters.is_empty());
        assert_eq!(config.logging.directory, PathBuf::from("target/logs"));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn rejects_zero_period() {
        let err = r#"
            [limiters.bad]
            kind = "throttle"
            period_ms = 0
        "#
        .parse::<FlowConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn rejects_trailing_debounce() {
        let err = r#"
            [limiters.bad]
            kind = "debounce"
            period_ms = 10
            trailing = true
        "#
        .parse::<FlowConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn rejects_unknown_kind() {
        let parsed = r#"
            [limiters.bad]
            kind = "bounce"
            period_ms = 10
        "#
        .parse::<FlowConfig>();
        assert!(parsed.is_err());
        assert!("Throttle".parse::<LimiterKind>().is_ok());
        assert!("bounce".parse::<LimiterKind>().is_err());
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("flow.toml");
        fs::write(&present, SAMPLE).unwrap();

        let loaded = FlowConfig::load_with_source(&[missing, present.clone()]).unwrap();
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.limiters.len(), 2);
    }

    #[test]
    fn reports_inspected_paths_when_nothing_exists() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nowhere.toml");
        let err = FlowConfig::load(&[missing]).unwrap_err();
        assert!(err.to_string().contains("nowhere.toml"));
    }
}
