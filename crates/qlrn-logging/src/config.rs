//! Logging configuration
//!
//! A [`LogConfig`] is picked per process: a single routing engine on a host
//! uses [`LogConfig::production`], the simulator uses
//! [`LogConfig::simulation`] so every node's engine writes into one run log,
//! and tests use [`LogConfig::testing`]. Configs can also be read from JSON
//! with any subset of fields present.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LoggingError;

/// Where and how much the routing stack logs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for targets without a directive; `RUST_LOG` wins over it
    pub default_level: String,

    pub console: ConsoleConfig,

    /// Rolling JSONL file, off unless set
    pub file: Option<FileConfig>,

    pub jsonl: JsonlConfig,

    /// Per-module directives, e.g. the engine at trace and the medium off
    pub filters: FilterConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

impl LogConfig {
    /// Human-readable console at debug, for watching one engine by hand
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// A deployed engine: JSONL into `log_dir`, rotated daily, no console
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig {
                enabled: false,
                pretty: false,
                ansi: false,
            },
            file: Some(FileConfig {
                directory: log_dir,
                prefix: "qlrn".to_string(),
                rotation: RotationStrategy::Daily,
                max_files: Some(30),
            }),
            ..Default::default()
        }
    }

    /// A simulator run
    ///
    /// Pretty console at info. With `run_dir`, the whole run also goes to a
    /// single unrotated `qlrn-sim` JSONL file, one line per event with the
    /// emitting node's id attached, ready for per-node filtering.
    pub fn simulation(run_dir: Option<PathBuf>) -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            file: run_dir.map(|directory| FileConfig {
                directory,
                prefix: "qlrn-sim".to_string(),
                rotation: RotationStrategy::Never,
                max_files: None,
            }),
            ..Default::default()
        }
    }

    /// Warnings only, plain text
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: false,
                ansi: false,
            },
            ..Default::default()
        }
    }

    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, LoggingError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoggingError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Stdout output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    /// Human-readable lines instead of JSONL
    pub pretty: bool,
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false,
            ansi: false,
        }
    }
}

/// Rolling JSONL log file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name stem; the appender adds the date suffix when rotating
    pub prefix: String,
    pub rotation: RotationStrategy,
    /// Rotated files kept; `None` keeps all of them
    pub max_files: Option<usize>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "qlrn".to_string(),
            rotation: RotationStrategy::Daily,
            max_files: Some(7),
        }
    }
}

/// When the log file rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// One file for the life of the process, as for a simulator run
    Never,
}

/// Shape of each JSONL record
///
/// Span fields carry the node id and the per-packet context (`dst`, `uid`)
/// set by the engine's instrumented handlers, so they are kept by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlConfig {
    /// Put event fields at the top level instead of under `fields`
    pub flatten_events: bool,
    pub include_spans: bool,
    pub include_current_span: bool,
    pub include_thread_info: bool,
    /// Source file and line of the log call
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_current_span: true,
            include_thread_info: false,
            include_location: true,
        }
    }
}

/// Filtering configuration, applied on top of the default level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Targets silenced entirely
    pub exclude_targets: Vec<String>,
    /// Per-target levels, e.g. `qlrn_routing::engine = "trace"`
    pub targets: BTreeMap<String, String>,
}

impl FilterConfig {
    /// Set the level for one target
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.targets.insert(target.into(), level.into());
        self
    }

    /// Silence a target
    pub fn without_target(mut self, target: impl Into<String>) -> Self {
        self.exclude_targets.push(target.into());
        self
    }

    /// Render as `EnvFilter` directive strings
    pub fn directives(&self) -> Vec<String> {
        self.exclude_targets
            .iter()
            .map(|target| format!("{target}=off"))
            .chain(
                self.targets
                    .iter()
                    .map(|(target, level)| format!("{target}={level}")),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty);
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert!(config.console.pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn test_production_config() {
        let config = LogConfig::production(PathBuf::from("/var/log/qlrn"));
        assert!(!config.console.enabled);
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "qlrn");
        assert_eq!(file.rotation, RotationStrategy::Daily);
    }

    #[test]
    fn test_simulation_config() {
        let config = LogConfig::simulation(None);
        assert!(config.console.pretty);
        assert!(config.file.is_none());

        let file = LogConfig::simulation(Some(PathBuf::from("runs/line")))
            .file
            .unwrap();
        assert_eq!(file.directory, PathBuf::from("runs/line"));
        assert_eq!(file.prefix, "qlrn-sim");
        assert_eq!(file.rotation, RotationStrategy::Never);
        assert_eq!(file.max_files, None);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = LogConfig::from_json(
            r#"{ "default_level": "trace", "filters": { "targets": { "qlrn_routing": "debug" } } }"#,
        )
        .unwrap();
        assert_eq!(config.default_level, "trace");
        assert!(config.console.enabled);
        assert!(config.jsonl.flatten_events);
        assert_eq!(config.filters.directives(), vec!["qlrn_routing=debug"]);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(matches!(
            LogConfig::from_json("{ default_level"),
            Err(LoggingError::Json(_))
        ));
    }

    #[test]
    fn test_filter_directives() {
        let filters = FilterConfig::default()
            .with_target("qlrn_routing::engine", "trace")
            .without_target("qlrn_simulation::medium");
        assert_eq!(
            filters.directives(),
            vec!["qlrn_simulation::medium=off", "qlrn_routing::engine=trace"]
        );
    }
}
