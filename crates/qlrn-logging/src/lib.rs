//! Structured logging for QLRN routing engines and simulations
//!
//! Several routing engines often share one process (every node of a
//! simulation, or several interfaces under test). This crate sets up a
//! `tracing` subscriber that keeps their output apart.
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines for log aggregation (default)
//! - **Node Context Injection**: Spans opened while a node is driven carry its id
//! - **Per-target Filters**: `RUST_LOG` plus config-driven directives
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//!
//! # Quick Start
//!
//! ```ignore
//! use qlrn_logging::{QlrnSubscriberBuilder, LogConfig};
//!
//! // JSONL to console
//! let _guard = QlrnSubscriberBuilder::new().init();
//!
//! // Pretty human-readable output
//! let _guard = QlrnSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```
//!
//! # Node Context
//!
//! ```ignore
//! use qlrn_logging::NodeContextGuard;
//!
//! let _guard = NodeContextGuard::new(node_address);
//! engine.handle_timer(timer);
//! ```

pub mod config;
pub mod context;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, FilterConfig, JsonlConfig, LogConfig, RotationStrategy};
pub use context::{NodeContextData, NodeContextGuard};
pub use layers::{NodeContextExtension, NodeContextLayer, jsonl_layer, node_context_of};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid filter directive: {0}")]
    Directive(#[from] ParseError),

    #[error("Failed to create rolling log file: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Builder for configuring and initializing the logging subscriber
///
/// By default, console output uses JSONL format. Use
/// [`LogConfig::development`] for human-readable output.
pub struct QlrnSubscriberBuilder {
    config: LogConfig,
}

impl QlrnSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Switch console output to the pretty format
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.config.console.pretty = pretty;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Set a per-target level
    pub fn with_target(mut self, target: impl Into<String>, level: impl Into<String>) -> Self {
        self.config.filters = self.config.filters.with_target(target, level);
        self
    }

    /// Build the level filter: `RUST_LOG` when set, the default level
    /// otherwise, then the configured per-target directives.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        let mut filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.config.default_level)?,
        };
        for directive in self.config.filters.directives() {
            filter = filter.add_directive(directive.parse()?);
        }
        Ok(filter)
    }

    /// Initialize the subscriber globally
    ///
    /// The returned guard must be kept alive while file output is wanted.
    /// Setup failures are reported on stderr and leave logging disabled.
    pub fn init(self) -> Option<WorkerGuard> {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("qlrn-logging: {e}");
                None
            }
        }
    }

    /// Try to initialize the subscriber globally
    ///
    /// Fails if a global subscriber has already been set or the log file
    /// cannot be opened.
    pub fn try_init(self) -> Result<Option<WorkerGuard>, LoggingError> {
        let env_filter = self.env_filter()?;
        let console = &self.config.console;
        let jsonl = &self.config.jsonl;

        let (file_writer, guard) = match &self.config.file {
            Some(file_config) => {
                let (writer, guard) = create_file_writer(file_config)?;
                (Some(writer), Some(guard))
            }
            None => (None, None),
        };

        let pretty_console = (console.enabled && console.pretty).then(|| {
            tracing_subscriber::fmt::layer()
                .with_ansi(console.ansi)
                .with_target(true)
        });
        let jsonl_console =
            (console.enabled && !console.pretty).then(|| jsonl_layer(std::io::stdout, jsonl));
        let file_layer = file_writer.map(|writer| jsonl_layer(writer, jsonl));

        Registry::default()
            .with(env_filter)
            .with(NodeContextLayer::new())
            .with(pretty_console)
            .with(jsonl_console)
            .with(file_layer)
            .try_init()?;

        Ok(guard)
    }
}

impl Default for QlrnSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Open the log file: truncated for [`RotationStrategy::Never`], rolling
/// otherwise.
fn create_file_writer(config: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.directory)?;
    let rotation = match config.rotation {
        RotationStrategy::Never => {
            let path = config.directory.join(format!("{}.log", config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&config.prefix)
        .filename_suffix("log");
    if let Some(max_files) = config.max_files {
        builder = builder.max_log_files(max_files);
    }
    Ok(tracing_appender::non_blocking(builder.build(&config.directory)?))
}

/// Initialize logging with default settings (JSONL to console)
pub fn init_default() -> Option<WorkerGuard> {
    QlrnSubscriberBuilder::new().init()
}

/// Initialize logging for development (verbose, pretty console output)
pub fn init_development() -> Option<WorkerGuard> {
    QlrnSubscriberBuilder::new()
        .with_config(LogConfig::development())
        .init()
}

/// Initialize logging for testing (minimal output, repeat calls are ignored)
pub fn init_testing() {
    let _ = QlrnSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creation() {
        let builder = QlrnSubscriberBuilder::new();
        assert_eq!(builder.config.default_level, "info");
        assert!(!builder.config.console.pretty); // JSONL by default
    }

    #[test]
    fn test_builder_with_config() {
        let builder = QlrnSubscriberBuilder::new().with_config(LogConfig::development());
        assert_eq!(builder.config.default_level, "debug");
        assert!(builder.config.console.pretty);
    }

    #[test]
    fn test_builder_overrides() {
        let builder = QlrnSubscriberBuilder::new()
            .with_level("trace")
            .with_console(false)
            .with_target("qlrn_routing::engine", "debug");
        assert_eq!(builder.config.default_level, "trace");
        assert!(!builder.config.console.enabled);
        assert_eq!(
            builder.config.filters.targets.get("qlrn_routing::engine").map(String::as_str),
            Some("debug")
        );
    }

    #[test]
    fn test_env_filter_accepts_target_directives() {
        let builder = QlrnSubscriberBuilder::new().with_config(LogConfig {
                filters: FilterConfig::default()
                .with_target("qlrn_routing", "trace")
                .without_target("qlrn_simulation::medium"),
            ..LogConfig::testing()
        });
        assert!(builder.env_filter().is_ok());
    }

    #[test]
    fn test_init_testing_is_idempotent() {
        init_testing();
        init_testing();
        tracing::warn!("logging initialized twice without panicking");
    }
}
