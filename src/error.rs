//! Error types for the load generation pipeline.
//!
//! [`StampedeError`] covers every run-level failure: configuration and
//! scenario problems detected before a run starts, and infrastructure
//! failures (file I/O, signal setup) that abort a run in progress.
//!
//! Failures of the user's own tasks never appear here. They are recorded in
//! the [`ResultRecord`](crate::record::ResultRecord) of the execution that
//! produced them.

use std::path::PathBuf;

/// Run-level errors: configuration, setup and persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StampedeError {
    /// Semantic validation failure -- the configuration or scenario was
    /// well-formed but contains invalid values (e.g., zero sink workers,
    /// an empty task list).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// TOML parse failure -- the scenario file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse scenario TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// The scenario file could not be read from disk.
    #[error("Failed to read scenario file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// The results file could not be created or its header written.
    #[error("Failed to create results file '{}': {source}", path.display())]
    SinkCreate {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Appending a record to the results file failed.
    #[error("Failed to write to results file '{}': {source}", path.display())]
    SinkWrite {
        source: std::io::Error,
        path: PathBuf,
    },

    /// A write was attempted after the results file was closed.
    #[error("Results file '{}' is already closed", path.display())]
    SinkClosed { path: PathBuf },

    /// The HTTP client for scenario tasks could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The process signal listener could not be installed.
    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// A pipeline worker task panicked or was aborted.
    #[error("{role} task failed: {message}")]
    WorkerPanicked { role: &'static str, message: String },
}

impl StampedeError {
    /// Shorthand for a [`StampedeError::ConfigValidation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Returns `true` for errors detected before any worker was started.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigValidation { .. }
                | Self::ConfigParse { .. }
                | Self::ConfigIo { .. }
                | Self::SinkCreate { .. }
                | Self::HttpClient(_)
                | Self::Signal(_)
        )
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = StampedeError> = std::result::Result<T, E>;
