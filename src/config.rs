//! Run configuration.
//!
//! A [`TestConfig`] is assembled with [`TestConfigBuilder`], validated once by
//! [`TestConfigBuilder::build`], and is immutable afterwards. The orchestrator
//! takes it by value for exactly one run.
//!
//! ```
//! use std::time::Duration;
//! use stampede::config::TestConfig;
//!
//! let config = TestConfig::builder()
//!     .users(10)
//!     .duration(Duration::from_secs(300))
//!     .think_time(Duration::from_secs(1))
//!     .visualizer(false)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.user_count(), 10);
//! assert_eq!(config.sink_workers(), 5);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StampedeError;

/// Default number of concurrent sink workers.
pub const DEFAULT_SINK_WORKERS: usize = 5;

/// Default capacity of the primary result queue.
pub const DEFAULT_PRIMARY_CAPACITY: usize = 5;

/// Capacity of the secondary queue feeding the visualizer.
pub const SECONDARY_CAPACITY: usize = 1;

/// Validated, immutable settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfig {
    duration: Duration,
    user_count: u32,
    think_time: Duration,
    enable_visualizer: bool,
    sink_workers: usize,
    primary_capacity: usize,
    output_dir: PathBuf,
    handle_signals: bool,
}

impl TestConfig {
    /// Starts a builder with every field at its default.
    pub fn builder() -> TestConfigBuilder {
        TestConfigBuilder::default()
    }

    /// Total wall-clock duration. Zero means "run until cancelled".
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Number of virtual users.
    pub fn user_count(&self) -> u32 {
        self.user_count
    }

    /// Pause between consecutive passes of one virtual user.
    pub fn think_time(&self) -> Duration {
        self.think_time
    }

    /// Whether a visualizer is attached to the secondary queue.
    pub fn visualizer_enabled(&self) -> bool {
        self.enable_visualizer
    }

    /// Number of sink workers draining the primary queue.
    pub fn sink_workers(&self) -> usize {
        self.sink_workers
    }

    /// Capacity of the primary queue.
    pub fn primary_capacity(&self) -> usize {
        self.primary_capacity
    }

    /// Directory in which the results file is created.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Whether the run listens for process signals.
    pub fn handles_signals(&self) -> bool {
        self.handle_signals
    }

    /// Returns `true` if the run has a deadline.
    pub fn has_deadline(&self) -> bool {
        !self.duration.is_zero()
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            duration: Duration::ZERO,
            user_count: 0,
            think_time: Duration::ZERO,
            enable_visualizer: false,
            sink_workers: DEFAULT_SINK_WORKERS,
            primary_capacity: DEFAULT_PRIMARY_CAPACITY,
            output_dir: PathBuf::from("."),
            handle_signals: true,
        }
    }
}

/// Chained builder for [`TestConfig`].
#[derive(Debug, Clone, Default)]
pub struct TestConfigBuilder {
    config: TestConfig,
}

impl TestConfigBuilder {
    /// Sets the total run duration. Zero disables the deadline.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.config.duration = duration;
        self
    }

    /// Sets the number of virtual users.
    pub fn users(mut self, users: u32) -> Self {
        self.config.user_count = users;
        self
    }

    /// Sets the pause between passes.
    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.config.think_time = think_time;
        self
    }

    /// Enables or disables the visualizer.
    pub fn visualizer(mut self, enabled: bool) -> Self {
        self.config.enable_visualizer = enabled;
        self
    }

    /// Sets the number of sink workers.
    pub fn sink_workers(mut self, workers: usize) -> Self {
        self.config.sink_workers = workers;
        self
    }

    /// Sets the primary queue capacity.
    pub fn primary_capacity(mut self, capacity: usize) -> Self {
        self.config.primary_capacity = capacity;
        self
    }

    /// Sets the directory for the results file.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Enables or disables the SIGINT/SIGTERM listener.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// Validates the settings and returns the immutable configuration.
    ///
    /// Returns [`StampedeError::ConfigValidation`] if `sink_workers` or
    /// `primary_capacity` is zero, or `output_dir` is empty.
    pub fn build(self) -> Result<TestConfig, StampedeError> {
        let config = self.config;
        if config.sink_workers == 0 {
            return Err(StampedeError::validation(
                "sink_workers must be at least 1",
            ));
        }
        if config.primary_capacity == 0 {
            return Err(StampedeError::validation(
                "primary_capacity must be at least 1",
            ));
        }
        if config.output_dir.as_os_str().is_empty() {
            return Err(StampedeError::validation("output_dir must not be empty"));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TestConfig::builder().build().unwrap();
        assert_eq!(config.duration(), Duration::ZERO);
        assert_eq!(config.user_count(), 0);
        assert_eq!(config.think_time(), Duration::ZERO);
        assert!(!config.visualizer_enabled());
        assert_eq!(config.sink_workers(), DEFAULT_SINK_WORKERS);
        assert_eq!(config.primary_capacity(), DEFAULT_PRIMARY_CAPACITY);
        assert_eq!(config.output_dir(), Path::new("."));
        assert!(config.handles_signals());
        assert!(!config.has_deadline());
    }

    #[test]
    fn test_builder_sets_every_field() {
        let config = TestConfig::builder()
            .duration(Duration::from_secs(300))
            .users(10)
            .think_time(Duration::from_millis(250))
            .visualizer(true)
            .sink_workers(2)
            .primary_capacity(64)
            .output_dir("/tmp/results")
            .handle_signals(false)
            .build()
            .unwrap();

        assert_eq!(config.duration(), Duration::from_secs(300));
        assert_eq!(config.user_count(), 10);
        assert_eq!(config.think_time(), Duration::from_millis(250));
        assert!(config.visualizer_enabled());
        assert_eq!(config.sink_workers(), 2);
        assert_eq!(config.primary_capacity(), 64);
        assert_eq!(config.output_dir(), Path::new("/tmp/results"));
        assert!(!config.handles_signals());
        assert!(config.has_deadline());
    }

    #[test]
    fn test_zero_sink_workers_rejected() {
        let err = TestConfig::builder().sink_workers(0).build().unwrap_err();
        assert!(err.to_string().contains("sink_workers"));
    }

    #[test]
    fn test_zero_primary_capacity_rejected() {
        let err = TestConfig::builder()
            .primary_capacity(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("primary_capacity"));
    }

    #[test]
    fn test_empty_output_dir_rejected() {
        let err = TestConfig::builder().output_dir("").build().unwrap_err();
        assert!(matches!(err, StampedeError::ConfigValidation { .. }));
    }
}
