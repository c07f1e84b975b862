//! TOML scenario files describing HTTP load tests.
//!
//! A scenario names a base URL, run settings, and an ordered list of
//! `[[task]]` requests. Each task becomes one HTTP [`TaskDefinition`]; every
//! virtual user runs them in file order.
//!
//! # Example TOML
//!
//! ```toml
//! base_url = "http://localhost:8080"
//!
//! [settings]
//! users = 2
//! duration_secs = 300
//! think_time_ms = 1000
//! timeout_ms = 5000
//!
//! [[task]]
//! label = "home page"
//! method = "GET"
//! path = "/"
//! expect_status = 200
//! headers = { accept = "text/html" }
//!
//! [[task]]
//! method = "POST"
//! path = "/login"
//! body = '{"user":"demo"}'
//! ```
//!
//! The base URL may be left out of the file and supplied with `--url`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::config::{TestConfig, DEFAULT_SINK_WORKERS};
use crate::error::StampedeError;
use crate::http::{http_task, join_url, HttpRequestSpec, HttpResponse};
use crate::task::TaskDefinition;

/// Default scenario file name, discovered by walking up parent directories.
pub const SCENARIO_FILE_NAME: &str = "stampede.toml";

/// Top-level scenario parsed from a TOML file.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Scenario {
    /// URL every task path is appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Run settings.
    #[serde(default)]
    pub settings: Settings,
    /// Requests in execution order.
    ///
    /// The field name is `task` because TOML `[[task]]` array-of-tables
    /// syntax creates a key called `task`.
    #[serde(default)]
    pub task: Vec<TaskSpec>,
}

/// Run settings of a scenario.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Number of virtual users.
    pub users: u32,
    /// Run duration in seconds; 0 runs until interrupted.
    pub duration_secs: u64,
    /// Pause between passes in milliseconds.
    pub think_time_ms: u64,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Whether to show the live terminal view.
    pub visualizer: bool,
    /// Number of sink workers.
    pub sink_workers: usize,
    /// Directory for the results file.
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            users: 1,
            duration_secs: 60,
            think_time_ms: 0,
            timeout_ms: 30_000,
            visualizer: true,
            sink_workers: DEFAULT_SINK_WORKERS,
            output_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// `timeout_ms` as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// One HTTP request of a scenario.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// Record label; defaults to `"<METHOD> - <path>"`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// HTTP method, case-insensitive.
    #[serde(default = "default_method")]
    pub method: String,
    /// Path appended to the base URL.
    pub path: String,
    /// Status required for success; unset accepts any response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,
    /// Request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Request body; empty means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl TaskSpec {
    /// Parses the method name.
    pub fn method(&self) -> Result<Method, StampedeError> {
        Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
            StampedeError::validation(format!("invalid HTTP method '{}'", self.method))
        })
    }

    /// Resolves the task against `base_url`.
    pub fn to_request(&self, base_url: &str) -> Result<HttpRequestSpec, StampedeError> {
        let mut spec = HttpRequestSpec::new(self.method()?, join_url(base_url, &self.path)?)
            .with_label(self.label.clone());
        for (name, value) in &self.headers {
            spec = spec.with_header(name, value)?;
        }
        if let Some(body) = self.body.as_deref().filter(|b| !b.is_empty()) {
            spec = spec.with_body(body);
        }
        if let Some(status) = self.expect_status {
            spec = spec.expect_status(status);
        }
        Ok(spec)
    }
}

impl Scenario {
    /// Parses and validates a scenario.
    pub fn from_toml(content: &str) -> Result<Self, StampedeError> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Loads and validates a scenario file.
    ///
    /// Returns [`StampedeError::ConfigIo`] if the file cannot be read,
    /// [`StampedeError::ConfigParse`] if the TOML is malformed, or
    /// [`StampedeError::ConfigValidation`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, StampedeError> {
        let content = std::fs::read_to_string(path).map_err(|source| StampedeError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Checks the scenario for semantic errors.
    ///
    /// Checks:
    /// - At least one `[[task]]` is defined
    /// - Every method is a valid HTTP method
    /// - `sink_workers` is at least 1
    /// - If a base URL is present, every task resolves to a valid request
    pub fn validate(&self) -> Result<(), StampedeError> {
        if self.task.is_empty() {
            return Err(StampedeError::validation(
                "Scenario must contain at least one [[task]]",
            ));
        }
        for (idx, task) in self.task.iter().enumerate() {
            task.method().map_err(|e| {
                StampedeError::validation(format!("task {}: {}", idx + 1, strip_prefix(&e)))
            })?;
        }
        if self.settings.sink_workers == 0 {
            return Err(StampedeError::validation("sink_workers must be at least 1"));
        }
        if self.base_url.is_some() {
            self.requests()?;
        }
        Ok(())
    }

    /// Overrides the base URL.
    pub fn set_base_url(&mut self, url: impl Into<String>) {
        self.base_url = Some(url.into());
    }

    /// The base URL, which must be set in the file or by override.
    pub fn base_url(&self) -> Result<&str, StampedeError> {
        self.base_url.as_deref().ok_or_else(|| {
            StampedeError::validation("no base_url in scenario; set it in the file or pass --url")
        })
    }

    /// Resolves every task into a request.
    pub fn requests(&self) -> Result<Vec<HttpRequestSpec>, StampedeError> {
        let base_url = self.base_url()?;
        self.task
            .iter()
            .enumerate()
            .map(|(idx, task)| {
                task.to_request(base_url).map_err(|e| {
                    StampedeError::validation(format!("task {}: {}", idx + 1, strip_prefix(&e)))
                })
            })
            .collect()
    }

    /// Builds the run configuration from the settings.
    pub fn test_config(&self) -> Result<TestConfig, StampedeError> {
        TestConfig::builder()
            .users(self.settings.users)
            .duration(Duration::from_secs(self.settings.duration_secs))
            .think_time(Duration::from_millis(self.settings.think_time_ms))
            .visualizer(self.settings.visualizer)
            .sink_workers(self.settings.sink_workers)
            .output_dir(self.settings.output_dir.clone())
            .build()
    }

    /// Builds one HTTP task per `[[task]]`, sharing a client with the
    /// configured timeout.
    pub fn build_tasks(&self) -> Result<Vec<TaskDefinition<HttpResponse>>, StampedeError> {
        let requests = self.requests()?;
        let client = reqwest::Client::builder()
            .timeout(self.settings.timeout())
            .build()?;
        Ok(requests
            .into_iter()
            .map(|spec| http_task(client.clone(), spec))
            .collect())
    }
}

/// The message of a validation error without its display prefix.
fn strip_prefix(err: &StampedeError) -> String {
    match err {
        StampedeError::ConfigValidation { message } => message.clone(),
        other => other.to_string(),
    }
}

/// Finds [`SCENARIO_FILE_NAME`] in `start` or the nearest parent directory.
pub fn discover(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(SCENARIO_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}
