//! Live consumers of the secondary result stream.
//!
//! A [`Visualizer`] receives every persisted record, one at a time, from a
//! capacity-1 queue. It must keep receiving until the queue is closed; a
//! visualizer that drops its receiver early only stops receiving, the run
//! itself continues.
//!
//! Visualizers never install signal handlers. One that reads keyboard input
//! asks the run to stop through [`VisualizerContext::interrupt`].
//!
//! The built-in [`TerminalVisualizer`] reads no keys; Ctrl+C stops the run
//! through the process signal listener.

use std::collections::VecDeque;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;

use crate::context::RunContext;
use crate::lifecycle::InterruptHandle;
use crate::record::ResultRecord;
use crate::user::ActiveUserCounter;

/// Everything a visualizer may use besides the record stream.
#[derive(Debug, Clone)]
pub struct VisualizerContext {
    /// Cancellation context of the run.
    pub run: RunContext,
    /// Relay for stop requests.
    pub interrupt: InterruptHandle,
    /// Path of the results file being written.
    pub results_path: PathBuf,
    /// Configured number of virtual users.
    pub user_count: u32,
    /// Virtual users currently running.
    pub active_users: ActiveUserCounter,
}

/// A live consumer of persisted records.
#[async_trait]
pub trait Visualizer: Send {
    /// Consumes records until `records` is closed.
    async fn run(self: Box<Self>, records: flume::Receiver<ResultRecord>, ctx: VisualizerContext);
}

/// Bars used to render the latency sparkline, lowest first.
const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Number of recent durations kept for the sparkline.
pub const DEFAULT_WINDOW: usize = 40;

/// Running counters over the records seen so far.
#[derive(Debug, Clone)]
pub struct LiveStats {
    /// Records seen.
    pub total: u64,
    /// Successful records seen.
    pub successes: u64,
    /// Failed records seen.
    pub failures: u64,
    /// Most recent record.
    pub latest: Option<ResultRecord>,
    /// Most recent non-empty error message.
    pub last_error: Option<String>,
    recent: VecDeque<f64>,
    window: usize,
}

impl LiveStats {
    /// Creates empty stats keeping `window` recent durations.
    pub fn new(window: usize) -> Self {
        Self {
            total: 0,
            successes: 0,
            failures: 0,
            latest: None,
            last_error: None,
            recent: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Folds one record into the stats.
    pub fn observe(&mut self, record: &ResultRecord) {
        self.total += 1;
        if record.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(record.duration_ms());
        if !record.error.is_empty() {
            self.last_error = Some(record.error.clone());
        }
        self.latest = Some(record.clone());
    }

    /// Renders the recent durations as a sparkline scaled to their maximum.
    pub fn sparkline(&self) -> String {
        let max = self.recent.iter().copied().fold(0.0_f64, f64::max);
        self.recent
            .iter()
            .map(|&ms| {
                if max <= 0.0 {
                    return SPARK_LEVELS[0];
                }
                let level = ((ms / max) * (SPARK_LEVELS.len() - 1) as f64).round() as usize;
                SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
            })
            .collect()
    }
}

/// Spinner plus a single colored status line on stderr.
#[derive(Debug, Clone)]
pub struct TerminalVisualizer {
    no_color: bool,
    window: usize,
}

impl TerminalVisualizer {
    /// Creates the terminal view. Colors are disabled when `no_color` is set
    /// or stderr is not a terminal.
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            window: DEFAULT_WINDOW,
        }
    }

    /// Sets how many recent durations the sparkline shows.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Formats the status block.
    ///
    /// The first line shows the latest label, duration and status, success
    /// and failure counts, the sparkline, running users and elapsed time.
    /// Below it come the results path and, once any execution failed, the
    /// first line of the most recent error.
    pub fn format_status(
        stats: &LiveStats,
        elapsed: Duration,
        active_users: u32,
        target_users: u32,
        results_path: &Path,
        stopping: bool,
    ) -> String {
        let latest = match &stats.latest {
            Some(record) => {
                let mut text = format!("{} {:.2}ms", record.label, record.duration_ms());
                if let Some(status) = record.status {
                    text.push_str(&format!(" [{status}]"));
                }
                if record.success {
                    text.green().to_string()
                } else {
                    text.red().to_string()
                }
            }
            None => "waiting for results".dimmed().to_string(),
        };
        let failures = if stats.failures > 0 {
            stats.failures.to_string().red().to_string()
        } else {
            stats.failures.to_string()
        };

        let mut block = format!(
            "  {}  |  ok: {}  fail: {}  |  {}  |  users: {}/{}  |  elapsed: {}s",
            latest,
            stats.successes.to_string().green(),
            failures,
            stats.sparkline().cyan(),
            active_users,
            target_users,
            elapsed.as_secs()
        );
        if stopping {
            block.push_str(&format!("  {}", "stopping...".yellow()));
        }
        block.push_str(&format!("\n  results: {}", results_path.display().to_string().cyan()));
        if let Some(error) = &stats.last_error {
            let first_line = error.lines().next().unwrap_or_default();
            block.push_str(&format!("\n  last error: {}", first_line.red()));
        }
        block
    }
}

impl Default for TerminalVisualizer {
    fn default() -> Self {
        Self::new(false)
    }
}

fn spinner() -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn render(stats: &LiveStats, ctx: &VisualizerContext, started: Instant, stopping: bool) -> String {
    TerminalVisualizer::format_status(
        stats,
        started.elapsed(),
        ctx.active_users.get(),
        ctx.user_count,
        &ctx.results_path,
        stopping,
    )
}

#[async_trait]
impl Visualizer for TerminalVisualizer {
    async fn run(self: Box<Self>, records: flume::Receiver<ResultRecord>, ctx: VisualizerContext) {
        if self.no_color || !std::io::stderr().is_terminal() {
            colored::control::set_override(false);
        }

        let bar = spinner();
        let started = Instant::now();
        let mut stats = LiveStats::new(self.window);
        let mut stopping = false;

        tracing::debug!(
            users = ctx.user_count,
            path = %ctx.results_path.display(),
            "terminal visualizer started"
        );

        loop {
            tokio::select! {
                received = records.recv_async() => match received {
                    Ok(record) => {
                        stats.observe(&record);
                        bar.set_message(render(&stats, &ctx, started, stopping));
                    }
                    Err(_) => break,
                },
                _ = ctx.run.cancelled(), if !stopping => {
                    stopping = true;
                    bar.set_message(render(&stats, &ctx, started, stopping));
                }
            }
        }

        bar.finish_and_clear();
        tracing::debug!(records = stats.total, "terminal visualizer finished");
    }
}
