//! Test orchestrator: one run from setup to drain.
//!
//! [`Orchestrator::run`] owns every synchronization primitive of a run:
//! - the [`RunContext`] (cancellation token plus deadline)
//! - the bounded primary queue shared by all sink workers
//! - the capacity-1 secondary queue feeding the visualizer
//! - the controller task that turns signals, interrupts and the deadline
//!   into a single cancellation
//!
//! Shutdown drains bottom-up: virtual users finish their current pass and
//! drop their senders, sink workers empty the primary queue, the sink is
//! closed, and the visualizer empties the secondary queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::config::{TestConfig, SECONDARY_CAPACITY};
use crate::context::RunContext;
use crate::error::StampedeError;
use crate::lifecycle::{Controller, InterruptHandle, SignalListener, StopReason};
use crate::record::ResultRecord;
use crate::sink::{sink_worker, ResultSink};
use crate::task::{normalize_labels, TaskDefinition};
use crate::user::{user_loop, ActiveUserCounter, UserReport};
use crate::visualizer::{TerminalVisualizer, Visualizer, VisualizerContext};

/// Compile-time check that queue payloads can cross tasks.
fn _assert_send<T: Send>() {}
#[allow(dead_code)]
fn _check_send_bounds() {
    _assert_send::<ResultRecord>();
    _assert_send::<UserReport>();
    _assert_send::<StampedeError>();
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Path of the results file.
    pub results_path: PathBuf,
    /// Rows written to the results file, excluding the header.
    pub records_written: u64,
    /// Wall-clock time from start to full drain.
    pub elapsed: Duration,
    /// What ended the run.
    pub stop_reason: StopReason,
    /// Full passes over the task list, summed over all users.
    pub passes: u64,
    /// Per-user reports, ordered by user index.
    pub users: Vec<UserReport>,
}

/// Runs one load test.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use stampede::{Orchestrator, TaskDefinition, TestConfig};
///
/// # async fn demo() -> Result<(), stampede::StampedeError> {
/// let config = TestConfig::builder()
///     .users(4)
///     .duration(Duration::from_secs(30))
///     .think_time(Duration::from_millis(500))
///     .build()?;
/// let tasks = vec![TaskDefinition::new("noop", |_ctx| async { Ok(()) })];
/// let summary = Orchestrator::new(config).run(tasks).await?;
/// println!("{} rows in {}", summary.records_written, summary.results_path.display());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    config: TestConfig,
    visualizer: Option<Box<dyn Visualizer>>,
    on_start: Option<StartHook>,
    interrupt: InterruptHandle,
    relay: mpsc::Receiver<()>,
}

/// Called once with the results path after setup succeeds.
type StartHook = Box<dyn FnOnce(&Path) + Send>;

impl Orchestrator {
    /// Creates an orchestrator for one run with `config`.
    pub fn new(config: TestConfig) -> Self {
        let (interrupt, relay) = InterruptHandle::channel();
        Self {
            config,
            visualizer: None,
            on_start: None,
            interrupt,
            relay,
        }
    }

    /// Uses `visualizer` instead of the terminal view when the visualizer is
    /// enabled in the configuration.
    pub fn with_visualizer(mut self, visualizer: Box<dyn Visualizer>) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    /// Registers a callback that receives the results path once the file
    /// exists and before any worker starts.
    pub fn on_start(mut self, hook: impl FnOnce(&Path) + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Returns a handle that stops the run gracefully when interrupted.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// The configuration of this run.
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Executes the run and blocks until all work has drained.
    ///
    /// Setup failures (empty task list, results file creation, signal
    /// installation) are returned before any worker starts. Afterwards the
    /// first sink failure, if any, is returned once the run has drained.
    pub async fn run<V: Send + 'static>(
        mut self,
        tasks: Vec<TaskDefinition<V>>,
    ) -> Result<RunSummary, StampedeError> {
        if tasks.is_empty() {
            return Err(StampedeError::validation("at least one task is required"));
        }
        let mut tasks = tasks;
        normalize_labels(&mut tasks);
        let tasks: Arc<[TaskDefinition<V>]> = tasks.into();

        let signals = if self.config.handles_signals() {
            Some(SignalListener::install()?)
        } else {
            None
        };
        let sink = ResultSink::create(self.config.output_dir())?;
        if let Some(hook) = self.on_start.take() {
            hook(sink.path());
        }

        self.drive(tasks, signals, sink).await
    }

    /// Runs the pipeline against an already created sink until it drains.
    async fn drive<V: Send + 'static>(
        self,
        tasks: Arc<[TaskDefinition<V>]>,
        signals: Option<SignalListener>,
        sink: ResultSink,
    ) -> Result<RunSummary, StampedeError> {
        let Self {
            config,
            visualizer,
            interrupt,
            relay,
            ..
        } = self;
        let sink = Arc::new(sink);
        let results_path = sink.path().to_path_buf();

        let (primary_tx, primary_rx) = flume::bounded::<ResultRecord>(config.primary_capacity());
        let secondary = config
            .visualizer_enabled()
            .then(|| flume::bounded::<ResultRecord>(SECONDARY_CAPACITY));

        let started = Instant::now();
        let deadline = config
            .has_deadline()
            .then(|| started.checked_add(config.duration()))
            .flatten();
        let ctx = match deadline {
            Some(deadline) => RunContext::with_deadline(deadline),
            None => {
                if config.has_deadline() {
                    tracing::warn!(
                        duration_secs = config.duration().as_secs(),
                        "duration exceeds the clock range, running until stopped"
                    );
                }
                RunContext::new()
            }
        };
        let controller = Controller::spawn(ctx.clone(), relay, signals);

        tracing::info!(
            users = config.user_count(),
            duration_ms = config.duration().as_millis() as u64,
            think_time_ms = config.think_time().as_millis() as u64,
            sink_workers = config.sink_workers(),
            tasks = tasks.len(),
            path = %results_path.display(),
            "starting run"
        );

        // Sink workers
        let mut workers = JoinSet::new();
        for worker_id in 0..config.sink_workers() {
            let forward = secondary.as_ref().map(|(tx, _)| tx.clone());
            workers.spawn(sink_worker(
                worker_id,
                sink.clone(),
                primary_rx.clone(),
                forward,
                ctx.clone(),
            ));
        }
        drop(primary_rx);

        let active = ActiveUserCounter::new();

        // Visualizer
        let visualizer_handle = match secondary {
            Some((secondary_tx, secondary_rx)) => {
                drop(secondary_tx);
                let visualizer: Box<dyn Visualizer> = match visualizer {
                    Some(visualizer) => visualizer,
                    None => Box::new(TerminalVisualizer::default()),
                };
                let viz_ctx = VisualizerContext {
                    run: ctx.clone(),
                    interrupt,
                    results_path: results_path.clone(),
                    user_count: config.user_count(),
                    active_users: active.clone(),
                };
                Some(tokio::spawn(visualizer.run(secondary_rx, viz_ctx)))
            }
            None => {
                if visualizer.is_some() {
                    tracing::debug!("visualizer disabled, ignoring supplied visualizer");
                }
                None
            }
        };

        // Virtual users
        let tracker = TaskTracker::new();
        let user_handles: Vec<JoinHandle<UserReport>> = (0..config.user_count())
            .map(|user_id| {
                tracker.spawn(user_loop(
                    user_id,
                    tasks.clone(),
                    config.think_time(),
                    primary_tx.clone(),
                    ctx.clone(),
                    active.clone(),
                ))
            })
            .collect();
        drop(primary_tx);

        tracker.close();
        tracker.wait().await;

        let mut first_error: Option<StampedeError> = None;
        let mut users = Vec::with_capacity(user_handles.len());
        for handle in user_handles {
            match handle.await {
                Ok(report) => users.push(report),
                Err(err) => {
                    tracing::error!(error = %err, "virtual user task failed");
                    first_error.get_or_insert(StampedeError::WorkerPanicked {
                        role: "virtual user",
                        message: err.to_string(),
                    });
                }
            }
        }

        // Drain: every sink worker exits only once the primary queue is empty
        let mut sink_error: Option<StampedeError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    sink_error.get_or_insert(err);
                }
                Err(err) => {
                    sink_error.get_or_insert(StampedeError::WorkerPanicked {
                        role: "sink worker",
                        message: err.to_string(),
                    });
                }
            }
        }
        if let Err(err) = sink.close() {
            sink_error.get_or_insert(err);
        }

        if let Some(handle) = visualizer_handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "visualizer task failed");
            }
        }

        let stop_reason = controller.finish().await;
        ctx.cancel();

        if let Some(err) = sink_error.or(first_error) {
            return Err(err);
        }

        let summary = RunSummary {
            results_path,
            records_written: sink.records_written(),
            elapsed: started.elapsed(),
            stop_reason,
            passes: users.iter().map(|u| u.passes).sum(),
            users,
        };
        tracing::info!(
            records = summary.records_written,
            passes = summary.passes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            reason = %summary.stop_reason,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> crate::config::TestConfigBuilder {
        TestConfig::builder()
            .output_dir(dir)
            .handle_signals(false)
    }

    #[tokio::test]
    async fn test_empty_task_list_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(config(dir.path()).users(1).build().unwrap());

        let err = orchestrator
            .run(Vec::<TaskDefinition<()>>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StampedeError::ConfigValidation { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_output_dir_fails_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("nope")).users(1).build().unwrap();
        let err = Orchestrator::new(cfg)
            .run(vec![TaskDefinition::new("t", |_ctx| async { Ok(()) })])
            .await
            .unwrap_err();
        assert!(matches!(err, StampedeError::SinkCreate { .. }));
    }

    #[tokio::test]
    async fn test_zero_users_finishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Orchestrator::new(config(dir.path()).build().unwrap())
            .run(vec![TaskDefinition::new("t", |_ctx| async { Ok(()) })])
            .await
            .unwrap();

        assert_eq!(summary.records_written, 0);
        assert_eq!(summary.stop_reason, StopReason::UsersFinished);
        assert!(summary.results_path.exists());
    }

    #[tokio::test]
    async fn test_on_start_receives_results_path() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(None::<PathBuf>));
        let slot = seen.clone();
        let summary = Orchestrator::new(config(dir.path()).build().unwrap())
            .on_start(move |path| *slot.lock() = Some(path.to_path_buf()))
            .run(vec![TaskDefinition::new("t", |_ctx| async { Ok(()) })])
            .await
            .unwrap();

        assert_eq!(seen.lock().as_deref(), Some(summary.results_path.as_path()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_run_summary() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path())
            .users(3)
            .duration(Duration::from_millis(50))
            .think_time(Duration::from_millis(10))
            .build()
            .unwrap();
        let summary = Orchestrator::new(cfg)
            .run(vec![TaskDefinition::new("t", |_ctx| async { Ok(()) })])
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Deadline);
        assert_eq!(summary.users.len(), 3);
        assert!(summary.users.iter().all(|u| u.passes == 5));
        assert_eq!(summary.records_written, 15);
    }

    #[tokio::test]
    async fn test_interrupt_handle_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(
            config(dir.path())
                .users(2)
                .think_time(Duration::from_millis(1))
                .build()
                .unwrap(),
        );
        let handle = orchestrator.interrupt_handle();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.interrupt();
        });

        let summary = orchestrator
            .run(vec![TaskDefinition::new("t", |_ctx| async { Ok(()) })])
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::Interrupt);
        assert_eq!(
            summary.records_written,
            summary.users.iter().map(|u| u.records).sum::<u64>()
        );
    }

    #[tokio::test]
    async fn test_duration_beyond_clock_range_runs_until_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path())
            .users(1)
            .duration(Duration::from_secs(u64::MAX))
            .think_time(Duration::from_millis(1))
            .build()
            .unwrap();
        let orchestrator = Orchestrator::new(cfg);
        let handle = orchestrator.interrupt_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.interrupt();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run(vec![TaskDefinition::new("t", |_ctx| async { Ok(()) })]),
        )
        .await
        .expect("run stops after the interrupt")
        .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Interrupt);
    }

    /// Accepts the header, then fails every later write.
    struct FullDisk {
        remaining: usize,
    }

    impl std::io::Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if buf.len() > self.remaining {
                return Err(std::io::Error::other("no space left on device"));
            }
            self.remaining -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_write_failure_fails_the_run() {
        let writer = FullDisk {
            remaining: crate::sink::CSV_HEADER.len() + 1,
        };
        let sink = ResultSink::from_writer(PathBuf::from("full.csv"), Box::new(writer)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path())
            .users(3)
            .think_time(Duration::from_millis(1))
            .build()
            .unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(None::<RunContext>));
        let slot = seen.clone();
        let task = TaskDefinition::new("t", move |ctx: RunContext| {
            let _ = slot.lock().get_or_insert(ctx);
            async { Ok(()) }
        });
        let tasks: Arc<[TaskDefinition<()>]> = Arc::from(vec![task]);

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            Orchestrator::new(cfg).drive(tasks, None, sink),
        )
        .await
        .expect("run drains after the sink failure")
        .unwrap_err();

        assert!(matches!(err, StampedeError::SinkWrite { .. }), "got: {err}");
        let ctx = seen.lock().clone().expect("task ran at least once");
        assert!(ctx.is_cancelled());
    }
}
