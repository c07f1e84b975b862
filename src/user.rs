//! Virtual user loop.
//!
//! Each virtual user runs the full task list in declaration order, sends
//! every record to the primary queue as soon as it is produced, then pauses
//! for the think time before the next pass. Cancellation is checked before
//! each pass and raced against the pause; a pass that has started is always
//! completed and all of its records are delivered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::RunContext;
use crate::record::ResultRecord;
use crate::task::TaskDefinition;

/// Lifecycle of one virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// Executing passes.
    Running,
    /// Cancellation observed or the queue closed; releasing resources.
    Stopping,
    /// Exited.
    Stopped,
}

/// Why a virtual user stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserExit {
    /// The run was cancelled or its deadline passed.
    Cancelled,
    /// Every sink worker exited, so records could no longer be delivered.
    QueueClosed,
}

/// Outcome of one virtual user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserReport {
    /// Index of the virtual user.
    pub user_id: u32,
    /// Number of full passes over the task list.
    pub passes: u64,
    /// Number of records delivered to the primary queue.
    pub records: u64,
    /// Reason for stopping.
    pub exit: UserExit,
}

/// Number of virtual users currently running.
///
/// Cheap to clone; all clones share one counter.
#[derive(Debug, Clone, Default)]
pub struct ActiveUserCounter(Arc<AtomicU32>);

impl ActiveUserCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count by one.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the count by one.
    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current number of running users.
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs one virtual user until the run is cancelled or the primary queue
/// closes.
///
/// `active` is incremented on entry and decremented on every exit path.
pub async fn user_loop<V: Send + 'static>(
    user_id: u32,
    tasks: Arc<[TaskDefinition<V>]>,
    think_time: Duration,
    results: flume::Sender<ResultRecord>,
    ctx: RunContext,
    active: ActiveUserCounter,
) -> UserReport {
    active.increment();

    let mut state = UserState::Running;
    let mut report = UserReport {
        user_id,
        passes: 0,
        records: 0,
        exit: UserExit::Cancelled,
    };

    loop {
        state = match state {
            UserState::Running if ctx.is_cancelled() => UserState::Stopping,
            UserState::Running => {
                match run_pass(user_id, &tasks, &results, &ctx, &mut report).await {
                    Pass::Completed => {
                        report.passes += 1;
                        pause(think_time, &ctx).await;
                        UserState::Running
                    }
                    Pass::QueueClosed => {
                        report.exit = UserExit::QueueClosed;
                        UserState::Stopping
                    }
                }
            }
            UserState::Stopping => {
                active.decrement();
                UserState::Stopped
            }
            UserState::Stopped => break,
        };
    }

    tracing::debug!(
        user_id,
        passes = report.passes,
        records = report.records,
        exit = ?report.exit,
        "virtual user stopped"
    );
    report
}

/// How a pass over the task list ended.
enum Pass {
    Completed,
    QueueClosed,
}

/// Executes every task once, in order. Stops early only if the queue is
/// closed.
async fn run_pass<V: Send + 'static>(
    user_id: u32,
    tasks: &[TaskDefinition<V>],
    results: &flume::Sender<ResultRecord>,
    ctx: &RunContext,
    report: &mut UserReport,
) -> Pass {
    for task in tasks {
        let record = task.execute_once(ctx, user_id).await;
        if results.send_async(record).await.is_err() {
            tracing::warn!(user_id, "result queue closed, stopping virtual user");
            return Pass::QueueClosed;
        }
        report.records += 1;
    }
    Pass::Completed
}

/// Sleeps for the think time unless cancelled first. A zero think time only
/// yields to the scheduler.
async fn pause(think_time: Duration, ctx: &RunContext) {
    if think_time.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(think_time) => {}
        _ = ctx.cancelled() => {}
    }
}
