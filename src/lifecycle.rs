//! Run lifecycle control: process signals, interrupt relay and deadline.
//!
//! A single controller task per run owns every stop source. The first one
//! to fire cancels the [`RunContext`] and fixes the run's [`StopReason`];
//! anything arriving later is logged and ignored.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::error::StampedeError;

/// What ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured duration elapsed.
    Deadline,
    /// SIGINT, SIGTERM or Ctrl+C was received.
    Signal,
    /// An interrupt was relayed through an [`InterruptHandle`].
    Interrupt,
    /// The context was cancelled directly, e.g. after a sink failure.
    Cancelled,
    /// Every virtual user stopped on its own (no users, or no sink left).
    UsersFinished,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Deadline => "duration elapsed",
            Self::Signal => "signal received",
            Self::Interrupt => "interrupted",
            Self::Cancelled => "cancelled",
            Self::UsersFinished => "all users finished",
        };
        f.write_str(text)
    }
}

/// Lets a visualizer (or any caller) ask the run to stop without installing
/// its own signal handler.
///
/// Cheap to clone. Interrupting a run that is already stopping is a no-op.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: mpsc::Sender<()>,
}

impl InterruptHandle {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Requests a graceful stop of the run.
    pub fn interrupt(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Process signal listener, installed before any worker starts.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Registers SIGINT and SIGTERM handlers (Ctrl+C on other platforms).
    pub fn install() -> Result<Self, StampedeError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt()).map_err(StampedeError::Signal)?,
                terminate: signal(SignalKind::terminate()).map_err(StampedeError::Signal)?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                Some(()) = self.interrupt.recv() => "SIGINT",
                Some(()) = self.terminate.recv() => "SIGTERM",
                else => std::future::pending().await,
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            "Ctrl+C"
        }
    }
}

/// The running controller task.
pub(crate) struct Controller {
    stop: CancellationToken,
    handle: JoinHandle<StopReason>,
}

impl Controller {
    /// Spawns the controller for `ctx`.
    pub(crate) fn spawn(
        ctx: RunContext,
        relay: mpsc::Receiver<()>,
        signals: Option<SignalListener>,
    ) -> Self {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(control_loop(ctx, relay, signals, stop.clone()));
        Self { stop, handle }
    }

    /// Stops the controller and returns the recorded stop reason.
    pub(crate) async fn finish(self) -> StopReason {
        self.stop.cancel();
        self.handle.await.unwrap_or(StopReason::Cancelled)
    }
}

async fn control_loop(
    ctx: RunContext,
    mut relay: mpsc::Receiver<()>,
    mut signals: Option<SignalListener>,
    stop: CancellationToken,
) -> StopReason {
    let mut reason: Option<StopReason> = None;

    loop {
        tokio::select! {
            biased;

            name = next_signal(&mut signals) => {
                request_stop(&ctx, &mut reason, StopReason::Signal, name);
            }
            Some(()) = relay.recv() => {
                request_stop(&ctx, &mut reason, StopReason::Interrupt, "interrupt");
            }
            _ = ctx.cancelled(), if reason.is_none() => {
                let observed = if ctx.deadline_passed() {
                    StopReason::Deadline
                } else {
                    StopReason::Cancelled
                };
                tracing::info!(reason = %observed, "stopping run");
                reason = Some(observed);
                ctx.cancel();
            }
            _ = stop.cancelled() => break,
        }
    }

    reason.unwrap_or(StopReason::UsersFinished)
}

async fn next_signal(signals: &mut Option<SignalListener>) -> &'static str {
    match signals {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

fn request_stop(
    ctx: &RunContext,
    reason: &mut Option<StopReason>,
    requested: StopReason,
    source: &'static str,
) {
    match reason {
        None => {
            tracing::info!(source, "stop requested, draining in-flight work");
            *reason = Some(requested);
            ctx.cancel();
        }
        Some(_) => {
            tracing::warn!(source, "stop already in progress, ignoring");
        }
    }
}
