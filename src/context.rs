//! Shared cancellation context for one test run.
//!
//! [`RunContext`] pairs a [`CancellationToken`] with an optional absolute
//! deadline. A run is over once either the token is cancelled (external
//! signal, interrupt relay, fatal sink error) or the deadline has passed.
//! [`RunContext::is_cancelled`] compares against the deadline itself, so it
//! reports the end of the run even before the controller task has cancelled
//! the token.

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation context handed to every virtual user and task execution.
///
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    /// Creates a context that only ends when cancelled.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Creates a context that also ends at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Returns the absolute deadline, if the run has one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the underlying token, e.g. to hand to a client library.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancels the run. Idempotent: repeated calls have no further effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the run was cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline_passed()
    }

    /// Returns `true` if the deadline exists and has passed.
    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Completes when the run is cancelled or the deadline is reached.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
