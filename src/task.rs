//! Task units: a user-supplied action plus an optional success criterion.
//!
//! A [`TaskDefinition`] is generic over the value `V` its action produces.
//! The pipeline never looks inside `V`; it only hands it to the task's own
//! expectation check and response-metadata hook.
//!
//! [`TaskDefinition::execute_once`] never fails and never panics: execution
//! errors, expectation failures and panics inside user code (the action, the
//! expectation or the metadata hook) are all encoded into the returned
//! [`ResultRecord`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;

use crate::context::RunContext;
use crate::record::{ResponseMeta, ResultRecord};

/// The unit of work. Receives the run context and produces a value or error.
pub type ExecuteFn<V> =
    Arc<dyn Fn(RunContext) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

/// Expectation check. Its verdict overrides the raw execution result.
pub type ExpectFn<V> =
    Arc<dyn Fn(&RunContext, &anyhow::Result<V>) -> anyhow::Result<()> + Send + Sync>;

/// Extracts status, size and message from a successful value.
pub type ResponseMetaFn<V> = Arc<dyn Fn(&V) -> ResponseMeta + Send + Sync>;

/// A caller-supplied, repeatable unit of work.
///
/// # Example
///
/// ```
/// use stampede::task::TaskDefinition;
///
/// let task = TaskDefinition::new("lookup", |_ctx| async { Ok("1".to_string()) })
///     .with_expect(|_ctx, outcome| match outcome {
///         Ok(value) if value == "1" => Ok(()),
///         Ok(value) => Err(anyhow::anyhow!("unexpected value {value}")),
///         Err(err) => Err(anyhow::anyhow!("{err}")),
///     });
/// assert_eq!(task.label(), "lookup");
/// ```
pub struct TaskDefinition<V> {
    label: String,
    execute: ExecuteFn<V>,
    expect: Option<ExpectFn<V>>,
    response_meta: Option<ResponseMetaFn<V>>,
}

impl<V> Clone for TaskDefinition<V> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            execute: Arc::clone(&self.execute),
            expect: self.expect.clone(),
            response_meta: self.response_meta.clone(),
        }
    }
}

impl<V> std::fmt::Debug for TaskDefinition<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("label", &self.label)
            .field("has_expect", &self.expect.is_some())
            .field("has_response_meta", &self.response_meta.is_some())
            .finish()
    }
}

impl<V: Send + 'static> TaskDefinition<V> {
    /// Creates a task from a label and an async action.
    ///
    /// An empty label is replaced with a generated one when the run starts.
    pub fn new<F, Fut>(label: impl Into<String>, execute: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let execute: ExecuteFn<V> = Arc::new(move |ctx| Box::pin(execute(ctx)));
        Self {
            label: label.into(),
            execute,
            expect: None,
            response_meta: None,
        }
    }

    /// Sets the expectation check.
    ///
    /// When present it is the sole arbiter of success: returning `Ok(())`
    /// marks the execution successful even if the action failed, and
    /// returning an error marks it failed even if the action succeeded.
    pub fn with_expect<F>(mut self, expect: F) -> Self
    where
        F: Fn(&RunContext, &anyhow::Result<V>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.expect = Some(Arc::new(expect));
        self
    }

    /// Sets the hook that fills status, bytes and message from a value.
    pub fn with_response_meta<F>(mut self, meta: F) -> Self
    where
        F: Fn(&V) -> ResponseMeta + Send + Sync + 'static,
    {
        self.response_meta = Some(Arc::new(meta));
        self
    }

    /// Replaces the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Executes the task once and returns its record.
    pub async fn execute_once(&self, ctx: &RunContext, thread_id: u32) -> ResultRecord {
        let timestamp = Utc::now();
        let start = Instant::now();

        let task_panicked = |payload: Box<dyn Any + Send>| {
            Err(anyhow::anyhow!(
                "task panicked: {}",
                panic_message(payload.as_ref())
            ))
        };
        let spawned = std::panic::catch_unwind(AssertUnwindSafe(|| (self.execute)(ctx.clone())));
        let outcome = match spawned {
            Ok(future) => AssertUnwindSafe(future)
                .catch_unwind()
                .await
                .unwrap_or_else(task_panicked),
            Err(payload) => task_panicked(payload),
        };
        let duration = start.elapsed();

        let meta = match (&outcome, &self.response_meta) {
            (Ok(value), Some(hook)) => std::panic::catch_unwind(AssertUnwindSafe(|| hook(value)))
                .map_err(|payload| {
                    format!(
                        "response metadata panicked: {}",
                        panic_message(payload.as_ref())
                    )
                }),
            _ => Ok(ResponseMeta::default()),
        };

        // A panicking metadata hook fails the execution whatever the verdict.
        let (meta, verdict) = match meta {
            Ok(meta) => (meta, self.verdict(ctx, &outcome)),
            Err(panicked) => (ResponseMeta::default(), Err(panicked)),
        };

        ResultRecord {
            timestamp,
            thread_id,
            label: self.label.clone(),
            duration,
            status: meta.status,
            bytes: meta.bytes,
            response_message: meta.message,
            success: verdict.is_ok(),
            error: verdict.err().unwrap_or_default(),
        }
    }

    /// Resolves the effective error: the expectation's verdict if present,
    /// otherwise the raw execution error.
    fn verdict(&self, ctx: &RunContext, outcome: &anyhow::Result<V>) -> Result<(), String> {
        match &self.expect {
            Some(expect) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| expect(ctx, outcome))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(format!("{err:#}")),
                    Err(payload) => Err(format!(
                        "expectation panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                }
            }
            None => match outcome {
                Ok(_) => Ok(()),
                Err(err) => Err(format!("{err:#}")),
            },
        }
    }
}

impl<V> TaskDefinition<V> {
    /// The task label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns `true` if an expectation check is attached.
    pub fn has_expectation(&self) -> bool {
        self.expect.is_some()
    }
}

/// Assigns `task-<n>` (1-based position) to every task with a blank label.
pub(crate) fn normalize_labels<V>(tasks: &mut [TaskDefinition<V>]) {
    for (idx, task) in tasks.iter_mut().enumerate() {
        if task.label.trim().is_empty() {
            task.label = format!("task-{}", idx + 1);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
