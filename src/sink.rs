//! Durable CSV persistence of result records.
//!
//! One [`ResultSink`] owns the results file for a run. Any number of
//! [`sink_worker`] tasks share it: each pulls records from the primary queue,
//! appends them under the sink's single lock, and forwards each persisted
//! record to the visualizer queue.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, SecondsFormat};
use parking_lot::Mutex;

use crate::context::RunContext;
use crate::error::StampedeError;
use crate::record::ResultRecord;

/// Header row of every results file.
pub const CSV_HEADER: &str =
    "timestamp,threadID,status,duration (ms),label,responseMessage,bytes,success,error";

/// Suffix appended to the timestamp in results file names.
pub const RESULTS_FILE_SUFFIX: &str = "_results.csv";

/// Append-only CSV writer shared by all sink workers.
pub struct ResultSink {
    path: PathBuf,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    written: AtomicU64,
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("path", &self.path)
            .field("written", &self.records_written())
            .finish_non_exhaustive()
    }
}

impl ResultSink {
    /// Creates `<dir>/<YYYY-MM-DD_HH-MM-SS>_results.csv` named after the
    /// current local time.
    pub fn create(dir: &Path) -> Result<Self, StampedeError> {
        Self::create_at(dir.join(results_file_name(Local::now())))
    }

    /// Creates the results file at an explicit path and writes the header.
    ///
    /// Fails with [`StampedeError::SinkCreate`] if the file already exists.
    pub fn create_at(path: impl Into<PathBuf>) -> Result<Self, StampedeError> {
        let path = path.into();
        let create_err = |source| StampedeError::SinkCreate {
            source,
            path: path.clone(),
        };

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(create_err)?;
        let sink = Self::from_writer(path, Box::new(BufWriter::new(file)))?;

        tracing::debug!(path = %sink.path.display(), "results file created");
        Ok(sink)
    }

    /// Wraps an arbitrary writer, writing the header first. `path` is only
    /// used for reporting.
    pub(crate) fn from_writer(
        path: PathBuf,
        mut writer: Box<dyn Write + Send>,
    ) -> Result<Self, StampedeError> {
        writeln!(writer, "{CSV_HEADER}")
            .and_then(|()| writer.flush())
            .map_err(|source| StampedeError::SinkCreate {
                source,
                path: path.clone(),
            })?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
            written: AtomicU64::new(0),
        })
    }

    /// Path of the results file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a CSV row and flushes it.
    pub fn append(&self, record: &ResultRecord) -> Result<(), StampedeError> {
        let row = format_row(record);
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| StampedeError::SinkClosed {
            path: self.path.clone(),
        })?;
        writer
            .write_all(row.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|source| StampedeError::SinkWrite {
                source,
                path: self.path.clone(),
            })?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of rows written, excluding the header.
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Flushes and releases the file. Later appends fail with
    /// [`StampedeError::SinkClosed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), StampedeError> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush().map_err(|source| StampedeError::SinkWrite {
                source,
                path: self.path.clone(),
            })?;
            tracing::debug!(
                path = %self.path.display(),
                rows = self.records_written(),
                "results file closed"
            );
        }
        Ok(())
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }
}

/// File name for a run started at `started`.
pub fn results_file_name(started: DateTime<Local>) -> String {
    format!(
        "{}{RESULTS_FILE_SUFFIX}",
        started.format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Serializes a record as one newline-terminated CSV row.
pub fn format_row(record: &ResultRecord) -> String {
    let status = record.status.map(|s| s.to_string()).unwrap_or_default();
    let bytes = record.bytes.map(|b| b.to_string()).unwrap_or_default();
    format!(
        "{},{},{},{:.2},{},{},{},{},{}\n",
        record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        record.thread_id,
        status,
        record.duration_ms(),
        csv_escape(&record.label),
        csv_escape(record.response_message.as_deref().unwrap_or("")),
        bytes,
        record.success,
        csv_escape(&record.error),
    )
}

/// Quotes a field if it contains a comma, quote or line break, doubling
/// embedded quotes.
pub fn csv_escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Drains the primary queue into the sink until the queue is closed and
/// empty.
///
/// Each persisted record is forwarded to `forward` when present. If the
/// receiving side is gone, forwarding stops and persistence continues.
///
/// A write failure cancels the run and is returned; no retry is attempted.
/// Returns the number of records this worker wrote.
pub async fn sink_worker(
    worker_id: usize,
    sink: Arc<ResultSink>,
    records: flume::Receiver<ResultRecord>,
    mut forward: Option<flume::Sender<ResultRecord>>,
    ctx: RunContext,
) -> Result<u64, StampedeError> {
    let mut written = 0u64;

    while let Ok(record) = records.recv_async().await {
        if let Err(err) = sink.append(&record) {
            tracing::error!(worker_id, error = %err, "sink write failed, cancelling run");
            ctx.cancel();
            return Err(err);
        }
        written += 1;

        if let Some(tx) = &forward {
            if tx.send_async(record).await.is_err() {
                tracing::debug!(worker_id, "visualizer queue closed, forwarding stopped");
                forward = None;
            }
        }
    }

    tracing::debug!(worker_id, written, "sink worker drained");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn record(label: &str, success: bool, error: &str) -> ResultRecord {
        ResultRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            thread_id: 2,
            label: label.to_string(),
            duration: Duration::from_micros(12_340),
            status: None,
            bytes: None,
            response_message: None,
            success,
            error: error.to_string(),
        }
    }

    #[test]
    fn test_format_row_plain() {
        let row = format_row(&record("GET - /", true, ""));
        assert_eq!(row, "2024-03-09T14:05:07Z,2,,12.34,GET - /,,,true,\n");
    }

    #[test]
    fn test_format_row_with_meta_and_escaping() {
        let mut r = record("search, page 1", false, "bad \"token\"");
        r.status = Some(401);
        r.bytes = Some(17);
        r.response_message = Some("Unauthorized".to_string());

        assert_eq!(
            format_row(&r),
            "2024-03-09T14:05:07Z,2,401,12.34,\"search, page 1\",Unauthorized,17,false,\"bad \"\"token\"\"\"\n"
        );
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("two\nlines"), "\"two\nlines\"");
        assert!(matches!(csv_escape("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_results_file_name() {
        let started = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            results_file_name(started),
            "2024-01-02_03-04-05_results.csv"
        );
    }

    #[test]
    fn test_create_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::create(dir.path()).unwrap();

        assert!(sink.path().starts_with(dir.path()));
        assert!(sink
            .path()
            .to_string_lossy()
            .ends_with(RESULTS_FILE_SUFFIX));
        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content, format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken_results.csv");
        std::fs::write(&path, "keep me").unwrap();

        let err = ResultSink::create_at(&path).unwrap_err();
        assert!(matches!(err, StampedeError::SinkCreate { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResultSink::create(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_append_is_visible_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::create_at(dir.path().join("r.csv")).unwrap();
        sink.append(&record("a", true, "")).unwrap();
        sink.append(&record("b", false, "boom")).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert_eq!(sink.records_written(), 2);
    }

    #[test]
    fn test_append_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = ResultSink::create_at(dir.path().join("r.csv")).unwrap();
        sink.append(&record("a", true, "")).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();

        assert!(sink.is_closed());
        let err = sink.append(&record("late", true, "")).unwrap_err();
        assert!(matches!(err, StampedeError::SinkClosed { .. }));

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_workers_drain_queue_and_forward() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(ResultSink::create_at(dir.path().join("r.csv")).unwrap());
        let (tx, rx) = flume::bounded(5);
        let (fwd_tx, fwd_rx) = flume::unbounded();
        let ctx = RunContext::new();

        let workers: Vec<_> = (0..3)
            .map(|id| {
                tokio::spawn(sink_worker(
                    id,
                    sink.clone(),
                    rx.clone(),
                    Some(fwd_tx.clone()),
                    ctx.clone(),
                ))
            })
            .collect();
        drop(rx);
        drop(fwd_tx);

        for i in 0..20 {
            tx.send_async(record(&format!("t{i}"), true, "")).await.unwrap();
        }
        drop(tx);

        let mut total = 0;
        for worker in workers {
            total += worker.await.unwrap().unwrap();
        }

        assert_eq!(total, 20);
        assert_eq!(sink.records_written(), 20);
        assert_eq!(fwd_rx.drain().count(), 20);
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_worker_keeps_persisting_after_visualizer_leaves() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(ResultSink::create_at(dir.path().join("r.csv")).unwrap());
        let (tx, rx) = flume::bounded(5);
        let (fwd_tx, fwd_rx) = flume::bounded(1);
        drop(fwd_rx);

        let ctx = RunContext::new();
        let worker = tokio::spawn(sink_worker(0, sink.clone(), rx, Some(fwd_tx), ctx));
        for i in 0..4 {
            tx.send_async(record(&format!("t{i}"), true, "")).await.unwrap();
        }
        drop(tx);

        assert_eq!(worker.await.unwrap().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_write_failure_cancels_run() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(ResultSink::create_at(dir.path().join("r.csv")).unwrap());
        sink.close().unwrap();

        let (tx, rx) = flume::bounded(1);
        let ctx = RunContext::new();
        let worker = tokio::spawn(sink_worker(0, sink, rx, None, ctx.clone()));
        tx.send_async(record("a", true, "")).await.unwrap();

        let err = worker.await.unwrap().unwrap_err();
        assert!(matches!(err, StampedeError::SinkClosed { .. }));
        assert!(ctx.is_cancelled());
    }
}
