//! The result record produced by every task execution.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Response details a task can attach to its record.
///
/// Returned by a task's response-metadata hook
/// (see [`TaskDefinition::with_response_meta`](crate::task::TaskDefinition::with_response_meta)).
/// All fields are optional; absent values are written as empty CSV fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Protocol-specific status code (e.g., an HTTP status).
    pub status: Option<u16>,
    /// Size of the response payload in bytes.
    pub bytes: Option<u64>,
    /// Short human-readable response message.
    pub message: Option<String>,
}

impl ResponseMeta {
    /// Metadata carrying only a status code.
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Sets the payload size.
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    /// Sets the response message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Immutable outcome of a single task execution.
///
/// Exactly one record is produced per execution. Records are moved by value
/// through the pipeline queues; no consumer mutates them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    /// Wall-clock time at which the execution started.
    pub timestamp: DateTime<Utc>,
    /// Index of the virtual user that produced the record.
    pub thread_id: u32,
    /// Label of the task that was executed.
    pub label: String,
    /// Elapsed time of the execution.
    pub duration: Duration,
    /// Protocol-specific status code, if the task reported one.
    pub status: Option<u16>,
    /// Payload size in bytes, if the task reported one.
    pub bytes: Option<u64>,
    /// Response message, if the task reported one.
    pub response_message: Option<String>,
    /// `true` iff the effective error is absent.
    pub success: bool,
    /// Effective error message; empty on success.
    pub error: String,
}

impl ResultRecord {
    /// Duration in fractional milliseconds, as persisted.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    /// Returns `true` if the record carries an error message.
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(duration: Duration, error: &str) -> ResultRecord {
        ResultRecord {
            timestamp: Utc::now(),
            thread_id: 0,
            label: "ping".to_string(),
            duration,
            status: None,
            bytes: None,
            response_message: None,
            success: error.is_empty(),
            error: error.to_string(),
        }
    }

    #[test]
    fn test_duration_ms_keeps_fraction() {
        let r = record(Duration::from_micros(12_345), "");
        assert!((r.duration_ms() - 12.345).abs() < 1e-9);
    }

    #[test]
    fn test_has_error() {
        assert!(!record(Duration::ZERO, "").has_error());
        assert!(record(Duration::ZERO, "timeout").has_error());
    }

    #[test]
    fn test_response_meta_builder() {
        let meta = ResponseMeta::status(201)
            .with_bytes(512)
            .with_message("created");
        assert_eq!(meta.status, Some(201));
        assert_eq!(meta.bytes, Some(512));
        assert_eq!(meta.message.as_deref(), Some("created"));
        assert_eq!(ResponseMeta::default().status, None);
    }
}
