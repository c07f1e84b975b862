//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use stampede::sink::CSV_HEADER;
use stampede::{ResultRecord, TestConfig, TestConfigBuilder, Visualizer, VisualizerContext};

/// One parsed row of a results file.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: String,
    pub thread_id: u32,
    pub status: Option<u16>,
    pub duration_ms: f64,
    pub label: String,
    pub response_message: String,
    pub bytes: Option<u64>,
    pub success: bool,
    pub error: String,
}

/// Splits CSV text into records of fields, honouring quoted fields with
/// doubled quotes and embedded line breaks.
pub fn parse_csv(content: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            ('\n', false) => {
                fields.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut fields));
            }
            (c, _) => field.push(c),
        }
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }
    records
}

/// Reads a results file, checks its header and parses every data row.
///
/// Panics if any row does not have exactly nine well-formed fields.
pub fn read_rows(path: &Path) -> Vec<Row> {
    let content = std::fs::read_to_string(path).unwrap();
    assert!(content.ends_with('\n'), "file must end with a complete row");
    let mut records = parse_csv(&content).into_iter();
    let header = records.next().expect("header row");
    assert_eq!(header.join(","), CSV_HEADER);

    records
        .map(|fields| {
            assert_eq!(fields.len(), 9, "malformed row: {fields:?}");
            chrono::DateTime::parse_from_rfc3339(&fields[0]).expect("RFC 3339 timestamp");
            Row {
                timestamp: fields[0].clone(),
                thread_id: fields[1].parse().unwrap(),
                status: (!fields[2].is_empty()).then(|| fields[2].parse().unwrap()),
                duration_ms: fields[3].parse().unwrap(),
                label: fields[4].clone(),
                response_message: fields[5].clone(),
                bytes: (!fields[6].is_empty()).then(|| fields[6].parse().unwrap()),
                success: fields[7].parse().unwrap(),
                error: fields[8].clone(),
            }
        })
        .collect()
}

/// Config builder writing into `dir` without touching process signals.
pub fn config_in(dir: &Path) -> TestConfigBuilder {
    TestConfig::builder().output_dir(dir).handle_signals(false)
}

/// Visualizer that stores every record it receives.
#[derive(Clone, Default)]
pub struct CollectingVisualizer {
    pub seen: Arc<Mutex<Vec<ResultRecord>>>,
}

#[async_trait]
impl Visualizer for CollectingVisualizer {
    async fn run(self: Box<Self>, records: flume::Receiver<ResultRecord>, _ctx: VisualizerContext) {
        while let Ok(record) = records.recv_async().await {
            self.seen.lock().push(record);
        }
    }
}

/// Visualizer that stops receiving after `limit` records.
pub struct QuittingVisualizer {
    pub limit: usize,
}

#[async_trait]
impl Visualizer for QuittingVisualizer {
    async fn run(self: Box<Self>, records: flume::Receiver<ResultRecord>, _ctx: VisualizerContext) {
        for _ in 0..self.limit {
            if records.recv_async().await.is_err() {
                break;
            }
        }
    }
}

/// Visualizer that relays an interrupt after the first record, as a
/// keyboard-driven view would on a quit key.
pub struct InterruptingVisualizer;

#[async_trait]
impl Visualizer for InterruptingVisualizer {
    async fn run(self: Box<Self>, records: flume::Receiver<ResultRecord>, ctx: VisualizerContext) {
        let mut first = true;
        while records.recv_async().await.is_ok() {
            if first {
                ctx.interrupt.interrupt();
                first = false;
            }
        }
    }
}
