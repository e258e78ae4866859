use std::fmt;
use std::io::Write;
use std::sync::Arc;

use rust_data_loader::execution::{
    CancellationToken, LoadCoordinator, LoadObserver, LoadOptions, LoadStatus, ProgressEvent,
};
use rust_data_loader::ingestion::{
    probe_schema, EncodedBatch, ErrorRecord, FileErrorSink, MemoryErrorSink,
};
use rust_data_loader::sink::{MemorySink, Sink};
use rust_data_loader::types::Column;
use rust_data_loader::{LoadError, SinkError};
use tempfile::NamedTempFile;

fn numbered_file(rows: usize) -> NamedTempFile {
    let mut text = String::from("id,label,ratio\n");
    for i in 0..rows {
        text.push_str(&format!("{i},row {i},{}.5\n", i % 97));
    }
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(text.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

fn opts(batch_size: usize) -> LoadOptions {
    LoadOptions {
        batch_size,
        ..LoadOptions::default()
    }
}

#[test]
fn mismatched_row_is_diverted_and_run_completes() {
    let coordinator = LoadCoordinator::new(LoadOptions::default());
    let mut sink = MemorySink::new();
    let errors = MemoryErrorSink::new();

    let summary = coordinator
        .run("tests/fixtures/people_mismatch.csv", "people", &mut sink, &mut errors.clone())
        .unwrap();

    assert_eq!(summary.status, LoadStatus::Completed);
    assert_eq!(summary.processed_rows, 2);
    assert_eq!(summary.total_rows, Some(2));
    assert_eq!(summary.rejected_rows, 1);

    let records = errors.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].relation, "people");
    assert_eq!(records[0].line, 3);
    assert_eq!(records[0].raw, "2,Grace,91");
    assert!(records[0].reason.contains("expected 4 fields, found 3"));

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].statement,
        "INSERT INTO \"people\" (\"id\", \"name\", \"score\", \"active\") VALUES \
         (1, 'Ada', 98.5, TRUE), (3, 'Linus', 77.25, FALSE)"
    );
}

#[test]
fn relation_is_created_with_probed_columns() {
    let coordinator = LoadCoordinator::new(LoadOptions::default());
    let mut sink = MemorySink::new();
    coordinator
        .run("tests/fixtures/transactions.csv", "tx", &mut sink, &mut MemoryErrorSink::new())
        .unwrap();

    let relations = sink.relations();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].name, "tx");
    assert_eq!(
        relations[0].columns,
        probe_schema("tests/fixtures/transactions.csv").unwrap().columns
    );
}

/// Requests cancellation from inside the run once enough rows went through.
struct CancelAt {
    token: CancellationToken,
    rows: u64,
}

impl LoadObserver for CancelAt {
    fn on_event(&self, event: &ProgressEvent) {
        if event.status == LoadStatus::Streaming && event.processed_rows >= self.rows {
            self.token.cancel();
        }
    }
}

#[test]
fn cancelling_a_large_load_stops_on_a_chunk_boundary() {
    let file = numbered_file(200_000);
    let coordinator = LoadCoordinator::new(opts(10_000));
    let observer = Arc::new(CancelAt {
        token: coordinator.cancellation_token(),
        rows: 25_000,
    });
    let coordinator = coordinator.with_observer(observer);
    let sink = MemorySink::new();

    let handle = coordinator.spawn(file.path(), "numbers", sink.clone(), MemoryErrorSink::new());
    let events: Vec<ProgressEvent> = handle.events().iter().collect();
    let summary = handle.join().unwrap();

    assert_eq!(summary.status, LoadStatus::Cancelled);
    assert_eq!(summary.processed_rows, 30_000);
    assert_eq!(summary.processed_rows % 10_000, 0);
    assert!(summary.processed_rows < summary.total_rows.unwrap());
    assert_eq!(summary.total_rows, Some(200_000));
    assert_eq!(sink.rows_written(), 30_000);

    let last = events.last().unwrap();
    assert_eq!(last.status, LoadStatus::Cancelled);
    assert!(events.iter().all(|e| e.status != LoadStatus::Failed));
}

#[test]
fn spawned_load_streams_events_until_completion() {
    let file = numbered_file(1_000);
    let handle = LoadCoordinator::new(opts(300)).spawn(
        file.path(),
        "numbers",
        MemorySink::new(),
        MemoryErrorSink::new(),
    );

    let events: Vec<ProgressEvent> = handle.events().iter().collect();
    let summary = handle.join().unwrap();
    assert_eq!(summary.status, LoadStatus::Completed);
    assert_eq!(summary.processed_rows, 1_000);

    assert!(events
        .windows(2)
        .all(|w| w[0].processed_rows <= w[1].processed_rows));
    assert!(events
        .iter()
        .all(|e| e.total_rows.map_or(true, |t| e.processed_rows <= t)));
    assert!(events.iter().all(|e| e.batch_size == 300));

    let streamed: Vec<u64> = events
        .iter()
        .filter(|e| e.status == LoadStatus::Streaming)
        .map(|e| e.processed_rows)
        .collect();
    assert_eq!(streamed, vec![0, 300, 600, 900, 1_000]);

    let last = events.last().unwrap();
    assert_eq!(last.status, LoadStatus::Completed);
    assert_eq!(last.total_rows, Some(1_000));
}

#[derive(Debug)]
struct DiskFull;

impl fmt::Display for DiskFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("disk full")
    }
}

impl std::error::Error for DiskFull {}

/// Accepts `ok_writes` batches, then fails every write.
struct FailingSink {
    inner: MemorySink,
    ok_writes: usize,
}

impl Sink for FailingSink {
    fn create_relation(&mut self, name: &str, columns: &[Column]) -> Result<(), SinkError> {
        self.inner.create_relation(name, columns)
    }

    fn write_batch(&mut self, relation: &str, batch: &EncodedBatch) -> Result<(), SinkError> {
        if self.inner.batches().len() >= self.ok_writes {
            return Err(Box::new(DiskFull));
        }
        self.inner.write_batch(relation, batch)
    }
}

#[test]
fn sink_failure_stops_the_run_and_is_returned_verbatim() {
    let file = numbered_file(50);
    let coordinator = LoadCoordinator::new(opts(10));
    let mut sink = FailingSink {
        inner: MemorySink::new(),
        ok_writes: 2,
    };

    let err = coordinator
        .run(file.path(), "numbers", &mut sink, &mut MemoryErrorSink::new())
        .unwrap_err();

    match &err {
        LoadError::SinkWrite { relation, source } => {
            assert_eq!(relation, "numbers");
            assert!(source.downcast_ref::<DiskFull>().is_some());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(sink.inner.rows_written(), 20);

    let snapshot = coordinator.metrics().snapshot();
    assert_eq!(snapshot.status, LoadStatus::Failed);
    assert_eq!(snapshot.processed_rows, 20);
    assert_eq!(snapshot.chunks_written, 2);
}

#[test]
fn empty_source_never_touches_the_sink() {
    let coordinator = LoadCoordinator::new(LoadOptions::default());
    let mut sink = MemorySink::new();
    let errors = MemoryErrorSink::new();

    let err = coordinator
        .run("tests/fixtures/header_only.csv", "empty", &mut sink, &mut errors.clone())
        .unwrap_err();
    assert!(matches!(err, LoadError::EmptySource { .. }));
    assert!(sink.relations().is_empty());
    assert!(sink.batches().is_empty());
    assert!(errors.is_empty());
}

#[test]
fn rejected_rows_are_appended_to_an_error_file() {
    let dir = tempfile::tempdir().unwrap();
    let error_path = dir.path().join("people.errors.jsonl");
    let mut errors = FileErrorSink::new(&error_path);

    let summary = LoadCoordinator::new(LoadOptions::default())
        .run("tests/fixtures/people_mismatch.csv", "people", &mut MemorySink::new(), &mut errors)
        .unwrap();
    assert_eq!(summary.rejected_rows, 1);

    let text = std::fs::read_to_string(&error_path).unwrap();
    let records: Vec<ErrorRecord> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].line, 3);
}

#[test]
fn carriage_return_files_load_fully() {
    let mut f = NamedTempFile::new().unwrap();
    write!(f, "a;b\r1;x\r2;y\r3;z").unwrap();
    f.flush().unwrap();

    let mut sink = MemorySink::new();
    let summary = LoadCoordinator::new(opts(2))
        .run(f.path(), "legacy", &mut sink, &mut MemoryErrorSink::new())
        .unwrap();
    assert_eq!(summary.status, LoadStatus::Completed);
    assert_eq!(summary.processed_rows, 3);
    assert_eq!(sink.batches().len(), 2);
    assert!(sink.batches()[1].statement.ends_with("(3, 'z')"));
}

#[test]
fn stream_load_uses_the_given_schema() {
    let file = numbered_file(5);
    let schema = probe_schema(file.path()).unwrap();
    let mut sink = MemorySink::new();

    let summary = LoadCoordinator::new(opts(2))
        .stream_load(file.path(), &schema, "numbers", &mut sink, &mut MemoryErrorSink::new())
        .unwrap();
    assert_eq!(summary.status, LoadStatus::Completed);
    assert_eq!(summary.schema, schema);
    assert_eq!(sink.rows_written(), 5);
}

#[test]
fn text_values_reach_the_sink_unchanged() {
    let mut f = NamedTempFile::new().unwrap();
    write!(f, "id,note\n1,  padded  \n2,it's\n3,\n4,   \n").unwrap();
    f.flush().unwrap();

    let mut sink = MemorySink::new();
    LoadCoordinator::new(LoadOptions::default())
        .run(f.path(), "notes", &mut sink, &mut MemoryErrorSink::new())
        .unwrap();

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].statement,
        "INSERT INTO \"notes\" (\"id\", \"note\") VALUES \
         (1, '  padded  '), (2, 'it''s'), (3, NULL), (4, '   ')"
    );
}

#[test]
fn a_coordinator_can_be_reused_after_cancellation() {
    let file = numbered_file(50);
    let coordinator = LoadCoordinator::new(opts(10));
    coordinator.request_cancel();

    let first = MemorySink::new();
    let summary = coordinator
        .run(file.path(), "numbers", &mut first.clone(), &mut MemoryErrorSink::new())
        .unwrap();
    assert_eq!(summary.status, LoadStatus::Completed);

    let second = MemorySink::new();
    let summary = coordinator
        .run(file.path(), "numbers", &mut second.clone(), &mut MemoryErrorSink::new())
        .unwrap();
    assert_eq!(summary.status, LoadStatus::Completed);
    assert_eq!(second.rows_written(), 50);

    let snap = coordinator.metrics().snapshot();
    assert_eq!(snap.run_id, 2);
    assert_eq!(snap.chunks_written, 5);
}

#[test]
fn concurrent_loads_do_not_share_cancellation() {
    let file = numbered_file(5_000);
    let kept_sink = MemorySink::new();
    let kept = LoadCoordinator::new(opts(500)).spawn(
        file.path(),
        "kept",
        kept_sink.clone(),
        MemoryErrorSink::new(),
    );
    let stopping = LoadCoordinator::new(opts(500));
    let observer = Arc::new(CancelAt {
        token: stopping.cancellation_token(),
        rows: 1_000,
    });
    let stopped_sink = MemorySink::new();
    let stopped = stopping.with_observer(observer).spawn(
        file.path(),
        "stopped",
        stopped_sink.clone(),
        MemoryErrorSink::new(),
    );

    let stopped_summary = stopped.join().unwrap();
    let kept_summary = kept.join().unwrap();

    assert_eq!(stopped_summary.status, LoadStatus::Cancelled);
    assert_eq!(stopped_summary.processed_rows, 1_000);
    assert_eq!(stopped_sink.rows_written(), 1_000);

    assert_eq!(kept_summary.status, LoadStatus::Completed);
    assert_eq!(kept_summary.processed_rows, 5_000);
    assert_eq!(kept_sink.rows_written(), 5_000);
}
