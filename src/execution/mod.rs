//! Load coordinator: drives one run from probing to a terminal status.
//!
//! This module sits "above" [`crate::ingestion`] and provides:
//!
//! - The `Idle → Probing → Counting → Streaming → {Completed | Cancelled | Failed}` state machine
//! - Cooperative cancellation sampled between chunks
//! - Real-time metrics + observer hooks for monitoring
//!
//! Chunks are processed strictly in order: chunk N's write is accepted by the sink before
//! chunk N+1 is read.

mod cancel;
mod observer;
mod progress;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{LoadError, LoadResult};
use crate::ingestion::encode::BatchEncoder;
use crate::ingestion::error_sink::ErrorSink;
use crate::ingestion::parse::StreamingParser;
use crate::ingestion::probe::{probe_schema_with, ProbeOptions, MAX_SAMPLE_LINES};
use crate::ingestion::segment::count_data_rows;
use crate::sink::{validate_relation_name, Sink};
use crate::types::Schema;

pub use cancel::CancellationToken;
pub use observer::{
    ChannelObserver, CompositeObserver, LoadMetrics, LoadMetricsSnapshot, LoadObserver, LoadStatus, ProgressEvent,
    TracingObserver,
};
pub use progress::{Clock, ProgressState, SystemClock};

/// Default number of source lines per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// Configuration for a [`LoadCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Source lines per chunk; every chunk becomes at most one sink write.
    pub batch_size: usize,
    /// Upper bound on data rows inspected while probing.
    pub max_sample_lines: usize,
    /// Count data rows before streaming so events carry a total and an ETA.
    pub count_rows: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_sample_lines: MAX_SAMPLE_LINES,
            count_rows: true,
        }
    }
}

impl LoadOptions {
    /// Read options from JSON. Missing fields take their defaults.
    pub fn from_json_str(input: &str) -> LoadResult<Self> {
        let opts: Self = serde_json::from_str(input).map_err(|e| LoadError::InvalidOptions {
            message: e.to_string(),
        })?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> LoadResult<()> {
        if self.batch_size == 0 {
            return Err(LoadError::InvalidOptions {
                message: "batch_size must be > 0".to_string(),
            });
        }
        if self.max_sample_lines == 0 {
            return Err(LoadError::InvalidOptions {
                message: "max_sample_lines must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            max_sample_lines: self.max_sample_lines,
            ..ProbeOptions::default()
        }
    }
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    /// [`LoadStatus::Completed`] or [`LoadStatus::Cancelled`].
    pub status: LoadStatus,
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub rejected_rows: u64,
    pub elapsed: Duration,
    pub schema: Schema,
}

/// Runs loads with a fixed configuration.
///
/// Each coordinator owns its cancellation token and metrics; nothing is shared between
/// coordinators. Both are reset when a run starts, so a coordinator can be reused for
/// sequential runs. Concurrent runs need one coordinator each.
pub struct LoadCoordinator {
    opts: LoadOptions,
    observer: Option<Arc<dyn LoadObserver>>,
    metrics: Arc<LoadMetrics>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl LoadCoordinator {
    pub fn new(opts: LoadOptions) -> Self {
        Self {
            opts,
            observer: None,
            metrics: Arc::new(LoadMetrics::new()),
            cancel: CancellationToken::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Attach an observer for progress events.
    pub fn with_observer(mut self, observer: Arc<dyn LoadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.opts
    }

    /// Get a handle to real-time load metrics.
    pub fn metrics(&self) -> Arc<LoadMetrics> {
        Arc::clone(&self.metrics)
    }

    /// A token that cancels this coordinator's runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the running load to stop after the chunk in flight.
    ///
    /// A request made while no run is active is cleared when the next run starts.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    fn begin_run(&self) {
        self.cancel.reset();
        self.metrics.begin_run();
    }

    /// Probe `path`, then stream it into `relation`.
    ///
    /// Probing failures abort before the sink is touched.
    pub fn run<S, E>(
        &self,
        path: impl AsRef<Path>,
        relation: &str,
        sink: &mut S,
        errors: &mut E,
    ) -> LoadResult<LoadSummary>
    where
        S: Sink + ?Sized,
        E: ErrorSink + ?Sized,
    {
        self.begin_run();
        self.probe_and_stream(path.as_ref(), relation, sink, errors)
    }

    fn probe_and_stream<S, E>(
        &self,
        path: &Path,
        relation: &str,
        sink: &mut S,
        errors: &mut E,
    ) -> LoadResult<LoadSummary>
    where
        S: Sink + ?Sized,
        E: ErrorSink + ?Sized,
    {
        let mut state = ProgressState::new(self.opts.batch_size, self.clock.now());
        let started = state.last_reset;

        let probed = self.check_run(relation).and_then(|()| {
            state.transition(LoadStatus::Probing, None);
            self.emit(&state);
            info!(path = %path.display(), relation, "probing schema");
            probe_schema_with(path, &self.opts.probe_options())
        });
        let schema = match probed {
            Ok(schema) => schema,
            Err(err) => return Err(self.fail(&mut state, err)),
        };

        match self.drive(&mut state, path, &schema, relation, sink, errors) {
            Ok(()) => Ok(self.summary(&state, started, schema)),
            Err(err) => Err(self.fail(&mut state, err)),
        }
    }

    /// Stream `path` into `relation` using an already known `schema`.
    pub fn stream_load<S, E>(
        &self,
        path: impl AsRef<Path>,
        schema: &Schema,
        relation: &str,
        sink: &mut S,
        errors: &mut E,
    ) -> LoadResult<LoadSummary>
    where
        S: Sink + ?Sized,
        E: ErrorSink + ?Sized,
    {
        let path = path.as_ref();
        self.begin_run();
        let mut state = ProgressState::new(self.opts.batch_size, self.clock.now());
        let started = state.last_reset;

        let result = self
            .check_run(relation)
            .and_then(|()| self.drive(&mut state, path, schema, relation, sink, errors));
        match result {
            Ok(()) => Ok(self.summary(&state, started, schema.clone())),
            Err(err) => Err(self.fail(&mut state, err)),
        }
    }

    /// Run on a worker thread. Events are relayed to [`LoadHandle::events`] in addition to
    /// any attached observer.
    pub fn spawn<S, E>(
        mut self,
        path: impl Into<PathBuf>,
        relation: impl Into<String>,
        mut sink: S,
        mut errors: E,
    ) -> LoadHandle
    where
        S: Sink + Send + 'static,
        E: ErrorSink + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let relay: Arc<dyn LoadObserver> = Arc::new(ChannelObserver::new(tx));
        let observer: Arc<dyn LoadObserver> = match self.observer.take() {
            Some(existing) => Arc::new(CompositeObserver::new(vec![existing, relay])),
            None => relay,
        };
        self.observer = Some(observer);

        // Reset before the worker starts: a cancel issued once `spawn` returns must hold.
        self.begin_run();
        let cancel = self.cancellation_token();
        let metrics = self.metrics();
        let path = path.into();
        let relation = relation.into();
        let join = thread::spawn(move || self.probe_and_stream(&path, &relation, &mut sink, &mut errors));

        LoadHandle {
            events: rx,
            cancel,
            metrics,
            join,
        }
    }

    fn check_run(&self, relation: &str) -> LoadResult<()> {
        self.opts.validate()?;
        validate_relation_name(relation)
    }

    /// Counting and streaming phases. Returns with a terminal status set on `state`.
    fn drive<S, E>(
        &self,
        state: &mut ProgressState,
        path: &Path,
        schema: &Schema,
        relation: &str,
        sink: &mut S,
        errors: &mut E,
    ) -> LoadResult<()>
    where
        S: Sink + ?Sized,
        E: ErrorSink + ?Sized,
    {
        if self.opts.count_rows {
            state.transition(LoadStatus::Counting, None);
            state.reset_clock(self.clock.now());
            self.emit(state);
            let total = count_data_rows(path, schema.linebreak)?;
            state.total_rows = Some(total);
            info!(relation, total_rows = total, "counted rows");
        }
        if self.cancel.is_cancelled() {
            self.finish_cancelled(state, relation);
            return Ok(());
        }

        sink.create_relation(relation, &schema.columns)
            .map_err(|source| LoadError::SinkWrite {
                relation: relation.to_string(),
                source,
            })?;

        let encoder = BatchEncoder::new(relation, schema);
        let mut parser = StreamingParser::open(path, schema, self.opts.batch_size)?;
        state.transition(LoadStatus::Streaming, None);
        state.reset_clock(self.clock.now());
        self.emit(state);

        while let Some(batch) = parser.next_batch()? {
            for rejected in &batch.rejected {
                errors.append(relation, rejected)?;
            }
            if let Some(encoded) = encoder.encode(&batch.rows) {
                sink.write_batch(relation, &encoded)
                    .map_err(|source| LoadError::SinkWrite {
                        relation: relation.to_string(),
                        source,
                    })?;
                self.metrics.on_chunk_written();
            }

            state.processed_rows += batch.rows.len() as u64;
            state.rejected_rows += batch.rejected.len() as u64;
            debug!(
                relation,
                offset = batch.offset,
                accepted = batch.rows.len(),
                rejected = batch.rejected.len(),
                processed = state.processed_rows,
                "chunk written"
            );
            self.emit(state);

            if batch.is_last {
                break;
            }
            if self.cancel.is_cancelled() {
                self.finish_cancelled(state, relation);
                return Ok(());
            }
        }

        state.total_rows = Some(state.processed_rows);
        state.transition(
            LoadStatus::Completed,
            Some(format!("loaded {} rows into '{relation}'", state.processed_rows)),
        );
        info!(
            relation,
            processed = state.processed_rows,
            rejected = state.rejected_rows,
            "load completed"
        );
        self.emit(state);
        Ok(())
    }

    fn finish_cancelled(&self, state: &mut ProgressState, relation: &str) {
        state.transition(
            LoadStatus::Cancelled,
            Some(format!(
                "cancelled after {} rows into '{relation}'",
                state.processed_rows
            )),
        );
        info!(relation, processed = state.processed_rows, "load cancelled");
        self.emit(state);
    }

    fn fail(&self, state: &mut ProgressState, err: LoadError) -> LoadError {
        error!(severity = ?err.severity(), error = %err, "load failed");
        state.transition(LoadStatus::Failed, Some(err.to_string()));
        self.emit(state);
        err
    }

    fn summary(&self, state: &ProgressState, started: std::time::Instant, schema: Schema) -> LoadSummary {
        LoadSummary {
            status: state.status,
            processed_rows: state.processed_rows,
            total_rows: state.total_rows,
            rejected_rows: state.rejected_rows,
            elapsed: self.clock.now().saturating_duration_since(started),
            schema,
        }
    }

    fn emit(&self, state: &ProgressState) {
        let event = state.event(self.clock.now());
        self.metrics.publish(&event);
        if let Some(o) = &self.observer {
            o.on_event(&event);
        }
    }
}

/// A load running on a worker thread.
pub struct LoadHandle {
    events: Receiver<ProgressEvent>,
    cancel: CancellationToken,
    metrics: Arc<LoadMetrics>,
    join: JoinHandle<LoadResult<LoadSummary>>,
}

impl LoadHandle {
    /// Progress events in emission order. The channel closes when the run ends.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn metrics(&self) -> LoadMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wait for the run to finish. A panic on the worker is resumed on the caller.
    pub fn join(self) -> LoadResult<LoadSummary> {
        match self.join.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
