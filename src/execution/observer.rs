use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Pipeline state machine:
/// `Idle → Probing → Counting → Streaming → {Completed | Cancelled | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Idle,
    Probing,
    Counting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl LoadStatus {
    const ALL: [LoadStatus; 7] = [
        LoadStatus::Idle,
        LoadStatus::Probing,
        LoadStatus::Counting,
        LoadStatus::Streaming,
        LoadStatus::Completed,
        LoadStatus::Cancelled,
        LoadStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoadStatus::Completed | LoadStatus::Cancelled | LoadStatus::Failed
        )
    }

    fn from_u8(v: u8) -> Self {
        Self::ALL.get(v as usize).copied().unwrap_or(LoadStatus::Idle)
    }
}

/// Progress payload emitted on every state change and once per chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub rejected_rows: u64,
    pub batch_size: usize,
    pub status: LoadStatus,
    pub message: Option<String>,
    pub rows_per_second: f64,
    pub eta_seconds: Option<f64>,
}

impl ProgressEvent {
    /// Remaining time as `M:SS`, when an estimate exists.
    pub fn eta_display(&self) -> Option<String> {
        let secs = self.eta_seconds?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let whole = secs.floor() as u64;
        Some(format!("{}:{:02}", whole / 60, whole % 60))
    }
}

/// Observer hook for load progress.
pub trait LoadObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Logs progress events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl LoadObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event.status {
            LoadStatus::Streaming => debug!(
                processed = event.processed_rows,
                total = ?event.total_rows,
                rejected = event.rejected_rows,
                rows_per_second = event.rows_per_second,
                eta = ?event.eta_display(),
                "load progress"
            ),
            LoadStatus::Failed => error!(
                processed = event.processed_rows,
                message = ?event.message,
                "load failed"
            ),
            status => info!(
                ?status,
                processed = event.processed_rows,
                total = ?event.total_rows,
                message = ?event.message,
                "load status"
            ),
        }
    }
}

/// Forwards events into an `mpsc` channel. A dropped receiver is ignored.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: Sender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl LoadObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Fans events out to several observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_event(&self, event: &ProgressEvent) {
        for o in &self.observers {
            o.on_event(event);
        }
    }
}

const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Live counters for a run.
///
/// The coordinator publishes into these after every state change; pollers can snapshot
/// them at any time without waiting for an event.
pub struct LoadMetrics {
    run_id: AtomicU64,
    status: AtomicU8,
    processed_rows: AtomicU64,
    total_rows: AtomicU64,
    rejected_rows: AtomicU64,
    chunks_written: AtomicU64,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self {
            run_id: AtomicU64::new(0),
            status: AtomicU8::new(LoadStatus::Idle as u8),
            processed_rows: AtomicU64::new(0),
            total_rows: AtomicU64::new(UNKNOWN_TOTAL),
            rejected_rows: AtomicU64::new(0),
            chunks_written: AtomicU64::new(0),
        }
    }

    /// Zero the counters and start a new run id.
    pub fn begin_run(&self) {
        let _ = self.run_id.fetch_add(1, Ordering::SeqCst);
        self.status.store(LoadStatus::Idle as u8, Ordering::SeqCst);
        self.processed_rows.store(0, Ordering::SeqCst);
        self.total_rows.store(UNKNOWN_TOTAL, Ordering::SeqCst);
        self.rejected_rows.store(0, Ordering::SeqCst);
        self.chunks_written.store(0, Ordering::SeqCst);
    }

    pub(crate) fn publish(&self, event: &ProgressEvent) {
        self.processed_rows
            .store(event.processed_rows, Ordering::SeqCst);
        self.total_rows
            .store(event.total_rows.unwrap_or(UNKNOWN_TOTAL), Ordering::SeqCst);
        self.rejected_rows
            .store(event.rejected_rows, Ordering::SeqCst);
        self.status.store(event.status as u8, Ordering::SeqCst);
    }

    pub(crate) fn on_chunk_written(&self) {
        let _ = self.chunks_written.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> LoadMetricsSnapshot {
        let total = self.total_rows.load(Ordering::SeqCst);
        LoadMetricsSnapshot {
            run_id: self.run_id.load(Ordering::SeqCst),
            status: LoadStatus::from_u8(self.status.load(Ordering::SeqCst)),
            processed_rows: self.processed_rows.load(Ordering::SeqCst),
            total_rows: (total != UNKNOWN_TOTAL).then_some(total),
            rejected_rows: self.rejected_rows.load(Ordering::SeqCst),
            chunks_written: self.chunks_written.load(Ordering::SeqCst),
        }
    }
}

impl Default for LoadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`LoadMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMetricsSnapshot {
    /// Incremented at the start of every run; `0` before the first.
    pub run_id: u64,
    pub status: LoadStatus,
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub rejected_rows: u64,
    pub chunks_written: u64,
}

impl fmt::Display for LoadMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run_id={}, status={:?}, processed_rows={}, total_rows={:?}, rejected_rows={}, chunks_written={}",
            self.run_id,
            self.status, self.processed_rows, self.total_rows, self.rejected_rows, self.chunks_written
        )
    }
}
