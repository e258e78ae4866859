use std::time::{Duration, Instant};

use super::observer::{LoadStatus, ProgressEvent};

/// Source of wall-clock time for throughput computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// [`Clock`] backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Progress of one run. Written only by the coordinator.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub processed_rows: u64,
    /// `None` until counted (or when counting is disabled).
    pub total_rows: Option<u64>,
    pub rejected_rows: u64,
    pub batch_size: usize,
    pub status: LoadStatus,
    pub message: Option<String>,
    /// Start of the current throughput window.
    pub last_reset: Instant,
    processed_at_reset: u64,
}

impl ProgressState {
    pub fn new(batch_size: usize, now: Instant) -> Self {
        Self {
            processed_rows: 0,
            total_rows: None,
            rejected_rows: 0,
            batch_size,
            status: LoadStatus::Idle,
            message: None,
            last_reset: now,
            processed_at_reset: 0,
        }
    }

    pub fn transition(&mut self, status: LoadStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
    }

    /// Start a new throughput window at `now`.
    pub fn reset_clock(&mut self, now: Instant) {
        self.last_reset = now;
        self.processed_at_reset = self.processed_rows;
    }

    /// Rows per second since the last reset; `0.0` if no time has elapsed.
    pub fn rows_per_second(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_reset).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.processed_rows.saturating_sub(self.processed_at_reset) as f64 / elapsed
    }

    /// Estimated time to finish. Only defined with a known total, a positive throughput,
    /// and a finite result.
    pub fn eta(&self, now: Instant) -> Option<Duration> {
        let total = self.total_rows?;
        let rps = self.rows_per_second(now);
        if rps <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.processed_rows) as f64 / rps;
        if !remaining.is_finite() {
            return None;
        }
        Duration::try_from_secs_f64(remaining).ok()
    }

    /// Snapshot as an event.
    pub fn event(&self, now: Instant) -> ProgressEvent {
        ProgressEvent {
            processed_rows: self.processed_rows,
            total_rows: self.total_rows,
            rejected_rows: self.rejected_rows,
            batch_size: self.batch_size,
            status: self.status,
            message: self.message.clone(),
            rows_per_second: self.rows_per_second(now),
            eta_seconds: self.eta(now).map(|d| d.as_secs_f64()),
        }
    }
}
