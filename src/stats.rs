//! Extraction counters shared by pool workers

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Outcome of one extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Combined feature file written with this many frames
    Written { frames: usize },
    /// Input was deliberately not processed (e.g. unsupported audio format)
    Skipped,
}

#[derive(Debug, Default)]
pub struct ExtractionStats {
    pub queued: AtomicU64,
    pub written: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    pub frames: AtomicU64,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_queued(&self, jobs: u64) {
        self.queued.fetch_add(jobs, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Written { frames } => {
                self.written.fetch_add(1, Ordering::Relaxed);
                self.frames.fetch_add(frames as u64, Ordering::Relaxed);
            }
            JobOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, timer: &Timer) -> ExtractionSnapshot {
        ExtractionSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            elapsed_ms: timer.elapsed_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSnapshot {
    pub queued: u64,
    pub written: u64,
    pub skipped: u64,
    /// Jobs that hit an error; the run-level warning count
    pub failed: u64,
    pub frames: u64,
    pub elapsed_ms: u64,
}

impl ExtractionSnapshot {
    pub fn processed(&self) -> u64 {
        self.written + self.skipped + self.failed
    }
}

/// Wall-clock timer for a run phase.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
