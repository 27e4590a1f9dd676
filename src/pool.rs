//! Fixed-size worker pool for per-recording feature extraction
//!
//! The queue is filled before any worker starts. Workers pop one job at a
//! time under a single mutex and run the (blocking, process-spawning) job
//! with the lock released. `extract` returns once every worker has drained
//! the queue and exited.

use crate::config::{CorpusLayout, ExtractionParams};
use crate::error::{CorpusError, Result};
use crate::features::{FeatureCombiner, FeatureComputation};
use crate::stats::{ExtractionSnapshot, ExtractionStats, JobOutcome, Timer};
use crate::wav::WavFile;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// One recording to process and where its combined feature file goes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExtractionJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Work performed for each dequeued job. Errors are logged and counted, never retried.
pub trait JobProcessor: Sync {
    fn process(&self, job: &ExtractionJob) -> Result<JobOutcome>;
}

pub struct ExtractionPool {
    queue: Mutex<VecDeque<ExtractionJob>>,
    workers: usize,
}

impl ExtractionPool {
    pub fn new(workers: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            workers: workers.max(1),
        }
    }

    /// One worker per available hardware thread.
    pub fn with_default_workers() -> Self {
        Self::new(default_workers())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn add_file(&mut self, input: impl AsRef<Path>, output: impl AsRef<Path>) {
        self.add_job(ExtractionJob {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
        });
    }

    pub fn add_job(&mut self, job: ExtractionJob) {
        self.queue.get_mut().unwrap_or_else(PoisonError::into_inner).push_back(job);
    }

    /// Drain the queue with `workers` threads and block until all of them exit.
    pub fn extract<P: JobProcessor>(&mut self, processor: &P) -> Result<ExtractionSnapshot> {
        let timer = Timer::new();
        let stats = ExtractionStats::new();
        let total = self.pending();
        stats.record_queued(total as u64);

        info!("Extracting features from {} files with {} workers", total, self.workers);

        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("extract-{}", i))
            .build()?;

        let queue = &self.queue;
        let stats_ref = &stats;
        threads.scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(move |_| drain(queue, processor, stats_ref));
            }
        });

        let snapshot = stats.snapshot(&timer);
        info!(
            "Extraction finished in {}ms: {} of {} files processed, {} written, {} skipped, {} failed",
            snapshot.elapsed_ms,
            snapshot.processed(),
            snapshot.queued,
            snapshot.written,
            snapshot.skipped,
            snapshot.failed
        );
        Ok(snapshot)
    }
}

impl Default for ExtractionPool {
    fn default() -> Self {
        Self::with_default_workers()
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism().map(|p| p.get()).unwrap_or(1)
}

fn drain<P: JobProcessor>(queue: &Mutex<VecDeque<ExtractionJob>>, processor: &P, stats: &ExtractionStats) {
    loop {
        let (job, left) = {
            let mut jobs = queue.lock().unwrap_or_else(PoisonError::into_inner);
            match jobs.pop_front() {
                Some(job) => (job, jobs.len()),
                None => break,
            }
        };

        debug!("Processing {} ({} files left)", job.input.display(), left);

        match processor.process(&job) {
            Ok(outcome) => stats.record_outcome(outcome),
            Err(e) => {
                warn!("Feature extraction failed for {}: {}", job.input.display(), e);
                stats.record_failure();
            }
        }
    }
}

/// Reads one recording, hands its first channel to the configured extractors
/// and writes the combined feature file.
pub struct FeatureFileJob {
    params: ExtractionParams,
    layout: CorpusLayout,
    computation: Arc<dyn FeatureComputation>,
}

impl FeatureFileJob {
    pub fn new(params: ExtractionParams, layout: CorpusLayout, computation: Arc<dyn FeatureComputation>) -> Self {
        Self {
            params,
            layout,
            computation,
        }
    }

    fn scratch_path(&self, output: &Path) -> PathBuf {
        output.with_extension(&self.layout.amplitudes_extension)
    }
}

impl JobProcessor for FeatureFileJob {
    fn process(&self, job: &ExtractionJob) -> Result<JobOutcome> {
        let wav = match WavFile::open(&job.input) {
            Ok(wav) => wav,
            Err(CorpusError::Format(reason)) => {
                warn!("Skipping {}: {}", job.input.display(), reason);
                return Ok(JobOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let header = wav.header();
        if !header.is_supported_format() {
            warn!(
                "Skipping {}: unsupported format ({} Hz, {} channels, {} bits)",
                job.input.display(),
                header.sample_rate,
                header.num_channels,
                header.bits_per_sample
            );
            return Ok(JobOutcome::Skipped);
        }

        let scratch = self.scratch_path(&job.output);
        wav.write_channel_slice(&scratch, 0, wav.size_in_bytes(), self.params.amplitudes_as_text)?;

        let combined = FeatureCombiner::new(&scratch, &job.output)
            .with_params(&self.params, &self.computation)
            .combine();

        if let Err(e) = std::fs::remove_file(&scratch) {
            debug!("Could not remove {}: {}", scratch.display(), e);
        }

        let frames = combined?;
        Ok(JobOutcome::Written { frames })
    }
}
