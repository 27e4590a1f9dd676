//! Labelled corpus discovery, extraction and train/test assembly
//!
//! ## Layout
//!
//! ```text
//! wav_root/                    features_root/
//!   voice_alice_0/               voice_alice_0/
//!     take01.wav       ->          take01.features
//!   voice_bob_1/                 voice_bob_1/
//! ```
//!
//! The trailing `_<integer>` of each class directory is its label. Both phases
//! build a [`ClassManifest`] once and never re-parse names afterwards.
//!
//! ## Output
//!
//! Train and test files start with `Class,Features`, then one
//! `<label>,<v1> <v2> ... ` line per sample.

use crate::config::{CorpusLayout, ExtractionParams, LabelPolicy, SplitConfig};
use crate::error::{CorpusError, Result};
use crate::features::{load_feature_rows, FeatureComputation, FeatureRow};
use crate::pool::{ExtractionPool, FeatureFileJob};
use crate::stats::ExtractionSnapshot;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const TRAIN_TEST_HEADER: &str = "Class,Features";

/// Class label encoded as the trailing `_<integer>` of a directory name.
pub fn parse_label(dir_name: &str) -> Result<i64> {
    dir_name
        .rsplit_once('_')
        .and_then(|(_, suffix)| suffix.parse::<i64>().ok())
        .ok_or_else(|| CorpusError::LabelParse(dir_name.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDir {
    pub name: String,
    pub path: PathBuf,
    pub label: i64,
}

/// Class directories under one root, validated once at discovery.
#[derive(Debug, Clone, Default)]
pub struct ClassManifest {
    classes: Vec<ClassDir>,
    rejected: Vec<PathBuf>,
}

impl ClassManifest {
    /// Scan the immediate, non-hidden subdirectories of `root`, sorted by name.
    ///
    /// Directories without a parseable label are logged and recorded as rejected.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(root.as_ref())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && !is_hidden(path))
            .collect();
        dirs.sort();

        let mut manifest = Self::default();
        for path in dirs {
            let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
            match parse_label(&name) {
                Ok(label) => manifest.classes.push(ClassDir { name, path, label }),
                Err(e) => {
                    warn!("Excluding {}: {}", path.display(), e);
                    manifest.rejected.push(path);
                }
            }
        }

        Ok(manifest)
    }

    pub fn classes(&self) -> &[ClassDir] {
        &self.classes
    }

    pub fn rejected(&self) -> &[PathBuf] {
        &self.rejected
    }

    pub fn labels(&self) -> BTreeSet<i64> {
        self.classes.iter().map(|c| c.label).collect()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Regular, non-hidden files directly inside `dir`, sorted.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && !is_hidden(path))
        .collect();
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label: i64,
    pub features: Vec<f64>,
}

/// In-memory labelled samples sharing one feature-vector length.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    samples: Vec<Sample>,
    feature_len: Option<usize>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty corpus that only accepts feature vectors of `len` values.
    pub fn with_feature_len(len: usize) -> Self {
        Self {
            samples: Vec::new(),
            feature_len: Some(len),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn feature_len(&self) -> Option<usize> {
        self.feature_len
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn push(&mut self, sample: Sample) -> Result<()> {
        self.check_len(sample.features.len())?;
        self.feature_len = Some(sample.features.len());
        self.samples.push(sample);
        Ok(())
    }

    /// Add every row of one feature file under `label`; all or nothing.
    pub fn extend_rows(&mut self, label: i64, rows: Vec<FeatureRow>) -> Result<usize> {
        for row in &rows {
            self.check_len(row.len())?;
            if let Some(first) = rows.first() {
                if first.len() != row.len() {
                    return Err(CorpusError::Format(format!(
                        "rows of {} and {} values in one feature file",
                        first.len(),
                        row.len()
                    )));
                }
            }
        }

        let added = rows.len();
        for features in rows {
            self.push(Sample { label, features })?;
        }
        Ok(added)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        match self.feature_len {
            Some(expected) if expected != len => Err(CorpusError::Format(format!(
                "feature vector has {} values, corpus uses {}",
                len, expected
            ))),
            _ => Ok(()),
        }
    }

    pub fn label_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.label).or_insert(0) += 1;
        }
        counts
    }

    pub fn relabel(&mut self, policy: LabelPolicy) {
        for sample in &mut self.samples {
            sample.label = policy.apply(sample.label);
        }
    }

    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
    }

    /// Positional split: the first `floor(len * train_size)` samples train, the rest test.
    pub fn split(&self, train_size: f64) -> (&[Sample], &[Sample]) {
        self.samples.split_at(split_index(self.samples.len(), train_size))
    }
}

pub fn split_index(len: usize, train_size: f64) -> usize {
    ((len as f64 * train_size.clamp(0.0, 1.0)).floor() as usize).min(len)
}

/// Seed derived from the wall clock, for runs without a fixed seed.
pub fn wall_clock_seed() -> u64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
}

/// Serialise samples in train/test format.
pub fn write_samples(path: impl AsRef<Path>, samples: &[Sample]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path.as_ref())?);
    writeln!(out, "{}", TRAIN_TEST_HEADER)?;
    for sample in samples {
        write!(out, "{},", sample.label)?;
        for value in &sample.features {
            write!(out, "{} ", value)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Parse a train/test file written by [`write_samples`].
pub fn read_samples(path: impl AsRef<Path>) -> Result<Vec<Sample>> {
    let path = path.as_ref();
    let mut lines = BufReader::new(File::open(path)?).lines();

    match lines.next() {
        Some(Ok(header)) if header.trim() == TRAIN_TEST_HEADER => {}
        _ => {
            return Err(CorpusError::Format(format!("{}: missing '{}' header", path.display(), TRAIN_TEST_HEADER)));
        }
    }

    let mut samples = Vec::new();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (label, features) = line
            .split_once(',')
            .ok_or_else(|| CorpusError::Format(format!("{}: malformed row '{}'", path.display(), line)))?;
        let label = label
            .trim()
            .parse::<i64>()
            .map_err(|_| CorpusError::Format(format!("{}: invalid label '{}'", path.display(), label)))?;
        let features = crate::features::parse_row(features)
            .map_err(|bad| CorpusError::Format(format!("{}: invalid feature value '{}'", path.display(), bad)))?;
        samples.push(Sample { label, features });
    }

    Ok(samples)
}

/// Stage both outputs, then move them into place; nothing is left behind on failure.
fn write_split(train_path: &Path, train: &[Sample], test_path: &Path, test: &[Sample]) -> Result<()> {
    let staged_train = staging_path(train_path);
    let staged_test = staging_path(test_path);

    let staged = write_samples(&staged_train, train).and_then(|_| write_samples(&staged_test, test));
    if let Err(e) = staged {
        let _ = fs::remove_file(&staged_train);
        let _ = fs::remove_file(&staged_test);
        return Err(e);
    }

    if let Err(e) = fs::rename(&staged_train, train_path) {
        let _ = fs::remove_file(&staged_train);
        let _ = fs::remove_file(&staged_test);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&staged_test, test_path) {
        // a new train file must not sit next to a stale or missing test file
        let _ = fs::remove_file(train_path);
        let _ = fs::remove_file(&staged_test);
        return Err(e.into());
    }
    Ok(())
}

/// Row width of the most files; ties go to the wider rows.
fn dominant_width(files: &[(i64, PathBuf, Vec<FeatureRow>)]) -> Option<usize> {
    let mut files_per_width: BTreeMap<usize, usize> = BTreeMap::new();
    for (_, _, rows) in files {
        if let Some(first) = rows.first() {
            *files_per_width.entry(first.len()).or_insert(0) += 1;
        }
    }
    files_per_width
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))
        .map(|(width, _)| width)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_os_string();
    staged.push(".partial");
    PathBuf::from(staged)
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub train_path: PathBuf,
    pub test_path: PathBuf,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_len: usize,
    /// Sample counts per original (pre-relabel) class
    pub class_counts: BTreeMap<i64, usize>,
    pub excluded_dirs: Vec<PathBuf>,
    pub skipped_files: usize,
    pub seed: u64,
}

/// Drives both pipeline phases for one corpus configuration.
pub struct DatasetAssembler {
    layout: CorpusLayout,
    params: ExtractionParams,
    split: SplitConfig,
    computation: Arc<dyn FeatureComputation>,
    workers: usize,
}

impl DatasetAssembler {
    pub fn new(
        layout: CorpusLayout,
        params: ExtractionParams,
        split: SplitConfig,
        computation: Arc<dyn FeatureComputation>,
    ) -> Self {
        Self {
            layout,
            params,
            split,
            computation,
            workers: crate::pool::default_workers(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    /// Mirror the class directories of `wav_root` under `features_root` and
    /// extract one combined feature file per recording.
    ///
    /// Failing to create an output directory aborts the run; per-file failures
    /// only show up in the returned counters.
    pub fn extract_features(
        &self,
        wav_root: impl AsRef<Path>,
        features_root: impl AsRef<Path>,
    ) -> Result<ExtractionSnapshot> {
        self.params.validate()?;
        let features_root = features_root.as_ref();
        let manifest = ClassManifest::discover(wav_root.as_ref())?;

        let mut pool = ExtractionPool::new(self.workers);
        for class in manifest.classes() {
            let output_dir = features_root.join(&class.name);
            fs::create_dir_all(&output_dir)?;

            let files = list_files(&class.path)?;
            info!("In folder {} found {} files", class.path.display(), files.len());
            for file in files {
                let output = self.layout.features_path(&file, &output_dir);
                pool.add_file(file, output);
            }
        }

        let job = FeatureFileJob::new(self.params.clone(), self.layout.clone(), Arc::clone(&self.computation));
        pool.extract(&job)
    }

    /// Extract features for a single recording into `output`, on one worker.
    pub fn extract_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<ExtractionSnapshot> {
        self.params.validate()?;
        let mut pool = ExtractionPool::new(1);
        pool.add_file(input, output);

        let job = FeatureFileJob::new(self.params.clone(), self.layout.clone(), Arc::clone(&self.computation));
        pool.extract(&job)
    }

    /// Load every feature file under the class directories of `features_root`.
    ///
    /// The corpus width is the row width shared by the most files, so a stray
    /// file cannot decide it by sorting first. Files of any other width are
    /// skipped and counted.
    pub fn load_corpus(&self, features_root: impl AsRef<Path>) -> Result<(Corpus, ClassManifest, usize)> {
        let manifest = ClassManifest::discover(features_root.as_ref())?;
        let mut loaded: Vec<(i64, PathBuf, Vec<FeatureRow>)> = Vec::new();
        let mut skipped = 0;

        for class in manifest.classes() {
            let before = loaded.len();
            for entry in WalkDir::new(&class.path).min_depth(1).sort_by_file_name() {
                let entry = entry?;
                let path = entry.path();
                if !entry.file_type().is_file() || !self.layout.is_features_file(path) {
                    continue;
                }

                match load_feature_rows(path) {
                    Ok(rows) => loaded.push((class.label, path.to_path_buf(), rows)),
                    Err(e) => {
                        warn!("Skipping {}: {}", path.display(), e);
                        skipped += 1;
                    }
                }
            }
            info!("Class {} ({}): {} feature files", class.label, class.name, loaded.len() - before);
        }

        let mut corpus = match dominant_width(&loaded) {
            Some(width) => Corpus::with_feature_len(width),
            None => Corpus::new(),
        };
        for (label, path, rows) in loaded {
            match corpus.extend_rows(label, rows) {
                Ok(rows) => debug!("Loaded {} rows from {}", rows, path.display()),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    skipped += 1;
                }
            }
        }

        Ok((corpus, manifest, skipped))
    }

    /// Build shuffled train/test files in `save_dir` from `features_root`.
    pub fn create_train_test(
        &self,
        features_root: impl AsRef<Path>,
        save_dir: impl AsRef<Path>,
    ) -> Result<SplitSummary> {
        self.split.validate()?;
        let features_root = features_root.as_ref();
        let save_dir = save_dir.as_ref();

        let (mut corpus, manifest, skipped_files) = self.load_corpus(features_root)?;
        if corpus.is_empty() {
            return Err(CorpusError::Format(format!("no feature rows found under {}", features_root.display())));
        }

        let class_counts = corpus.label_counts();
        if let LabelPolicy::OneVsAll { main_class } = self.split.policy {
            if !class_counts.contains_key(&main_class) {
                return Err(CorpusError::MissingLabel(main_class));
            }
        }

        corpus.relabel(self.split.policy);
        let seed = self.split.seed.unwrap_or_else(wall_clock_seed);
        corpus.shuffle(seed);

        let (train, test) = corpus.split(self.split.train_size);
        fs::create_dir_all(save_dir)?;
        let train_path = self.layout.train_path(save_dir);
        let test_path = self.layout.test_path(save_dir);
        write_split(&train_path, train, &test_path, test)?;

        info!(
            "Wrote {} train and {} test samples ({} features each) to {}",
            train.len(),
            test.len(),
            corpus.feature_len().unwrap_or(0),
            save_dir.display()
        );

        Ok(SplitSummary {
            train_rows: train.len(),
            test_rows: test.len(),
            train_path,
            test_path,
            feature_len: corpus.feature_len().unwrap_or(0),
            class_counts,
            excluded_dirs: manifest.rejected().to_vec(),
            skipped_files,
            seed,
        })
    }

    /// Remove and recreate `features_root` before a fresh extraction.
    pub fn clear_features(&self, features_root: impl AsRef<Path>) -> Result<()> {
        let root = features_root.as_ref();
        if root.exists() {
            fs::remove_dir_all(root)?;
        }
        fs::create_dir_all(root)?;
        Ok(())
    }
}
