//! Per-frame feature extractors and the combiner that merges them
//!
//! Each extractor is a parameterised call into a [`FeatureComputation`]
//! service. The combiner runs its extractors in registration order and only
//! writes a combined file when every extractor produced the same number of
//! frames.

use crate::config::ExtractionParams;
use crate::error::{CorpusError, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// One frame (or whole-file summary) of a single feature type.
pub type FeatureRow = Vec<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Mel-frequency cepstral coefficients
    Cepstral,
    /// Log mel filterbank energies
    Filterbank,
    /// Coarse long-window spectral peaks
    GlobalWindow,
}

impl FeatureKind {
    /// Tag passed as the first argument to the features script.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Cepstral => "mfcc",
            FeatureKind::Filterbank => "fbank",
            FeatureKind::GlobalWindow => "global",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one external feature computation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequest {
    pub kind: FeatureKind,
    pub input: PathBuf,
    pub output: PathBuf,
    pub sample_rate: u32,
    pub frame_length: usize,
    pub frame_step: usize,
    pub feature_count: usize,
    pub normalize: bool,
    pub exclude_silence: bool,
}

/// Computes feature rows for one request.
///
/// Implementations may spawn a process, call a service or compute in-process;
/// extractors and the combiner do not care which.
pub trait FeatureComputation: Send + Sync {
    fn compute(&self, request: &FeatureRequest) -> Result<Vec<FeatureRow>>;
}

/// Parse a feature table: one line per frame, whitespace-separated floats.
///
/// Blank lines are ignored; any unparseable value fails the whole table.
pub fn load_feature_rows(path: impl AsRef<Path>) -> Result<Vec<FeatureRow>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = parse_row(&line).map_err(|bad| {
            CorpusError::Format(format!("{}:{}: invalid feature value '{}'", path.display(), line_no + 1, bad))
        })?;
        rows.push(row);
    }

    Ok(rows)
}

/// Parse one whitespace-separated row, returning the offending token on failure.
pub(crate) fn parse_row(line: &str) -> std::result::Result<FeatureRow, String> {
    line.split_whitespace()
        .map(|token| token.parse::<f64>().map_err(|_| token.to_string()))
        .collect()
}

/// A feature type that can be computed for one recording.
pub trait FeatureExtractor: Send {
    fn kind(&self) -> FeatureKind;

    /// Run the computation. Failures leave [`frame_features`](Self::frame_features) empty.
    fn extract(&mut self);

    fn frame_features(&self) -> &[FeatureRow];
}

/// State shared by every extractor variant.
struct ScriptedExtractor {
    request: FeatureRequest,
    computation: Arc<dyn FeatureComputation>,
    frames: Vec<FeatureRow>,
}

impl ScriptedExtractor {
    fn new(
        kind: FeatureKind,
        input: &Path,
        params: &ExtractionParams,
        feature_count: usize,
        computation: Arc<dyn FeatureComputation>,
    ) -> Self {
        // `<input>.<kind>` keeps concurrent jobs and extractors from sharing an output path
        let mut output = input.as_os_str().to_os_string();
        output.push(".");
        output.push(kind.as_str());

        Self {
            request: FeatureRequest {
                kind,
                input: input.to_path_buf(),
                output: PathBuf::from(output),
                sample_rate: params.sample_rate,
                frame_length: params.frame_length,
                frame_step: params.frame_step,
                feature_count,
                normalize: params.normalize,
                exclude_silence: params.exclude_silence,
            },
            computation,
            frames: Vec::new(),
        }
    }

    fn extract(&mut self) {
        self.frames = match self.computation.compute(&self.request) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("{} extraction failed for {}: {}", self.request.kind, self.request.input.display(), e);
                Vec::new()
            }
        };
        debug!(
            "{} extractor produced {} frames for {}",
            self.request.kind,
            self.frames.len(),
            self.request.input.display()
        );
    }
}

/// MFCC extractor.
pub struct CepstralExtractor(ScriptedExtractor);

impl CepstralExtractor {
    pub fn new(input: &Path, params: &ExtractionParams, computation: Arc<dyn FeatureComputation>) -> Self {
        Self(ScriptedExtractor::new(FeatureKind::Cepstral, input, params, params.mfcc_features, computation))
    }
}

impl FeatureExtractor for CepstralExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Cepstral
    }

    fn extract(&mut self) {
        self.0.extract()
    }

    fn frame_features(&self) -> &[FeatureRow] {
        &self.0.frames
    }
}

/// Log filterbank extractor.
pub struct FilterbankExtractor(ScriptedExtractor);

impl FilterbankExtractor {
    pub fn new(input: &Path, params: &ExtractionParams, computation: Arc<dyn FeatureComputation>) -> Self {
        Self(ScriptedExtractor::new(FeatureKind::Filterbank, input, params, params.fbank_features, computation))
    }
}

impl FeatureExtractor for FilterbankExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::Filterbank
    }

    fn extract(&mut self) {
        self.0.extract()
    }

    fn frame_features(&self) -> &[FeatureRow] {
        &self.0.frames
    }
}

/// Coarse spectral-peak extractor over long windows.
pub struct GlobalWindowExtractor(ScriptedExtractor);

impl GlobalWindowExtractor {
    pub fn new(input: &Path, params: &ExtractionParams, computation: Arc<dyn FeatureComputation>) -> Self {
        Self(ScriptedExtractor::new(FeatureKind::GlobalWindow, input, params, params.global_features, computation))
    }
}

impl FeatureExtractor for GlobalWindowExtractor {
    fn kind(&self) -> FeatureKind {
        FeatureKind::GlobalWindow
    }

    fn extract(&mut self) {
        self.0.extract()
    }

    fn frame_features(&self) -> &[FeatureRow] {
        &self.0.frames
    }
}

/// Runs a set of extractors for one recording and writes their frame-aligned rows.
pub struct FeatureCombiner {
    input: PathBuf,
    output: PathBuf,
    extractors: Vec<Box<dyn FeatureExtractor>>,
}

impl FeatureCombiner {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            extractors: Vec::new(),
        }
    }

    /// Register an extractor; extractors run and concatenate in registration order.
    pub fn add(mut self, extractor: impl FeatureExtractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    /// Register every extractor enabled by `params` (non-zero feature count).
    pub fn with_params(mut self, params: &ExtractionParams, computation: &Arc<dyn FeatureComputation>) -> Self {
        let input = self.input.clone();
        if params.mfcc_features > 0 {
            self = self.add(CepstralExtractor::new(&input, params, Arc::clone(computation)));
        }
        if params.fbank_features > 0 {
            self = self.add(FilterbankExtractor::new(&input, params, Arc::clone(computation)));
        }
        if params.global_features > 0 {
            self = self.add(GlobalWindowExtractor::new(&input, params, Arc::clone(computation)));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    /// Extract, check alignment and write the combined file. Returns the frame count.
    ///
    /// Nothing is written unless every extractor produced the same, non-zero number of frames.
    pub fn combine(mut self) -> Result<usize> {
        if self.extractors.is_empty() {
            return Err(CorpusError::Config("no feature extractors registered".to_string()));
        }

        for extractor in self.extractors.iter_mut() {
            extractor.extract();
        }

        if let Some(empty) = self.extractors.iter().find(|e| e.frame_features().is_empty()) {
            return Err(CorpusError::EmptyFeatures {
                path: self.input.clone(),
                kind: empty.kind().to_string(),
            });
        }

        let counts: Vec<usize> = self.extractors.iter().map(|e| e.frame_features().len()).collect();
        let frames = counts[0];
        if counts.iter().any(|&c| c != frames) {
            return Err(CorpusError::Alignment {
                path: self.input.clone(),
                counts,
            });
        }

        let mut out = BufWriter::new(File::create(&self.output)?);
        for frame in 0..frames {
            let row = self
                .extractors
                .iter()
                .flat_map(|e| e.frame_features()[frame].iter())
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, "{}", row)?;
        }
        out.flush()?;

        Ok(frames)
    }
}
