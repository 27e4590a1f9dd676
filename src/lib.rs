//! voxcorpus - labelled speaker corpora from directories of WAV recordings
//!
//! Extracts per-frame features for every recording in parallel (delegating the
//! feature math to external scripts), then assembles shuffled train/test files
//! for a downstream classifier.

pub mod command;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod model;
pub mod pool;
pub mod stats;
pub mod wav;

pub use command::{ProcessComputation, ScriptCommand};
pub use config::{CorpusLayout, ExtractionParams, LabelPolicy, ScriptConfig, SplitConfig};
pub use dataset::{ClassManifest, Corpus, DatasetAssembler, Sample, SplitSummary};
pub use error::{CorpusError, Result};
pub use features::{
    CepstralExtractor, FeatureCombiner, FeatureComputation, FeatureExtractor, FeatureKind, FeatureRequest, FeatureRow,
    FilterbankExtractor, GlobalWindowExtractor,
};
pub use model::ModelRunner;
pub use pool::{ExtractionJob, ExtractionPool, FeatureFileJob, JobProcessor};
pub use stats::{ExtractionSnapshot, JobOutcome};
pub use wav::{is_supported_format, WavFile, WavHeader};
