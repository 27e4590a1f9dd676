//! Run configuration
//!
//! Every component takes its settings as an explicit value at construction,
//! so two pipelines with different roots can run side by side in one process.

use crate::error::{CorpusError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Sample rate every accepted recording must have.
pub const SUPPORTED_SAMPLE_RATE: u32 = 44100;

/// File naming conventions shared by the extraction and assembly phases.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusLayout {
    /// Extension (without dot) of per-recording combined feature files
    pub features_extension: String,
    /// Extension (without dot) of the first-channel scratch file handed to the feature scripts
    pub amplitudes_extension: String,
    pub train_file_name: String,
    pub test_file_name: String,
    pub model_dump_name: String,
    pub score_report_name: String,
    pub prediction_file_name: String,
}

impl Default for CorpusLayout {
    fn default() -> Self {
        Self {
            features_extension: "features".to_string(),
            amplitudes_extension: "amplitudes".to_string(),
            train_file_name: "_train.txt".to_string(),
            test_file_name: "_test.txt".to_string(),
            model_dump_name: "trained_model.dump".to_string(),
            score_report_name: "training_info.txt".to_string(),
            prediction_file_name: "_prediction.txt".to_string(),
        }
    }
}

impl CorpusLayout {
    /// Feature file for `input` placed in `output_dir`: same stem, feature extension.
    pub fn features_path(&self, input: &Path, output_dir: &Path) -> PathBuf {
        let mut name = input.file_stem().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(&self.features_extension);
        output_dir.join(name)
    }

    /// Whether `path` carries the feature-file extension.
    pub fn is_features_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext == self.features_extension.as_str())
            .unwrap_or(false)
    }

    pub fn train_path(&self, save_dir: &Path) -> PathBuf {
        save_dir.join(&self.train_file_name)
    }

    pub fn test_path(&self, save_dir: &Path) -> PathBuf {
        save_dir.join(&self.test_file_name)
    }

    pub fn model_dump_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.model_dump_name)
    }

    pub fn score_report_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.score_report_name)
    }

    pub fn prediction_path(&self, model_dir: &Path) -> PathBuf {
        model_dir.join(&self.prediction_file_name)
    }
}

/// Interpreter and script locations for the external procedures.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptConfig {
    pub interpreter: String,
    pub features_script: PathBuf,
    pub model_script: PathBuf,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            features_script: PathBuf::from("scripts/py_features.py"),
            model_script: PathBuf::from("scripts/py_model.py"),
        }
    }
}

/// Parameters applied uniformly to every extraction job.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionParams {
    pub sample_rate: u32,
    /// Frame length in samples
    pub frame_length: usize,
    /// Frame step in samples
    pub frame_step: usize,
    /// Cepstral coefficients per frame (0 disables the extractor)
    pub mfcc_features: usize,
    /// Filterbank energies per frame (0 disables the extractor)
    pub fbank_features: usize,
    /// Coarse spectral features per frame (0 disables the extractor)
    pub global_features: usize,
    pub normalize: bool,
    pub exclude_silence: bool,
    /// Write the amplitude scratch file as whitespace-separated integers instead of raw bytes
    pub amplitudes_as_text: bool,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            sample_rate: SUPPORTED_SAMPLE_RATE,
            frame_length: 1103, // 25ms at 44.1kHz
            frame_step: 441,    // 10ms
            mfcc_features: 13,
            fbank_features: 0,
            global_features: 0,
            normalize: false,
            exclude_silence: false,
            amplitudes_as_text: true,
        }
    }
}

impl ExtractionParams {
    /// Build parameters from frame window/step given in seconds.
    pub fn from_seconds(sample_rate: u32, window_seconds: f64, step_seconds: f64) -> Self {
        Self {
            sample_rate,
            frame_length: (sample_rate as f64 * window_seconds) as usize,
            frame_step: (sample_rate as f64 * step_seconds) as usize,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_length == 0 || self.frame_step == 0 {
            return Err(CorpusError::Config(format!(
                "frame length and step must be positive (got {} / {})",
                self.frame_length, self.frame_step
            )));
        }
        if self.mfcc_features + self.fbank_features + self.global_features == 0 {
            return Err(CorpusError::Config("no feature extractor enabled".to_string()));
        }
        Ok(())
    }
}

/// How class labels are presented to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LabelPolicy {
    Multiclass,
    OneVsAll { main_class: i64 },
}

impl LabelPolicy {
    /// Label stored in train/test files for a sample with original label `label`.
    pub fn apply(&self, label: i64) -> i64 {
        match self {
            LabelPolicy::Multiclass => label,
            LabelPolicy::OneVsAll { main_class } => i64::from(label == *main_class),
        }
    }

    /// Model folder name for this policy.
    pub fn model_folder_name(&self) -> String {
        match self {
            LabelPolicy::Multiclass => "multiclass".to_string(),
            LabelPolicy::OneVsAll { main_class } => format!("one_vs_all__main_voice__{}", main_class),
        }
    }
}

/// Shuffle and split settings for the assembly phase.
#[derive(Debug, Clone, Serialize)]
pub struct SplitConfig {
    /// Fraction of the shuffled corpus written to the train file, in [0, 1]
    pub train_size: f64,
    pub policy: LabelPolicy,
    /// Fixed shuffle seed; `None` seeds from the wall clock
    pub seed: Option<u64>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_size: 0.8,
            policy: LabelPolicy::Multiclass,
            seed: None,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.train_size) {
            return Err(CorpusError::Config(format!(
                "train size must be within [0, 1], got {}",
                self.train_size
            )));
        }
        Ok(())
    }
}
