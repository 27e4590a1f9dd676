use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Frame count mismatch for {path}: extractors produced {counts:?} frames")]
    Alignment { path: PathBuf, counts: Vec<usize> },

    #[error("No {kind} features produced for {path}")]
    EmptyFeatures { path: PathBuf, kind: String },

    #[error("Cannot parse class label from directory name: {0}")]
    LabelParse(String),

    #[error("No features found for class {0}")]
    MissingLabel(i64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External process failed: {0}")]
    Execution(String),

    #[error("Script not found: {0}")]
    ScriptNotFound(PathBuf),

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, CorpusError>;
