//! Classifier training and prediction through the external model script
//!
//! `fit`:     `fit <train> <test> <model dump> <score report> <model name> [secondary models...]`
//! `predict`: `predict <features> <model dump> <prediction> <model name> [secondary models...]`

use crate::command::ScriptCommand;
use crate::config::{CorpusLayout, ScriptConfig};
use crate::error::{CorpusError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct ModelRunner {
    scripts: ScriptConfig,
    layout: CorpusLayout,
    model_name: String,
    /// Extra model dumps for two-step configurations
    secondary_models: Vec<PathBuf>,
}

impl ModelRunner {
    pub fn new(scripts: ScriptConfig, layout: CorpusLayout, model_name: impl Into<String>) -> Self {
        Self {
            scripts,
            layout,
            model_name: model_name.into(),
            secondary_models: Vec::new(),
        }
    }

    pub fn with_secondary_models(mut self, models: Vec<PathBuf>) -> Self {
        self.secondary_models = models;
        self
    }

    pub fn fit_command(&self, model_dir: &Path) -> ScriptCommand {
        let cmd = ScriptCommand::new(&self.scripts.interpreter, &self.scripts.model_script)
            .arg("fit")
            .path(self.layout.train_path(model_dir))
            .path(self.layout.test_path(model_dir))
            .path(self.layout.model_dump_path(model_dir))
            .path(self.layout.score_report_path(model_dir))
            .arg(&self.model_name);
        self.with_secondary(cmd)
    }

    pub fn predict_command(&self, features: &Path, model_dir: &Path) -> ScriptCommand {
        let cmd = ScriptCommand::new(&self.scripts.interpreter, &self.scripts.model_script)
            .arg("predict")
            .path(features)
            .path(self.layout.model_dump_path(model_dir))
            .path(self.layout.prediction_path(model_dir))
            .arg(&self.model_name);
        self.with_secondary(cmd)
    }

    fn with_secondary(&self, cmd: ScriptCommand) -> ScriptCommand {
        self.secondary_models.iter().fold(cmd, |cmd, model| cmd.path(model))
    }

    /// Train on `<model_dir>/_train.txt`, score on `_test.txt`; returns the score report path.
    pub fn fit(&self, model_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let model_dir = model_dir.as_ref();
        let train = self.layout.train_path(model_dir);
        if !train.exists() {
            return Err(CorpusError::Config(format!("no train file at {}", train.display())));
        }

        info!("Training {} model in {}", self.model_name, model_dir.display());
        self.fit_command(model_dir).execute()?;
        Ok(self.layout.score_report_path(model_dir))
    }

    /// Classify a combined feature file; returns the script's prediction output.
    pub fn predict(&self, features: impl AsRef<Path>, model_dir: impl AsRef<Path>) -> Result<String> {
        let model_dir = model_dir.as_ref();
        let dump = self.layout.model_dump_path(model_dir);
        if !dump.exists() {
            return Err(CorpusError::Config(format!("no trained model at {}", dump.display())));
        }

        self.predict_command(features.as_ref(), model_dir).execute()?;
        let prediction = std::fs::read_to_string(self.layout.prediction_path(model_dir))?;
        Ok(prediction.trim().to_string())
    }
}
