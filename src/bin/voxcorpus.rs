// voxcorpus - feature extraction and train/test assembly for speaker classification

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use voxcorpus::command::is_interpreter_available;
use voxcorpus::{
    CorpusLayout, DatasetAssembler, ExtractionParams, LabelPolicy, ModelRunner, ProcessComputation, ScriptConfig,
    SplitConfig,
};

#[derive(Parser)]
#[command(name = "voxcorpus", version, about = "Build speaker classification corpora from WAV recordings")]
struct Cli {
    /// Interpreter used to run the feature and model scripts
    #[arg(long, global = true, default_value = "python")]
    interpreter: String,

    /// Feature computation script
    #[arg(long, global = true, default_value = "scripts/py_features.py")]
    features_script: PathBuf,

    /// Model training/prediction script
    #[arg(long, global = true, default_value = "scripts/py_model.py")]
    model_script: PathBuf,

    /// Worker threads for extraction (defaults to available cores)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract one feature file per recording into a mirrored directory tree
    Extract {
        #[arg(long)]
        wav_root: PathBuf,
        #[arg(long)]
        features_root: PathBuf,
        /// Remove existing features before extracting
        #[arg(long)]
        clear: bool,
        #[command(flatten)]
        extraction: ExtractionArgs,
    },
    /// Assemble shuffled train/test files from extracted features
    Assemble {
        #[arg(long)]
        features_root: PathBuf,
        #[arg(long)]
        models_root: PathBuf,
        #[command(flatten)]
        split: SplitArgs,
    },
    /// Train the classifier on an assembled train/test pair
    Fit {
        #[arg(long)]
        models_root: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Extract, assemble and fit in one run
    Train {
        #[arg(long)]
        wav_root: PathBuf,
        #[arg(long)]
        features_root: PathBuf,
        #[arg(long)]
        models_root: PathBuf,
        /// Re-extract features even if the features root already exists
        #[arg(long)]
        reparse: bool,
        #[command(flatten)]
        extraction: ExtractionArgs,
        #[command(flatten)]
        split: SplitArgs,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Classify a single recording with a trained model
    Predict {
        #[arg(long)]
        wav: PathBuf,
        #[arg(long)]
        models_root: PathBuf,
        #[command(flatten)]
        extraction: ExtractionArgs,
        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Args)]
struct ExtractionArgs {
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,
    /// Frame window length in seconds
    #[arg(long, default_value_t = 0.025)]
    frame_window: f64,
    /// Frame step in seconds
    #[arg(long, default_value_t = 0.01)]
    frame_step: f64,
    /// Cepstral coefficients per frame (0 disables)
    #[arg(long, default_value_t = 13)]
    mfcc: usize,
    /// Filterbank energies per frame (0 disables)
    #[arg(long, default_value_t = 0)]
    fbank: usize,
    /// Coarse spectral features per frame (0 disables)
    #[arg(long, default_value_t = 0)]
    global: usize,
    #[arg(long)]
    normalize: bool,
    #[arg(long)]
    exclude_silence: bool,
    /// Hand raw first-channel bytes to the scripts instead of text
    #[arg(long)]
    raw_amplitudes: bool,
}

impl ExtractionArgs {
    fn params(&self) -> ExtractionParams {
        ExtractionParams {
            mfcc_features: self.mfcc,
            fbank_features: self.fbank,
            global_features: self.global,
            normalize: self.normalize,
            exclude_silence: self.exclude_silence,
            amplitudes_as_text: !self.raw_amplitudes,
            ..ExtractionParams::from_seconds(self.sample_rate, self.frame_window, self.frame_step)
        }
    }
}

#[derive(Args)]
struct SplitArgs {
    /// Fraction of samples written to the train file
    #[arg(long, default_value_t = 0.8)]
    train_size: f64,
    /// Relabel as one-vs-all with this class as positive
    #[arg(long)]
    one_vs_all: Option<i64>,
    /// Fixed shuffle seed (defaults to wall clock)
    #[arg(long)]
    seed: Option<u64>,
}

impl SplitArgs {
    fn config(&self) -> SplitConfig {
        SplitConfig {
            train_size: self.train_size,
            policy: policy(self.one_vs_all),
            seed: self.seed,
        }
    }
}

#[derive(Args)]
struct ModelArgs {
    /// Model tag understood by the model script (e.g. NN, RF)
    #[arg(long, default_value = "RF")]
    model: String,
    /// Main class of a one-vs-all model
    #[arg(long = "main-class")]
    main_class: Option<i64>,
    /// Additional model dumps for two-step configurations
    #[arg(long = "secondary-model")]
    secondary_models: Vec<PathBuf>,
}

fn policy(one_vs_all: Option<i64>) -> LabelPolicy {
    match one_vs_all {
        Some(main_class) => LabelPolicy::OneVsAll { main_class },
        None => LabelPolicy::Multiclass,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let scripts = ScriptConfig {
        interpreter: cli.interpreter.clone(),
        features_script: cli.features_script.clone(),
        model_script: cli.model_script.clone(),
    };
    let layout = CorpusLayout::default();
    settings("Scripts", &scripts);
    settings("Layout", &layout);

    if !matches!(cli.command, Command::Assemble { .. }) && !is_interpreter_available(&scripts.interpreter) {
        anyhow::bail!("Interpreter '{}' cannot be started", scripts.interpreter);
    }

    let assembler = |params: ExtractionParams, split: SplitConfig| {
        let computation = Arc::new(ProcessComputation::new(scripts.clone()));
        let assembler = DatasetAssembler::new(layout.clone(), params, split, computation);
        match cli.workers {
            Some(workers) => assembler.with_workers(workers),
            None => assembler,
        }
    };
    let runner = |model: &ModelArgs| {
        ModelRunner::new(scripts.clone(), layout.clone(), model.model.clone())
            .with_secondary_models(model.secondary_models.clone())
    };

    match &cli.command {
        Command::Extract {
            wav_root,
            features_root,
            clear,
            extraction,
        } => {
            let params = extraction.params();
            settings("Extraction", &params);
            let assembler = assembler(params, SplitConfig::default());
            if *clear {
                assembler.clear_features(features_root).context("Failed to clear features root")?;
            }
            let snapshot = assembler
                .extract_features(wav_root, features_root)
                .context("Feature extraction failed")?;
            report(&snapshot)?;
        }
        Command::Assemble {
            features_root,
            models_root,
            split,
        } => {
            let config = split.config();
            settings("Split", &config);
            let model_dir = model_dir(models_root, config.policy);
            let summary = assembler(ExtractionParams::default(), config)
                .create_train_test(features_root, &model_dir)
                .context("Train/test assembly failed")?;
            report(&summary)?;
        }
        Command::Fit { models_root, model } => {
            let model_dir = model_dir(models_root, policy(model.main_class));
            let score = runner(model).fit(&model_dir).context("Model training failed")?;
            info!("Training report written to {}", score.display());
        }
        Command::Train {
            wav_root,
            features_root,
            models_root,
            reparse,
            extraction,
            split,
            model,
        } => {
            let config = split.config();
            let params = extraction.params();
            settings("Split", &config);
            settings("Extraction", &params);
            let model_dir = model_dir(models_root, config.policy);
            let assembler = assembler(params, config);

            if *reparse || !features_root.exists() {
                assembler.clear_features(features_root).context("Failed to clear features root")?;
                let snapshot = assembler
                    .extract_features(wav_root, features_root)
                    .context("Feature extraction failed")?;
                report(&snapshot)?;
            }

            let summary = assembler
                .create_train_test(features_root, &model_dir)
                .context("Train/test assembly failed")?;
            report(&summary)?;

            let score = runner(model).fit(&model_dir).context("Model training failed")?;
            info!("Training report written to {}", score.display());
        }
        Command::Predict {
            wav,
            models_root,
            extraction,
            model,
        } => {
            let model_dir = model_dir(models_root, policy(model.main_class));
            let features = model_dir.join("_last_recorded.features");
            let snapshot = assembler(extraction.params(), SplitConfig::default())
                .extract_file(wav, &features)
                .context("Feature extraction failed")?;
            if snapshot.written == 0 {
                anyhow::bail!("No features could be extracted from {}", wav.display());
            }

            let prediction = runner(model).predict(&features, &model_dir).context("Prediction failed")?;
            info!("Predicted class for {}: {}", wav.display(), prediction);
            println!("{}", prediction);
        }
    }

    Ok(())
}

fn model_dir(models_root: &Path, policy: LabelPolicy) -> PathBuf {
    models_root.join(policy.model_folder_name())
}

/// Echo an effective setting group at debug level.
fn settings<T: serde::Serialize>(name: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => debug!("{} settings: {}", name, json),
        Err(e) => warn!("Cannot serialize {} settings: {}", name, e),
    }
}

fn report<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_value(value).context("Failed to serialize run summary")?;
    if json.get("failed").and_then(|f| f.as_u64()).unwrap_or(0) > 0 {
        warn!("Some recordings failed extraction, see log above");
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
