//! External script invocation
//!
//! Feature computation and model training are delegated to interpreter scripts.
//! Only the files they declare as output are consumed; stdout is logged at debug.

use crate::config::ScriptConfig;
use crate::error::{CorpusError, Result};
use crate::features::{load_feature_rows, FeatureComputation, FeatureRequest, FeatureRow};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, warn};

/// Builder for `<interpreter> <script> <args...>`.
pub struct ScriptCommand {
    interpreter: String,
    script: PathBuf,
    args: Vec<String>,
}

impl ScriptCommand {
    pub fn new(interpreter: impl Into<String>, script: impl AsRef<Path>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl ToString) -> Self {
        self.args.push(value.to_string());
        self
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Boolean flags travel as `0` / `1`.
    pub fn flag(self, value: bool) -> Self {
        self.arg(u8::from(value))
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Run and fail on a non-zero exit status.
    pub fn execute(self) -> Result<Output> {
        let script = self.script.display().to_string();
        let output = self.spawn()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CorpusError::Execution(format!("{} exited with {}: {}", script, output.status, stderr.trim())));
        }

        Ok(output)
    }

    /// Run and hand back the output whatever the exit status.
    pub fn execute_unchecked(self) -> Result<Output> {
        self.spawn()
    }

    fn spawn(self) -> Result<Output> {
        if !self.script.exists() {
            return Err(CorpusError::ScriptNotFound(self.script));
        }

        debug!("Running {} {} {}", self.interpreter, self.script.display(), self.args.join(" "));

        Command::new(&self.interpreter)
            .arg(&self.script)
            .args(&self.args)
            .output()
            .map_err(|e| CorpusError::Execution(format!("cannot start {}: {}", self.interpreter, e)))
    }
}

/// Whether `interpreter` can be started at all.
pub fn is_interpreter_available(interpreter: &str) -> bool {
    Command::new(interpreter).arg("--version").output().is_ok()
}

/// Feature computation by spawning the configured features script once per request.
///
/// Positional arguments: kind, input, output, sample rate, frame length,
/// frame step, feature count, normalize (0/1), exclude silence (0/1).
pub struct ProcessComputation {
    scripts: ScriptConfig,
}

impl ProcessComputation {
    pub fn new(scripts: ScriptConfig) -> Self {
        Self { scripts }
    }
}

impl FeatureComputation for ProcessComputation {
    fn compute(&self, request: &FeatureRequest) -> Result<Vec<FeatureRow>> {
        let output = ScriptCommand::new(&self.scripts.interpreter, &self.scripts.features_script)
            .arg(request.kind.as_str())
            .path(&request.input)
            .path(&request.output)
            .arg(request.sample_rate)
            .arg(request.frame_length)
            .arg(request.frame_step)
            .arg(request.feature_count)
            .flag(request.normalize)
            .flag(request.exclude_silence)
            .execute_unchecked()?;

        if !output.status.success() {
            warn!(
                "{} script exited with {} for {}",
                request.kind,
                output.status,
                request.input.display()
            );
        }

        let rows = load_feature_rows(&request.output);
        if let Err(e) = std::fs::remove_file(&request.output) {
            debug!("Could not remove {}: {}", request.output.display(), e);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureKind;
    use tempfile::TempDir;

    #[test]
    fn test_arguments_are_positional() {
        let cmd = ScriptCommand::new("python", "py_model.py")
            .arg("fit")
            .path("/data/_train.txt")
            .arg(13)
            .flag(true)
            .flag(false);
        assert_eq!(cmd.args(), &["fit", "/data/_train.txt", "13", "1", "0"]);
    }

    #[test]
    fn test_unknown_interpreter_is_unavailable() {
        assert!(!is_interpreter_available("voxcorpus-no-such-interpreter"));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_is_available() {
        assert!(is_interpreter_available("sh"));
    }

    #[test]
    fn test_missing_script() {
        let err = ScriptCommand::new("python", "/nonexistent/script.py").execute().unwrap_err();
        assert!(matches!(err, CorpusError::ScriptNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_computation_reads_declared_output() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("features.sh");
        // $1 kind, $2 input, $3 output
        std::fs::write(&script, "printf '1.5 2\\n3 4.25\\n' > \"$3\"\n").unwrap();

        let computation = ProcessComputation::new(ScriptConfig {
            interpreter: "sh".to_string(),
            features_script: script,
            model_script: PathBuf::from("unused"),
        });

        let output = dir.path().join("out.mfcc");
        let request = FeatureRequest {
            kind: FeatureKind::Cepstral,
            input: dir.path().join("in.amplitudes"),
            output: output.clone(),
            sample_rate: 44100,
            frame_length: 1103,
            frame_step: 441,
            feature_count: 2,
            normalize: false,
            exclude_silence: false,
        };

        let rows = computation.compute(&request).unwrap();
        assert_eq!(rows, vec![vec![1.5, 2.0], vec![3.0, 4.25]]);
        assert!(!output.exists(), "script output should be cleaned up");
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_script_without_output() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("broken.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        let result = ScriptCommand::new("sh", &script).execute();
        assert!(matches!(result, Err(CorpusError::Execution(_))));
    }
}
