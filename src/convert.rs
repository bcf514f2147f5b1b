//! Audio container conversion through an external ffmpeg process.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// Converts recordings into a format the ASR backend accepts.
#[derive(Debug, Clone)]
pub struct Converter {
    program: PathBuf,
}

impl Converter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Converts `input` into `format` next to it and returns the new path.
    ///
    /// The input file is left in place. WAV output is resampled to 16 kHz mono.
    pub async fn convert(&self, input: &Path, format: &str) -> Result<PathBuf, ConvertError> {
        let output = input.with_extension(format);
        if output == input {
            return Ok(output);
        }

        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .args(["-loglevel", "error"])
            .arg("-i")
            .arg(input)
            .arg("-vn");
        if format.eq_ignore_ascii_case("wav") {
            command.args(["-ar", "16000", "-ac", "1"]);
        }
        command
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(input = ?input, output = ?output, "Converting recording");
        let result = command.output().await.map_err(|source| ConvertError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !result.status.success() {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(ConvertError::Failed {
                program: self.program.display().to_string(),
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(output)
    }
}
