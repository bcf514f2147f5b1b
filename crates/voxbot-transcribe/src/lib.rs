//! Transcription backend library for voxbot.
//!
//! This crate provides a trait-based abstraction for speech recognition over
//! audio files, a registry that builds backends from a provider name, and
//! implementations for OpenAI's transcription API and local Whisper models.

mod openai;
mod registry;

#[cfg(feature = "local-whisper")]
mod local;
#[cfg(feature = "local-whisper")]
mod model;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(feature = "local-whisper")]
pub use local::LocalWhisperClient;
#[cfg(feature = "local-whisper")]
pub use model::{ModelStore, WhisperModel};
pub use openai::{OpenAIClient, OpenAIConfig};
pub use registry::{ProviderConstructor, ProviderRegistry};
use thiserror::Error;
use tracing::warn;
use voxbot_core::Config;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("No API key configured")]
    NoApiKey,

    #[error("Model is not loaded, call load_model first")]
    ModelNotLoaded,

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Unknown ASR provider {name:?}, available: {available}")]
    UnknownProvider { name: String, available: String },
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Provider-independent settings handed to provider constructors.
#[derive(Debug, Clone, Default)]
pub struct AsrSettings {
    /// Model name, provider default when unset
    pub model: Option<String>,
    /// Language hint (ISO 639-1 code, e.g. "en")
    pub language: Option<String>,
    /// API key for hosted providers
    pub api_key: Option<String>,
    /// Explicit model file for local providers
    pub model_path: Option<PathBuf>,
}

impl AsrSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.asr_model.clone(),
            language: config.language().map(str::to_string),
            api_key: config.key_openai().map(str::to_string),
            model_path: None,
        }
    }
}

/// Description of a loaded (or not yet loaded) backend, for status reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
    pub device: Option<String>,
    pub language: Option<String>,
    pub is_loaded: bool,
    pub supported_formats: Vec<String>,
}

/// Trait for transcription backends.
///
/// Implement this trait to add new backends and register a constructor for it
/// in a [`ProviderRegistry`].
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Prepare the backend. Must succeed before [`transcribe`](Self::transcribe).
    async fn load_model(&self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Transcribe the audio file at `audio_path` to text.
    ///
    /// Silence or unintelligible audio yields an empty string, not an error.
    async fn transcribe(&self, audio_path: &Path) -> Result<String>;

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;

    /// File extensions (with leading dot, lowercase) the backend reads.
    fn supported_formats(&self) -> &[&'static str];

    fn model_info(&self) -> ModelInfo;

    /// Whether the file at `path` has an extension this backend reads.
    fn supports(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.supported_formats().contains(&ext.as_str()))
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
}

/// Checks that `path` is an existing regular file.
///
/// An extension outside `supported` only produces a warning; the backend gets
/// the final word on whether it can read the file.
pub fn validate_audio_file(path: &Path, supported: &[&str]) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        TranscribeError::InvalidAudio(format!("Audio file not found: {:?}: {}", path, e))
    })?;
    if !metadata.is_file() {
        return Err(TranscribeError::InvalidAudio(format!(
            "Path is not a file: {:?}",
            path
        )));
    }
    match extension_of(path) {
        Some(ext) if supported.contains(&ext.as_str()) => {}
        ext => warn!(path = ?path, extension = ?ext, "Possibly unsupported audio format"),
    }
    Ok(())
}
