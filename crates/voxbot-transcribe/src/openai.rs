//! OpenAI transcription API backend.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    AsrSettings, ModelInfo, Result, TranscribeError, Transcriber, extension_of,
    validate_audio_file,
};

const TRANSCRIPTION_ENDPOINT: &str = "https://api.openai.com/v1/audio/transcriptions";
const DEFAULT_MODEL: &str = "gpt-4o-mini-transcribe";
const SUPPORTED_FORMATS: &[&str] = &[
    ".flac", ".m4a", ".mp3", ".mp4", ".mpeg", ".mpga", ".oga", ".ogg", ".wav", ".webm",
];

/// Configuration for the OpenAI transcription client.
#[derive(Debug, Clone, Default)]
pub struct OpenAIConfig {
    /// OpenAI API key
    pub api_key: Option<String>,

    /// Model to use (defaults to gpt-4o-mini-transcribe)
    pub model: Option<String>,

    /// Language hint (ISO 639-1 code)
    pub language: Option<String>,
}

impl OpenAIConfig {
    /// Create a new OpenAI config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Get the model name, using default if not set.
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

impl From<&AsrSettings> for OpenAIConfig {
    fn from(settings: &AsrSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            language: settings.language.clone(),
        }
    }
}

/// OpenAI transcription API client.
#[derive(Debug)]
pub struct OpenAIClient {
    client: reqwest::Client,
    config: OpenAIConfig,
    loaded: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given configuration.
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            loaded: AtomicBool::new(false),
        }
    }

    /// Create a client from just an API key with default settings.
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        Self::new(OpenAIConfig::new(api_key))
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(TranscribeError::NoApiKey)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match extension_of(path).as_deref() {
        Some(".ogg" | ".oga") => "audio/ogg",
        Some(".mp3" | ".mpeg" | ".mpga") => "audio/mpeg",
        Some(".m4a" | ".mp4") => "audio/mp4",
        Some(".webm") => "audio/webm",
        Some(".flac") => "audio/flac",
        _ => "audio/wav",
    }
}

#[async_trait]
impl Transcriber for OpenAIClient {
    async fn load_model(&self) -> Result<()> {
        // Hosted model: nothing to load, but fail early without credentials.
        self.api_key()?;
        self.loaded.store(true, Ordering::Release);
        info!(model = self.config.model(), "OpenAI transcription ready");
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        if !self.is_loaded() {
            return Err(TranscribeError::ModelNotLoaded);
        }
        validate_audio_file(audio_path, SUPPORTED_FORMATS)?;
        let audio = tokio::fs::read(audio_path).await?;

        debug!(
            model = self.config.model(),
            audio_bytes = audio.len(),
            language = ?self.config.language,
            "Sending transcription request to OpenAI"
        );

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.wav".to_string());

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name(file_name)
                    .mime_str(mime_for(audio_path))
                    .map_err(|e| TranscribeError::ApiError(e.to_string()))?,
            )
            .part(
                "model",
                reqwest::multipart::Part::text(self.config.model().to_string()),
            );

        if let Some(lang) = &self.config.language {
            form = form.part("language", reqwest::multipart::Part::text(lang.clone()));
        }

        let response = self
            .client
            .post(TRANSCRIPTION_ENDPOINT)
            .header("Authorization", format!("Bearer {}", self.api_key()?))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::ApiError(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::TranscriptionFailed(e.to_string()))?;

        Ok(transcription.text.trim().to_string())
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn supported_formats(&self) -> &[&'static str] {
        SUPPORTED_FORMATS
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "OpenAI".to_string(),
            model: self.config.model().to_string(),
            device: None,
            language: self.config.language.clone(),
            is_loaded: self.is_loaded(),
            supported_formats: SUPPORTED_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}
