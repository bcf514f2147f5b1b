//! ggml model files for the local backend.
//!
//! Files come from the whisper.cpp repository on Hugging Face and are kept in
//! a [`ModelStore`], fetched the first time they are needed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use voxbot_core::models_dir;

const DOWNLOAD_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Quantized Whisper checkpoints the local backend can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhisperModel {
    TinyQ8,
    BaseQ8,
    SmallQ8,
    MediumQ8,
    #[default]
    LargeV3TurboQ5,
}

impl WhisperModel {
    const ALL: [Self; 5] = [
        Self::TinyQ8,
        Self::BaseQ8,
        Self::SmallQ8,
        Self::MediumQ8,
        Self::LargeV3TurboQ5,
    ];

    pub fn filename(&self) -> &'static str {
        match self {
            Self::TinyQ8 => "ggml-tiny-q8_0.bin",
            Self::BaseQ8 => "ggml-base-q8_0.bin",
            Self::SmallQ8 => "ggml-small-q8_0.bin",
            Self::MediumQ8 => "ggml-medium-q8_0.bin",
            Self::LargeV3TurboQ5 => "ggml-large-v3-turbo-q5_0.bin",
        }
    }

    /// Names accepted in the `asr_model` setting.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::TinyQ8 => &["tiny", "tiny-q8"],
            Self::BaseQ8 => &["base", "base-q8"],
            Self::SmallQ8 => &["small", "small-q8"],
            Self::MediumQ8 => &["medium", "medium-q8"],
            Self::LargeV3TurboQ5 => &["turbo", "large-v3-turbo", "large-v3-turbo-q5"],
        }
    }

    /// Rough download size, for progress when the server sends no length.
    fn approx_bytes(&self) -> u64 {
        match self {
            Self::TinyQ8 => 44_000_000,
            Self::BaseQ8 => 82_000_000,
            Self::SmallQ8 => 264_000_000,
            Self::MediumQ8 => 823_000_000,
            Self::LargeV3TurboQ5 => 574_000_000,
        }
    }

    pub fn url(&self) -> String {
        format!("{DOWNLOAD_BASE}/{}", self.filename())
    }

    /// Looks a model up by alias or file name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.filename() == name || m.aliases().contains(&name.as_str()))
    }
}

/// Directory holding downloaded model files.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the voxbot data directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(models_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, model: WhisperModel) -> PathBuf {
        self.dir.join(model.filename())
    }

    pub fn contains(&self, model: WhisperModel) -> bool {
        self.path_of(model).is_file()
    }

    /// Returns the model file, downloading it first if it is missing.
    pub async fn ensure(&self, model: WhisperModel) -> Result<PathBuf> {
        if self.contains(model) {
            return Ok(self.path_of(model));
        }
        warn!(model = ?model, dir = ?self.dir, "Model not found locally, downloading");
        self.download(model).await
    }

    /// Downloads `model` into the store, replacing any existing copy.
    ///
    /// The file only appears under its final name once complete.
    pub async fn download(&self, model: WhisperModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create models directory {:?}", self.dir))?;

        let url = model.url();
        info!(model = ?model, url = %url, "Downloading model");
        let response = reqwest::get(&url)
            .await
            .with_context(|| format!("Failed to request {url}"))?;
        if !response.status().is_success() {
            bail!("Model download failed with HTTP {}", response.status());
        }
        let expected = response
            .content_length()
            .unwrap_or_else(|| model.approx_bytes())
            .max(1);

        let target = self.path_of(model);
        let partial = target.with_extension("bin.part");
        let mut file = fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {:?}", partial))?;

        let mut received: u64 = 0;
        let mut reported = 0;
        let mut body = response.bytes_stream();
        while let Some(piece) = body.next().await {
            let piece = piece.context("Model download interrupted")?;
            file.write_all(&piece)
                .await
                .with_context(|| format!("Failed to write {:?}", partial))?;
            received += piece.len() as u64;

            let percent = (received * 100 / expected).min(100) / 10 * 10;
            if percent > reported {
                reported = percent;
                info!(percent, "Model download progress");
            }
        }
        file.flush().await?;
        drop(file);

        fs::rename(&partial, &target)
            .await
            .with_context(|| format!("Failed to move {:?} into place", partial))?;
        info!(path = ?target, bytes = received, "Model downloaded");
        Ok(target)
    }
}
