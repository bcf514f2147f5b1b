//! Local Whisper transcription using whisper-rs.
//!
//! Expects 16 kHz WAV input; the bot converts other containers before
//! queueing them for this backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::model::{ModelStore, WhisperModel};
use crate::{AsrSettings, ModelInfo, Result, TranscribeError, Transcriber, validate_audio_file};

const SUPPORTED_FORMATS: &[&str] = &[".wav"];
const SAMPLE_RATE: u32 = 16_000;

/// Local Whisper transcriber using whisper.cpp.
pub struct LocalWhisperClient {
    model: WhisperModel,
    model_path: Option<PathBuf>,
    language: Option<String>,
    context: Mutex<Option<WhisperContext>>,
}

impl LocalWhisperClient {
    pub fn new(model: WhisperModel) -> Self {
        Self {
            model,
            model_path: None,
            language: None,
            context: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &AsrSettings) -> Result<Self> {
        let model = match settings.model.as_deref() {
            Some(name) => WhisperModel::from_name(name)
                .ok_or_else(|| TranscribeError::ModelLoad(format!("Unknown model {:?}", name)))?,
            None => WhisperModel::default(),
        };
        Ok(Self {
            model,
            model_path: settings.model_path.clone(),
            language: settings.language.clone(),
            context: Mutex::new(None),
        })
    }

    fn load_context(&self, path: &Path) -> Result<()> {
        info!(model = ?self.model, path = ?path, "Loading ggml model");
        let path_str = path
            .to_str()
            .ok_or_else(|| TranscribeError::ModelLoad("Invalid model path".to_string()))?;
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| TranscribeError::ModelLoad(e.to_string()))?;
        *self.context.lock() = Some(ctx);
        info!("Local model ready");
        Ok(())
    }

    fn run(&self, samples: &[f32]) -> Result<String> {
        let guard = self.context.lock();
        let ctx = guard.as_ref().ok_or(TranscribeError::ModelNotLoaded)?;

        let failed = |what: &str, e: whisper_rs::WhisperError| {
            TranscribeError::TranscriptionFailed(format!("{what}: {e}"))
        };
        let mut state = ctx
            .create_state()
            .map_err(|e| failed("Could not create decoder state", e))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        // None lets whisper detect the language.
        params.set_language(self.language.as_deref());
        params.set_no_context(true);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| failed("Decoding failed", e))?;

        let segments = state
            .full_n_segments()
            .map_err(|e| failed("Could not count segments", e))?;
        let text = (0..segments)
            .map(|i| {
                state
                    .full_get_segment_text(i)
                    .map_err(|e| failed("Could not read segment", e))
            })
            .collect::<Result<Vec<_>>>()?
            .concat();
        debug!(segments, "Decoded audio");

        Ok(text.trim().to_string())
    }
}

/// Reads a 16 kHz WAV file as mono f32 samples.
fn read_samples(path: &Path) -> Result<Vec<f32>> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| TranscribeError::InvalidAudio(format!("Failed to read WAV: {}", e)))?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE {
        return Err(TranscribeError::InvalidAudio(format!(
            "Expected {} Hz audio, got {} Hz",
            SAMPLE_RATE, spec.sample_rate
        )));
    }
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| TranscribeError::InvalidAudio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| TranscribeError::InvalidAudio(e.to_string()))?
        }
    };

    debug!(samples = samples.len(), channels, "Read WAV samples");

    if channels == 1 {
        return Ok(samples);
    }
    Ok(samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

#[async_trait]
impl Transcriber for LocalWhisperClient {
    async fn load_model(&self) -> Result<()> {
        let path = match &self.model_path {
            Some(p) => p.clone(),
            None => {
                let fetched = match ModelStore::default_location() {
                    Ok(store) => store.ensure(self.model).await,
                    Err(e) => Err(e),
                };
                fetched.map_err(|e| TranscribeError::ModelLoad(format!("{:#}", e)))?
            }
        };
        self.load_context(&path)
    }

    fn is_loaded(&self) -> bool {
        self.context.lock().is_some()
    }

    async fn transcribe(&self, audio_path: &Path) -> Result<String> {
        validate_audio_file(audio_path, SUPPORTED_FORMATS)?;
        // Inference is CPU bound; keep other tasks on this runtime moving.
        tokio::task::block_in_place(|| {
            let samples = read_samples(audio_path)?;
            self.run(&samples)
        })
    }

    fn name(&self) -> &str {
        "local-whisper"
    }

    fn supported_formats(&self) -> &[&'static str] {
        SUPPORTED_FORMATS
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "Local Whisper".to_string(),
            model: self.model.filename().to_string(),
            device: Some("cpu".to_string()),
            language: self.language.clone(),
            is_loaded: self.is_loaded(),
            supported_formats: SUPPORTED_FORMATS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_stereo_is_mixed_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, SAMPLE_RATE, 2, &[16384, 0, 16384, 0]);
        let samples = read_samples(&path).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_wrong_sample_rate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hifi.wav");
        write_wav(&path, 44_100, 1, &[0, 1, 2]);
        assert!(matches!(
            read_samples(&path),
            Err(TranscribeError::InvalidAudio(_))
        ));
    }

    #[test]
    fn test_settings_pick_model() {
        let settings = AsrSettings {
            model: Some("base".into()),
            ..Default::default()
        };
        let client = LocalWhisperClient::from_settings(&settings).unwrap();
        assert_eq!(client.model, WhisperModel::BaseQ8);
        assert!(!client.is_loaded());

        let bad = AsrSettings {
            model: Some("gigantic".into()),
            ..Default::default()
        };
        assert!(LocalWhisperClient::from_settings(&bad).is_err());
    }
}
