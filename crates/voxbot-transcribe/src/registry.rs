//! Building transcription backends from a provider name.

use std::collections::BTreeMap;

use tracing::info;

use crate::{AsrSettings, OpenAIClient, Result, TranscribeError, Transcriber};

/// Constructor for a backend, given the shared settings.
pub type ProviderConstructor = fn(&AsrSettings) -> Result<Box<dyn Transcriber>>;

/// Maps provider keys (as written in the config file) to constructors.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// A registry with every backend compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("openai", |settings| {
            Ok(Box::new(OpenAIClient::new(settings.into())))
        });
        #[cfg(feature = "local-whisper")]
        registry.register("local", |settings| {
            Ok(Box::new(crate::LocalWhisperClient::from_settings(settings)?))
        });
        registry
    }

    /// Add or replace a backend under `key` (matched case-insensitively).
    pub fn register(&mut self, key: &str, constructor: ProviderConstructor) {
        self.providers.insert(key.to_lowercase(), constructor);
    }

    /// Keys of all registered backends, sorted.
    pub fn available(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Build the backend registered under `key`.
    ///
    /// The returned backend still needs [`Transcriber::load_model`].
    pub fn create(&self, key: &str, settings: &AsrSettings) -> Result<Box<dyn Transcriber>> {
        let constructor = self.providers.get(&key.to_lowercase()).ok_or_else(|| {
            TranscribeError::UnknownProvider {
                name: key.to_string(),
                available: self.available().join(", "),
            }
        })?;
        info!(provider = key, "Creating ASR provider");
        constructor(settings)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
