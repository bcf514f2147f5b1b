//! Configuration management for voxbot.
//!
//! Settings live in a TOML file under the user's configuration directory.
//! Secrets may also be supplied through the environment, which takes
//! precedence over the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use dirs::{config_dir, data_local_dir};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::{APP_NAME, DEFAULT_LOG_LEVEL};

/// Environment variable overriding the bot token from the config file.
pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

/// Environment variable overriding the OpenAI key from the config file.
pub const ENV_OPENAI_KEY: &str = "OPENAI_API_KEY";

/// Environment variable pointing at an alternative config file.
pub const ENV_CONFIG_PATH: &str = "VOXBOT_CONFIG";

/// Returns the default data directory for voxbot.
///
/// Downloaded artifacts and models are stored below this directory.
pub fn default_data_dir() -> Result<PathBuf> {
    let data_dir = data_local_dir().context("Failed to get data local directory")?;
    Ok(data_dir.join(APP_NAME))
}

/// Returns the directory where local Whisper models are stored.
pub fn models_dir() -> Result<PathBuf> {
    Ok(default_data_dir()?.join("models"))
}

/// Configuration for the bot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Telegram bot token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_token: Option<String>,

    /// Chat that receives error alerts and, in debug mode, the only chat served
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_chat_id: Option<i64>,

    /// Restrict the bot to `debug_chat_id`
    #[serde(default, skip_serializing_if = "is_false")]
    pub debug_mode: bool,

    /// Folder for downloaded voice messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_folder: Option<PathBuf>,

    /// Folder for downloaded video notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_note_folder: Option<PathBuf>,

    /// Maximum characters of transcript per outbound message
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Log level used when `VOXBOT_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Speech recognition provider key (e.g. "openai", "local")
    #[serde(default = "default_asr_provider")]
    pub asr_provider: String,

    /// Model name passed to the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr_model: Option<String>,

    /// Preferred language for transcription (ISO 639-1 code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr_language: Option<String>,

    /// OpenAI API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    /// Give up on a single transcription after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr_timeout_secs: Option<u64>,

    /// Attempts made for every chat API call
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay for exponential backoff (in seconds)
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Interval between connectivity checks while offline (in seconds)
    #[serde(default = "default_connectivity_poll")]
    pub connectivity_poll_secs: u64,

    /// Pause between continuation messages (in seconds)
    #[serde(default = "default_chunk_delay")]
    pub chunk_delay_secs: u64,

    /// Sleep of the worker while the queue is empty (in milliseconds)
    #[serde(default = "default_idle_poll")]
    pub idle_poll_millis: u64,

    /// ffmpeg binary used for container conversion
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,

    /// Interval of the periodic status log (in seconds, 0 disables it)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn default_max_message_length() -> usize {
    3696
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_asr_provider() -> String {
    "openai".to_string()
}

fn default_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

fn default_connectivity_poll() -> u64 {
    10
}

fn default_chunk_delay() -> u64 {
    2
}

fn default_idle_poll() -> u64 {
    1000
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_status_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: None,
            debug_chat_id: None,
            debug_mode: false,
            voice_folder: None,
            video_note_folder: None,
            max_message_length: default_max_message_length(),
            log_level: default_log_level(),
            asr_provider: default_asr_provider(),
            asr_model: None,
            asr_language: None,
            openai_key: None,
            asr_timeout_secs: None,
            retries: default_retries(),
            retry_delay_secs: default_retry_delay(),
            connectivity_poll_secs: default_connectivity_poll(),
            chunk_delay_secs: default_chunk_delay(),
            idle_poll_millis: default_idle_poll(),
            ffmpeg: default_ffmpeg(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl Config {
    /// Get the Telegram bot token
    pub fn telegram_token(&self) -> Option<&str> {
        self.telegram_token.as_deref()
    }

    /// Get the OpenAI API key
    pub fn key_openai(&self) -> Option<&str> {
        self.openai_key.as_deref()
    }

    /// Get the preferred language
    pub fn language(&self) -> Option<&str> {
        self.asr_language.as_deref()
    }

    /// Chat that the bot is restricted to, if debug mode is active.
    pub fn restricted_to(&self) -> Option<i64> {
        if self.debug_mode { self.debug_chat_id } else { None }
    }

    /// Folder for voice messages, falling back to the data directory.
    pub fn voice_folder(&self) -> Result<PathBuf> {
        match &self.voice_folder {
            Some(p) => Ok(p.clone()),
            None => Ok(default_data_dir()?.join("voice_messages")),
        }
    }

    /// Folder for video notes, falling back to the data directory.
    pub fn video_note_folder(&self) -> Result<PathBuf> {
        match &self.video_note_folder {
            Some(p) => Ok(p.clone()),
            None => Ok(default_data_dir()?.join("video_notes")),
        }
    }

    pub fn asr_timeout(&self) -> Option<Duration> {
        self.asr_timeout_secs.map(Duration::from_secs)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_secs(self.chunk_delay_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_millis)
    }

    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }

    pub fn connectivity_poll(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs)
    }

    /// Retry policy for chat API calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_secs(self.retry_delay_secs))
    }

    /// Overlay secrets found in the environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup(ENV_TELEGRAM_TOKEN).filter(|t| !t.is_empty()) {
            self.telegram_token = Some(token);
        }
        if let Some(key) = lookup(ENV_OPENAI_KEY).filter(|k| !k.is_empty()) {
            self.openai_key = Some(key);
        }
    }

    /// Checks values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_message_length > 0,
            "max_message_length must be greater than zero"
        );
        ensure!(self.retries >= 1, "retries must be at least 1");
        Ok(())
    }

    /// Renders the configuration with secrets masked, for diagnostics.
    pub fn to_redacted_string(&self) -> String {
        let mut redacted = self.clone();
        if redacted.telegram_token.is_some() {
            redacted.telegram_token = Some("***".to_string());
        }
        if redacted.openai_key.is_some() {
            redacted.openai_key = Some("***".to_string());
        }
        toml::to_string_pretty(&redacted).unwrap_or_else(|e| format!("<unrenderable: {e}>"))
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager, honouring `VOXBOT_CONFIG` when set.
    pub fn new() -> Result<Self> {
        let config_path = match std::env::var_os(ENV_CONFIG_PATH) {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    pub fn with_config_dir<P: AsRef<Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Loads the configuration from the config file or returns default.
    ///
    /// Environment overrides are not applied here; see [`Config::apply_env`].
    pub fn load(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file at {:?}", self.config_path))?;

        let config: Config = toml::from_str(&config_content)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file at {:?}", self.config_path))?;

        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
