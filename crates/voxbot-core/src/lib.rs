//! Core types for voxbot.
//!
//! This crate holds the pieces shared by every other voxbot crate: the
//! configuration, the transcription job queue, the text chunker used for
//! outbound messages and the retry layer wrapped around every external call.

mod chunk;
mod config;
mod job;
pub mod retry;

pub use chunk::split_text;
pub use config::{
    Config, ConfigManager, ENV_CONFIG_PATH, ENV_OPENAI_KEY, ENV_TELEGRAM_TOKEN, default_data_dir,
    models_dir,
};
pub use job::{ChatId, Job, JobQueue, MessageId};
pub use retry::{ConnectivityProbe, ResilientExecutor, RetryPolicy, Retryable, TcpProbe};

/// Application name
pub const APP_NAME: &str = "voxbot";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";
