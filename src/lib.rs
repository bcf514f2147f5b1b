//! Telegram bot that transcribes voice messages and video notes.
//!
//! Inbound recordings are stored and queued by [`intake`], then transcribed
//! one at a time by the [`worker`].

pub use voxbot_core::{APP_NAME, Config, ConfigManager, DEFAULT_LOG_LEVEL};

pub mod alert;
pub mod bot;
pub mod convert;
pub mod intake;
mod text;
pub mod worker;

#[cfg(test)]
mod testing;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "VOXBOT_LOG";

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
