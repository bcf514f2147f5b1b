//! Inbound events, independent of the chat service that produced them.

use voxbot_core::{ChatId, MessageId};

/// A message the bot reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender_id: i64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Voice message (ogg/opus)
    Voice { file_id: String },
    /// Round video message (mp4)
    VideoNote { file_id: String },
    /// Bot command
    Command(Command),
}

/// Commands understood by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List the transcription queue
    Check,
    /// Report the speech recognition backend status
    AsrStatus,
    /// Mention every administrator of the chat
    Everyone,
}

impl Command {
    /// Parses `/name` or `/name@botname`, ignoring any arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?.strip_prefix('/')?;
        let name = word.split('@').next().unwrap_or(word);
        match name.to_lowercase().as_str() {
            "check" => Some(Self::Check),
            "asr_status" => Some(Self::AsrStatus),
            "everyone" => Some(Self::Everyone),
            _ => None,
        }
    }
}

/// A member of a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: i64,
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: String,
}
