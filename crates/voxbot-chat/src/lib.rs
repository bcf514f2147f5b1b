//! Chat transport for voxbot.
//!
//! The bot talks to its users through the [`Messenger`] trait. The only
//! production implementation is the Telegram Bot API client; tests substitute
//! in-memory fakes.

mod error;
mod event;
mod telegram;

use std::time::Duration;

use async_trait::async_trait;
pub use bytes::Bytes;
pub use error::{ChatError, Result};
pub use event::{Command, EventKind, InboundEvent, Member};
pub use telegram::TelegramClient;
use voxbot_core::{ChatId, MessageId};

/// Outbound and inbound operations of a chat service.
///
/// Message text is interpreted as HTML; callers escape user-provided content.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a new message, optionally as a reply, returning its id.
    async fn send(&self, chat_id: ChatId, text: &str, reply_to: Option<MessageId>)
    -> Result<MessageId>;

    /// Replace the text of an existing message.
    async fn edit(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()>;

    /// Download the content of an attached file.
    async fn fetch_file(&self, file_id: &str) -> Result<Bytes>;

    /// Wait up to `timeout` for new inbound events.
    async fn poll_events(&self, timeout: Duration) -> Result<Vec<InboundEvent>>;

    /// Administrators of a group chat.
    async fn administrators(&self, chat_id: ChatId) -> Result<Vec<Member>>;

    /// User id of the bot account itself.
    async fn bot_user_id(&self) -> Result<i64>;
}
