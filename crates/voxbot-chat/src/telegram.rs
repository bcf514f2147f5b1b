//! Telegram Bot API client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::debug;
use voxbot_core::{ChatId, MessageId};

use crate::{ChatError, Command, EventKind, InboundEvent, Member, Messenger, Result};

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Extra time on top of the long-poll timeout before the request is abandoned.
const POLL_GRACE: Duration = Duration::from_secs(15);
const PARSE_MODE: &str = "HTML";

/// Telegram Bot API client.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    /// Next update id to request from `getUpdates`
    offset: Mutex<Option<i64>>,
    bot_id: Mutex<Option<i64>>,
}

impl TelegramClient {
    /// Create a client for the bot identified by `token`.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(token, API_BASE)
    }

    /// Create a client talking to a different Bot API server.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            offset: Mutex::new(None),
            bot_id: Mutex::new(None),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P, timeout: Option<Duration>) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method, "Calling Telegram API");
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let mut request = self.client.post(url).json(params);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let envelope = match response.json::<Envelope<T>>().await {
            Ok(envelope) => envelope,
            Err(_) if status.is_server_error() => {
                return Err(ChatError::Server {
                    status: status.as_u16(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        envelope.into_result(status.as_u16())
    }

    async fn download(&self, file_path: &str) -> Result<Bytes> {
        let url = format!("{}/file/bot{}/{}", self.base_url, self.token, file_path);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ChatError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(ChatError::Api {
                code: status.as_u16(),
                description: "file download failed".to_string(),
            });
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId> {
        let params = SendMessage {
            chat_id,
            text,
            parse_mode: PARSE_MODE,
            reply_parameters: reply_to.map(|message_id| ReplyParameters {
                message_id,
                allow_sending_without_reply: true,
            }),
        };
        let message: Message = self.call("sendMessage", &params, None).await?;
        Ok(message.message_id)
    }

    async fn edit(&self, chat_id: ChatId, message_id: MessageId, text: &str) -> Result<()> {
        let params = EditMessageText {
            chat_id,
            message_id,
            text,
            parse_mode: PARSE_MODE,
        };
        match self.call::<_, IgnoredAny>("editMessageText", &params, None).await {
            Ok(_) => Ok(()),
            // A retried edit whose first attempt actually landed.
            Err(ChatError::Api { description, .. })
                if description.contains("message is not modified") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_file(&self, file_id: &str) -> Result<Bytes> {
        let file: File = self.call("getFile", &GetFile { file_id }, None).await?;
        let Some(path) = file.file_path else {
            return Err(ChatError::Api {
                code: 404,
                description: "file has no download path".to_string(),
            });
        };
        debug!(file_id, size = ?file.file_size, "Downloading file");
        self.download(&path).await
    }

    async fn poll_events(&self, timeout: Duration) -> Result<Vec<InboundEvent>> {
        let offset = *self.offset.lock();
        let params = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let updates: Vec<Update> = self
            .call("getUpdates", &params, Some(timeout + POLL_GRACE))
            .await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            *self.offset.lock() = Some(last + 1);
        }

        Ok(updates
            .into_iter()
            .filter_map(|u| u.message)
            .filter_map(Message::into_event)
            .collect())
    }

    async fn administrators(&self, chat_id: ChatId) -> Result<Vec<Member>> {
        let members: Vec<ChatMember> = self
            .call("getChatAdministrators", &ChatRef { chat_id }, None)
            .await?;
        Ok(members.into_iter().map(|m| m.user.into()).collect())
    }

    async fn bot_user_id(&self) -> Result<i64> {
        if let Some(id) = *self.bot_id.lock() {
            return Ok(id);
        }
        let me: User = self.call("getMe", &Empty {}, None).await?;
        *self.bot_id.lock() = Some(me.id);
        Ok(me.id)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

impl<T> Envelope<T> {
    fn into_result(self, http_status: u16) -> Result<T> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| ChatError::Malformed("successful response without result".into()));
        }

        let code = self.error_code.unwrap_or(http_status);
        let retry_after = self.parameters.and_then(|p| p.retry_after);
        match (code, retry_after) {
            (_, Some(secs)) => Err(ChatError::RateLimited {
                retry_after: Duration::from_secs(secs),
            }),
            (429, None) => Err(ChatError::RateLimited {
                retry_after: Duration::from_secs(1),
            }),
            (code, None) if code >= 500 => Err(ChatError::Server { status: code }),
            (code, None) => Err(ChatError::Api {
                code,
                description: self.description.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    parse_mode: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_parameters: Option<ReplyParameters>,
}

#[derive(Debug, Serialize)]
struct ReplyParameters {
    message_id: MessageId,
    allow_sending_without_reply: bool,
}

#[derive(Debug, Serialize)]
struct EditMessageText<'a> {
    chat_id: ChatId,
    message_id: MessageId,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Serialize)]
struct GetFile<'a> {
    file_id: &'a str,
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct ChatRef {
    chat_id: ChatId,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: MessageId,
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
    voice: Option<FileRef>,
    video_note: Option<FileRef>,
}

impl Message {
    fn into_event(self) -> Option<InboundEvent> {
        let kind = if let Some(voice) = self.voice {
            EventKind::Voice {
                file_id: voice.file_id,
            }
        } else if let Some(note) = self.video_note {
            EventKind::VideoNote {
                file_id: note.file_id,
            }
        } else {
            EventKind::Command(Command::parse(self.text.as_deref()?)?)
        };

        Some(InboundEvent {
            chat_id: self.chat.id,
            message_id: self.message_id,
            sender_id: self.from.map_or(self.chat.id, |u| u.id),
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    first_name: String,
    username: Option<String>,
}

impl From<User> for Member {
    fn from(user: User) -> Self {
        Member {
            user_id: user.id,
            is_bot: user.is_bot,
            username: user.username,
            first_name: user.first_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: ChatId,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(json: &str) -> Vec<Update> {
        let envelope: Envelope<Vec<Update>> = serde_json::from_str(json).unwrap();
        envelope.into_result(200).unwrap()
    }

    #[test]
    fn test_decode_voice_and_video_note() {
        let parsed = updates(
            r#"{"ok":true,"result":[
                {"update_id":10,"message":{"message_id":5,"from":{"id":77,"is_bot":false,"first_name":"Ann"},
                 "chat":{"id":-100,"type":"group"},"voice":{"file_id":"VOICE","duration":3}}},
                {"update_id":11,"message":{"message_id":6,"from":{"id":78,"is_bot":false,"first_name":"Bo"},
                 "chat":{"id":-100,"type":"group"},"video_note":{"file_id":"NOTE","length":240}}}
            ]}"#,
        );
        let events: Vec<_> = parsed
            .into_iter()
            .filter_map(|u| u.message)
            .filter_map(Message::into_event)
            .collect();

        assert_eq!(
            events,
            vec![
                InboundEvent {
                    chat_id: -100,
                    message_id: 5,
                    sender_id: 77,
                    kind: EventKind::Voice {
                        file_id: "VOICE".into()
                    },
                },
                InboundEvent {
                    chat_id: -100,
                    message_id: 6,
                    sender_id: 78,
                    kind: EventKind::VideoNote {
                        file_id: "NOTE".into()
                    },
                },
            ]
        );
    }

    #[test]
    fn test_plain_text_and_unknown_updates_are_ignored() {
        let parsed = updates(
            r#"{"ok":true,"result":[
                {"update_id":1,"message":{"message_id":1,"chat":{"id":5},"text":"hello"}},
                {"update_id":2,"edited_message":{"message_id":1,"chat":{"id":5},"text":"/check"}},
                {"update_id":3,"message":{"message_id":2,"chat":{"id":5},"text":"/check@voxbot"}}
            ]}"#,
        );
        let events: Vec<_> = parsed
            .into_iter()
            .filter_map(|u| u.message)
            .filter_map(Message::into_event)
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Command(Command::Check));
        // No sender: falls back to the chat id.
        assert_eq!(events[0].sender_id, 5);
    }

    #[test]
    fn test_envelope_errors() {
        let rate: Envelope<IgnoredAny> = serde_json::from_str(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#,
        )
        .unwrap();
        assert!(matches!(
            rate.into_result(429),
            Err(ChatError::RateLimited { retry_after }) if retry_after == Duration::from_secs(7)
        ));

        let bad: Envelope<IgnoredAny> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap();
        assert!(matches!(
            bad.into_result(400),
            Err(ChatError::Api { code: 400, ref description }) if description.contains("chat not found")
        ));

        let gateway: Envelope<IgnoredAny> =
            serde_json::from_str(r#"{"ok":false,"description":"Bad Gateway"}"#).unwrap();
        assert!(matches!(
            gateway.into_result(502),
            Err(ChatError::Server { status: 502 })
        ));
    }

    #[test]
    fn test_ok_without_result_is_malformed() {
        let envelope: Envelope<Message> = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(matches!(
            envelope.into_result(200),
            Err(ChatError::Malformed(_))
        ));
    }

    #[test]
    fn test_send_message_serialization() {
        let params = SendMessage {
            chat_id: 1,
            text: "hi",
            parse_mode: PARSE_MODE,
            reply_parameters: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert!(json.get("reply_parameters").is_none());
    }
}
