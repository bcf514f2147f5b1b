//! Handlers for inbound chat events.
//!
//! Recordings are acknowledged with a status reply, stored on disk and queued
//! for the worker. Commands are answered directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use voxbot_chat::{Command, EventKind, InboundEvent, Messenger};
use voxbot_core::{ChatId, Config, Job, JobQueue, MessageId, ResilientExecutor};
use voxbot_transcribe::Transcriber;

use crate::convert::Converter;
use crate::text;
use crate::worker::{WorkerStatus, remove_artifact};

/// Where downloaded recordings are kept until the worker is done with them.
#[derive(Debug, Clone)]
pub struct Folders {
    pub voice: PathBuf,
    pub video_note: PathBuf,
}

impl Folders {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            voice: config.voice_folder()?,
            video_note: config.video_note_folder()?,
        })
    }

    pub fn create(&self) -> Result<()> {
        for dir in [&self.voice, &self.video_note] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create folder {:?}", dir))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Recording {
    Voice,
    VideoNote,
}

impl Recording {
    fn file_name(self, event: &InboundEvent) -> String {
        match self {
            Self::Voice => format!(
                "voice_{}_{}_{}.ogg",
                event.chat_id, event.sender_id, event.message_id
            ),
            Self::VideoNote => format!(
                "video_{}_{}_{}.mp4",
                event.chat_id, event.sender_id, event.message_id
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub folders: Folders,
    /// Only this chat is served when set
    pub restricted_to: Option<ChatId>,
    pub max_message_length: usize,
}

impl IntakeSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            folders: Folders::from_config(config)?,
            restricted_to: config.restricted_to(),
            max_message_length: config.max_message_length,
        })
    }
}

pub struct Intake {
    queue: Arc<JobQueue>,
    messenger: Arc<dyn Messenger>,
    transcriber: Arc<dyn Transcriber>,
    executor: ResilientExecutor,
    converter: Converter,
    settings: IntakeSettings,
    worker_status: WorkerStatus,
}

impl Intake {
    pub fn new(
        queue: Arc<JobQueue>,
        messenger: Arc<dyn Messenger>,
        transcriber: Arc<dyn Transcriber>,
        executor: ResilientExecutor,
        converter: Converter,
        settings: IntakeSettings,
        worker_status: WorkerStatus,
    ) -> Self {
        Self {
            queue,
            messenger,
            transcriber,
            executor,
            converter,
            settings,
            worker_status,
        }
    }

    /// Handles one event. Errors are logged, never returned.
    pub async fn handle(&self, event: InboundEvent) {
        if self.is_restricted(&event).await {
            return;
        }

        let result = match &event.kind {
            EventKind::Voice { file_id } => {
                self.accept_recording(&event, file_id, Recording::Voice).await
            }
            EventKind::VideoNote { file_id } => {
                self.accept_recording(&event, file_id, Recording::VideoNote)
                    .await
            }
            EventKind::Command(command) => self.answer(&event, *command).await,
        };

        if let Err(e) = result {
            error!(
                chat_id = event.chat_id,
                message_id = event.message_id,
                error = %format!("{:#}", e),
                "Failed to handle message"
            );
        }
    }

    /// In debug mode, everything outside the debug chat gets a maintenance notice.
    async fn is_restricted(&self, event: &InboundEvent) -> bool {
        match self.settings.restricted_to {
            Some(allowed) if allowed != event.chat_id => {
                debug!(chat_id = event.chat_id, "Ignoring message outside debug chat");
                if let Err(e) = self.reply(event, text::MAINTENANCE).await {
                    warn!(chat_id = event.chat_id, error = %e, "Failed to send maintenance notice");
                }
                true
            }
            _ => false,
        }
    }

    async fn reply(&self, event: &InboundEvent, message: &str) -> voxbot_chat::Result<MessageId> {
        self.executor
            .execute(|| {
                self.messenger
                    .send(event.chat_id, message, Some(event.message_id))
            })
            .await
    }

    async fn accept_recording(
        &self,
        event: &InboundEvent,
        file_id: &str,
        recording: Recording,
    ) -> Result<()> {
        let status_id = self
            .reply(event, text::QUEUED)
            .await
            .context("Failed to acknowledge recording")?;

        match self.store(event, file_id, recording).await {
            Ok(path) => {
                let job = Job::new(event.chat_id, status_id, path);
                info!(job = %job, "Job queued");
                self.queue.enqueue(job);
                Ok(())
            }
            Err(e) => {
                let edit = self
                    .executor
                    .execute(|| {
                        self.messenger
                            .edit(event.chat_id, status_id, text::DOWNLOAD_FAILED)
                    })
                    .await;
                if let Err(edit_err) = edit {
                    warn!(chat_id = event.chat_id, error = %edit_err, "Failed to update status message");
                }
                Err(e)
            }
        }
    }

    /// Downloads the recording and converts it for the ASR backend.
    ///
    /// Returns the file to queue. Nothing is left on disk on failure.
    async fn store(
        &self,
        event: &InboundEvent,
        file_id: &str,
        recording: Recording,
    ) -> Result<PathBuf> {
        let folder = match recording {
            Recording::Voice => &self.settings.folders.voice,
            Recording::VideoNote => &self.settings.folders.video_note,
        };
        let path = folder.join(recording.file_name(event));

        let content = self
            .executor
            .execute(|| self.messenger.fetch_file(file_id))
            .await
            .context("Failed to download recording")?;
        if let Err(e) = tokio::fs::write(&path, &content).await {
            remove_artifact(&path);
            return Err(e).with_context(|| format!("Failed to save recording to {:?}", path));
        }
        debug!(path = ?path, bytes = content.len(), "Recording saved");

        let Some(format) = self.target_format(&path, recording) else {
            return Ok(path);
        };
        let converted = self.converter.convert(&path, format).await;
        remove_artifact(&path);
        converted.context("Failed to convert recording")
    }

    /// Format to convert into, or `None` when the backend reads the file as is.
    fn target_format(&self, path: &Path, recording: Recording) -> Option<&'static str> {
        match recording {
            Recording::Voice if self.transcriber.supports(path) => None,
            Recording::Voice => Some("wav"),
            Recording::VideoNote if self.transcriber.supports(&path.with_extension("mp3")) => {
                Some("mp3")
            }
            Recording::VideoNote => Some("wav"),
        }
    }

    async fn answer(&self, event: &InboundEvent, command: Command) -> Result<()> {
        debug!(chat_id = event.chat_id, command = ?command, "Answering command");
        let messages: Vec<String> = match command {
            Command::Check => text::pack_lines(
                &text::escape_html(&self.queue.render_snapshot()),
                self.settings.max_message_length,
            ),
            Command::AsrStatus => vec![text::asr_status(
                &self.transcriber.model_info(),
                &self.worker_status.get().to_string(),
                self.queue.count(),
            )],
            Command::Everyone => vec![self.mention_everyone(event.chat_id).await],
        };
        for message in &messages {
            self.reply(event, message)
                .await
                .with_context(|| format!("Failed to answer {:?}", command))?;
        }
        Ok(())
    }

    async fn mention_everyone(&self, chat_id: ChatId) -> String {
        let members = self
            .executor
            .execute(|| self.messenger.administrators(chat_id))
            .await;
        let bot_id = self
            .executor
            .execute(|| self.messenger.bot_user_id())
            .await;
        let (members, bot_id) = match (members, bot_id) {
            (Ok(members), Ok(bot_id)) => (members, bot_id),
            (Err(e), _) | (_, Err(e)) => {
                warn!(chat_id, error = %e, "Failed to list chat members");
                return text::MEMBERS_FAILED.to_string();
            }
        };

        if !members.iter().any(|m| m.user_id == bot_id) {
            return text::BOT_NOT_ADMIN.to_string();
        }
        let mentions: Vec<String> = members
            .iter()
            .filter(|m| !m.is_bot)
            .map(text::mention)
            .collect();
        if mentions.is_empty() {
            text::NO_MEMBERS.to_string()
        } else {
            mentions.join(" ")
        }
    }
}
