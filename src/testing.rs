//! In-memory fakes for the chat service and the ASR backend.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use voxbot_chat::{ChatError, InboundEvent, Member, Messenger};
use voxbot_core::{
    ChatId, ConnectivityProbe, JobQueue, MessageId, ResilientExecutor, RetryPolicy,
};
use voxbot_transcribe::{ModelInfo, TranscribeError, Transcriber};

use crate::worker::{WorkerState, WorkerStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send {
        chat_id: ChatId,
        text: String,
        reply_to: Option<MessageId>,
        id: MessageId,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
}

fn rejected() -> ChatError {
    ChatError::Api {
        code: 400,
        description: "Bad Request".to_string(),
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    pub calls: Mutex<Vec<Call>>,
    pub files: Mutex<HashMap<String, Bytes>>,
    pub admins: Mutex<Vec<Member>>,
    pub bot_id: i64,
    /// Sends numbered from this index onwards (0-based) are rejected.
    pub fail_sends_from: Option<usize>,
    pub fail_edits: AtomicBool,
    /// Send and edit attempts (0-based) that fail with a retryable 502.
    pub transient_failures: HashSet<usize>,
    /// Worker whose state is recorded at every edit.
    pub watch: Mutex<Option<WorkerStatus>>,
    pub states: Mutex<Vec<WorkerState>>,
    attempts: AtomicUsize,
    next_id: AtomicI64,
    sends: Mutex<usize>,
}

impl FakeMessenger {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            bot_id: 999,
            ..Default::default()
        }
    }

    pub fn failing_sends_from(mut self, index: usize) -> Self {
        self.fail_sends_from = Some(index);
        self
    }

    pub fn failing_transiently_at(mut self, attempts: &[usize]) -> Self {
        self.transient_failures = attempts.iter().copied().collect();
        self
    }

    /// Number of send and edit calls made, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn attempt(&self) -> voxbot_chat::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.transient_failures.contains(&attempt) {
            return Err(ChatError::Server { status: 502 });
        }
        Ok(())
    }

    pub fn with_file(self, file_id: &str, content: &'static [u8]) -> Self {
        self.files
            .lock()
            .insert(file_id.to_string(), Bytes::from_static(content));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn edits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn sends(&self) -> Vec<(String, Option<MessageId>, MessageId)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send {
                    text, reply_to, id, ..
                } => Some((text, reply_to, id)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> voxbot_chat::Result<MessageId> {
        self.attempt()?;
        let index = {
            let mut sends = self.sends.lock();
            *sends += 1;
            *sends - 1
        };
        if self.fail_sends_from.is_some_and(|from| index >= from) {
            return Err(rejected());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(Call::Send {
            chat_id,
            text: text.to_string(),
            reply_to,
            id,
        });
        Ok(id)
    }

    async fn edit(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> voxbot_chat::Result<()> {
        if let Some(status) = &*self.watch.lock() {
            self.states.lock().push(status.get());
        }
        self.attempt()?;
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(rejected());
        }
        self.calls.lock().push(Call::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn fetch_file(&self, file_id: &str) -> voxbot_chat::Result<Bytes> {
        self.files.lock().get(file_id).cloned().ok_or_else(rejected)
    }

    async fn poll_events(&self, _timeout: Duration) -> voxbot_chat::Result<Vec<InboundEvent>> {
        Ok(Vec::new())
    }

    async fn administrators(&self, _chat_id: ChatId) -> voxbot_chat::Result<Vec<Member>> {
        Ok(self.admins.lock().clone())
    }

    async fn bot_user_id(&self) -> voxbot_chat::Result<i64> {
        Ok(self.bot_id)
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Text(String),
    Fail,
    Hang,
}

pub struct FakeTranscriber {
    pub behavior: Behavior,
    pub formats: &'static [&'static str],
    /// Paths seen by `transcribe`, with whether the file existed at the time.
    pub seen: Mutex<Vec<(PathBuf, bool)>>,
    /// Queue lengths observed during `transcribe`.
    pub queue_lengths: Mutex<Vec<usize>>,
    pub queue: Option<Arc<JobQueue>>,
}

impl FakeTranscriber {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            formats: &[".ogg", ".mp3", ".wav"],
            seen: Mutex::new(Vec::new()),
            queue_lengths: Mutex::new(Vec::new()),
            queue: None,
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(Behavior::Text(text.to_string()))
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn load_model(&self) -> voxbot_transcribe::Result<()> {
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        true
    }

    async fn transcribe(&self, audio_path: &Path) -> voxbot_transcribe::Result<String> {
        self.seen
            .lock()
            .push((audio_path.to_path_buf(), audio_path.exists()));
        if let Some(queue) = &self.queue {
            self.queue_lengths.lock().push(queue.count());
        }
        match &self.behavior {
            Behavior::Text(text) => Ok(text.clone()),
            Behavior::Fail => Err(TranscribeError::TranscriptionFailed(
                "CUDA out of memory at 0xdeadbeef".to_string(),
            )),
            Behavior::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn supported_formats(&self) -> &[&'static str] {
        self.formats
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "Fake".to_string(),
            model: "echo".to_string(),
            device: None,
            language: Some("en".to_string()),
            is_loaded: true,
            supported_formats: self.formats.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct Online;

#[async_trait]
impl ConnectivityProbe for Online {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Executor that never retries, so tests see each failure once.
pub fn single_shot_executor() -> ResilientExecutor {
    ResilientExecutor::new(RetryPolicy::new(1, Duration::ZERO), Arc::new(Online))
}

/// Executor that retries retryable errors after 1 s, 2 s, 4 s, ...
pub fn retrying_executor(attempts: u32) -> ResilientExecutor {
    ResilientExecutor::new(
        RetryPolicy::new(attempts, Duration::from_secs(1)),
        Arc::new(Online),
    )
}

/// Shell script standing in for ffmpeg: creates its last argument.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, "#!/bin/sh\nfor last; do :; done\necho converted > \"$last\"\n")
        .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
