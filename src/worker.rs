//! The single consumer of the job queue.
//!
//! The worker handles one job at a time. A job stays at the head of the queue
//! while it is transcribed and delivered, and is removed together with its
//! audio file when the worker is done with it, whatever the outcome.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use voxbot_chat::Messenger;
use voxbot_core::{Config, Job, JobQueue, ResilientExecutor, split_text};
use voxbot_transcribe::{TranscribeError, Transcriber};

use crate::text;

/// Where the worker is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Claimed,
    Transcribing,
    Delivering,
    Cleanup,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Claimed => "claimed",
            Self::Transcribing => "transcribing",
            Self::Delivering => "delivering",
            Self::Cleanup => "cleaning up",
        };
        f.write_str(name)
    }
}

/// Shared view of the worker's state.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus(Arc<Mutex<WorkerState>>);

impl WorkerStatus {
    pub fn get(&self) -> WorkerState {
        *self.0.lock()
    }

    fn set(&self, state: WorkerState) {
        *self.0.lock() = state;
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_message_length: usize,
    pub chunk_delay: Duration,
    pub idle_poll: Duration,
    pub asr_timeout: Option<Duration>,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_message_length: config.max_message_length,
            chunk_delay: config.chunk_delay(),
            idle_poll: config.idle_poll(),
            asr_timeout: config.asr_timeout(),
        }
    }
}

enum Recognition {
    Text(String),
    Empty,
    Failed(TranscribeError),
    TimedOut(Duration),
}

/// Removes an audio file. Missing files are not an error.
pub fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = ?path, "Removed audio file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "Failed to remove audio file"),
    }
}

/// Owns the head job until dropped, then deletes its file and dequeues it.
///
/// Cleanup runs on every exit path, including cancellation of the job future.
struct Claim<'a> {
    queue: &'a JobQueue,
    job: &'a Job,
    status: &'a WorkerStatus,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.status.set(WorkerState::Cleanup);
        remove_artifact(&self.job.artifact_path);
        if !self.queue.dequeue_head_if(self.job) {
            warn!(
                expected = %self.job,
                found = ?self.queue.peek_head(),
                "Claimed job is not at the queue head, queue left unchanged"
            );
        }
        self.status.set(WorkerState::Idle);
    }
}

#[derive(Clone)]
pub struct TranscriptionWorker {
    queue: Arc<JobQueue>,
    messenger: Arc<dyn Messenger>,
    transcriber: Arc<dyn Transcriber>,
    executor: ResilientExecutor,
    settings: WorkerSettings,
    status: WorkerStatus,
}

impl TranscriptionWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        messenger: Arc<dyn Messenger>,
        transcriber: Arc<dyn Transcriber>,
        executor: ResilientExecutor,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            messenger,
            transcriber,
            executor,
            settings,
            status: WorkerStatus::default(),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Processes jobs forever, sleeping while the queue is empty.
    pub async fn run(self) {
        info!(
            backend = self.transcriber.name(),
            "Transcription worker started"
        );
        loop {
            match self.queue.peek_head() {
                Some(job) => self.process(job).await,
                None => sleep(self.settings.idle_poll).await,
            }
        }
    }

    /// Transcribes and delivers one job, which must be the queue head.
    pub async fn process(&self, job: Job) {
        let _claim = Claim {
            queue: &self.queue,
            job: &job,
            status: &self.status,
        };
        self.status.set(WorkerState::Claimed);
        info!(job = %job, "Processing job");

        self.notify(&job, text::TRANSCRIBING).await;

        self.status.set(WorkerState::Transcribing);
        let start = Instant::now();
        let recognition = self.recognize(&job.artifact_path).await;
        let elapsed = start.elapsed();

        match recognition {
            Recognition::Text(transcript) => {
                self.status.set(WorkerState::Delivering);
                info!(
                    chat_id = job.chat_id,
                    chars = transcript.chars().count(),
                    elapsed = ?elapsed,
                    "Transcription complete"
                );
                self.deliver(&job, &transcript, elapsed).await;
            }
            Recognition::Empty => {
                info!(chat_id = job.chat_id, "No speech recognized");
                self.notify(&job, text::NOTHING_RECOGNIZED).await;
            }
            Recognition::Failed(e) => {
                error!(job = %job, error = %e, "Transcription failed");
                self.notify(&job, text::TRANSCRIPTION_FAILED).await;
            }
            Recognition::TimedOut(limit) => {
                error!(job = %job, limit = ?limit, "Transcription timed out");
                self.notify(&job, text::TRANSCRIPTION_FAILED).await;
            }
        }
    }

    async fn recognize(&self, path: &Path) -> Recognition {
        let call = self.transcriber.transcribe(path);
        let result = match self.settings.asr_timeout {
            Some(limit) => match timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => return Recognition::TimedOut(limit),
            },
            None => call.await,
        };
        match result {
            Ok(transcript) if transcript.trim().is_empty() => Recognition::Empty,
            Ok(transcript) => Recognition::Text(transcript),
            Err(e) => Recognition::Failed(e),
        }
    }

    /// Best-effort status update. Failures are logged and otherwise ignored.
    async fn notify(&self, job: &Job, message: &str) {
        let result = self
            .executor
            .execute(|| {
                self.messenger
                    .edit(job.chat_id, job.status_message_id, message)
            })
            .await;
        if let Err(e) = result {
            warn!(job = %job, error = %e, "Failed to update status message");
        }
    }

    /// Replaces the status message with the first chunk and replies with the rest.
    async fn deliver(&self, job: &Job, transcript: &str, elapsed: Duration) {
        let chunks = split_text(transcript, self.settings.max_message_length);
        let Some((first, rest)) = chunks.split_first() else {
            return;
        };

        let first = text::first_chunk(first, elapsed);
        let result = self
            .executor
            .execute(|| {
                self.messenger
                    .edit(job.chat_id, job.status_message_id, &first)
            })
            .await;
        if let Err(e) = result {
            error!(job = %job, error = %e, "Failed to deliver transcript");
            return;
        }

        let mut previous = job.status_message_id;
        for (index, chunk) in rest.iter().enumerate() {
            sleep(self.settings.chunk_delay).await;
            let message = text::continuation_chunk(chunk);
            let result = self
                .executor
                .execute(|| self.messenger.send(job.chat_id, &message, Some(previous)))
                .await;
            match result {
                Ok(id) => previous = id,
                Err(e) => {
                    error!(
                        job = %job,
                        chunk = index + 1,
                        total = chunks.len(),
                        error = %e,
                        "Failed to deliver transcript continuation"
                    );
                    return;
                }
            }
        }
        debug!(job = %job, chunks = chunks.len(), "Transcript delivered");
    }
}
