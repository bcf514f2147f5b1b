//! Transcription jobs and the FIFO queue shared between intake and worker.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::debug;

/// Identifier of a destination conversation.
pub type ChatId = i64;

/// Identifier of a message inside a conversation.
pub type MessageId = i64;

/// One queued transcription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Conversation the results go to
    pub chat_id: ChatId,
    /// Status message edited in place while the job advances
    pub status_message_id: MessageId,
    /// Audio file awaiting transcription, owned by the worker once queued
    pub artifact_path: PathBuf,
}

impl Job {
    pub fn new(chat_id: ChatId, status_message_id: MessageId, artifact_path: PathBuf) -> Self {
        Self {
            chat_id,
            status_message_id,
            artifact_path,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chat: {}, Message: {}, Path: {}",
            self.chat_id,
            self.status_message_id,
            self.artifact_path.display()
        )
    }
}

/// Thread-safe FIFO of [`Job`]s.
///
/// Any number of producers may [`enqueue`](Self::enqueue); a single consumer
/// reads the head with [`peek_head`](Self::peek_head) and removes it with
/// [`dequeue_head`](Self::dequeue_head) only once the job is finished, so the
/// length always reflects work remaining. Every operation takes the same lock
/// for the duration of a list mutation or a snapshot copy.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a job to the tail.
    pub fn enqueue(&self, job: Job) {
        debug!(chat_id = job.chat_id, path = ?job.artifact_path, "Adding job to queue");
        self.jobs.lock().push_back(job);
    }

    /// Removes and returns the head job.
    pub fn dequeue_head(&self) -> Option<Job> {
        let job = self.jobs.lock().pop_front();
        if let Some(job) = &job {
            debug!(chat_id = job.chat_id, "Removed job from queue head");
        }
        job
    }

    /// Removes the head job only if it equals `job`. Returns whether it did.
    pub fn dequeue_head_if(&self, job: &Job) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.front() != Some(job) {
            return false;
        }
        jobs.pop_front();
        drop(jobs);
        debug!(chat_id = job.chat_id, "Removed job from queue head");
        true
    }

    /// Returns a copy of the head job without removing it.
    pub fn peek_head(&self) -> Option<Job> {
        self.jobs.lock().front().cloned()
    }

    pub fn count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Human readable listing of every queued job.
    pub fn render_snapshot(&self) -> String {
        let snapshot: Vec<Job> = self.jobs.lock().iter().cloned().collect();
        if snapshot.is_empty() {
            return "No jobs in queue".to_string();
        }
        snapshot
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
