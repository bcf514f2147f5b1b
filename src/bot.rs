//! Wiring of intake, queue and worker around the chat service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{Instant, interval, sleep};
use tracing::{error, info, warn};
use voxbot_chat::Messenger;
use voxbot_core::{Config, JobQueue, ResilientExecutor, Retryable};
use voxbot_transcribe::Transcriber;

use crate::convert::Converter;
use crate::intake::{Folders, Intake, IntakeSettings};
use crate::worker::{TranscriptionWorker, WorkerSettings, WorkerState, WorkerStatus};

/// Long-poll timeout requested from the chat service.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause before polling is restarted after a failure.
pub const RESTART_DELAY: Duration = Duration::from_secs(10);

pub struct Bot {
    messenger: Arc<dyn Messenger>,
    executor: ResilientExecutor,
    folders: Folders,
    intake: Arc<Intake>,
    worker: TranscriptionWorker,
    monitor: StatusMonitor,
    status_interval: Option<Duration>,
}

impl Bot {
    pub fn new(
        config: &Config,
        messenger: Arc<dyn Messenger>,
        transcriber: Arc<dyn Transcriber>,
        executor: ResilientExecutor,
    ) -> Result<Self> {
        let queue = Arc::new(JobQueue::new());
        let settings = IntakeSettings::from_config(config)?;
        let folders = settings.folders.clone();
        let worker = TranscriptionWorker::new(
            queue.clone(),
            messenger.clone(),
            transcriber.clone(),
            executor.clone(),
            WorkerSettings::from_config(config),
        );
        let monitor = StatusMonitor::new(queue.clone(), worker.status(), executor.clone());
        let intake = Arc::new(Intake::new(
            queue,
            messenger.clone(),
            transcriber,
            executor.clone(),
            Converter::new(&config.ffmpeg),
            settings,
            worker.status(),
        ));
        Ok(Self {
            messenger,
            executor,
            folders,
            intake,
            worker,
            monitor,
            status_interval: config.status_interval(),
        })
    }

    /// Runs until the process is stopped.
    pub async fn run(self) -> Result<()> {
        self.folders.create()?;
        tokio::spawn(supervise_worker(self.worker));
        if let Some(period) = self.status_interval {
            tokio::spawn(self.monitor.run(period));
        }
        poll(self.messenger, self.intake, self.executor).await;
        Ok(())
    }
}

/// Keeps the worker alive, restarting it if it panics.
async fn supervise_worker(worker: TranscriptionWorker) {
    loop {
        match tokio::spawn(worker.clone().run()).await {
            Ok(()) => return,
            Err(e) => {
                error!(error = %e, "Transcription worker crashed, restarting");
                sleep(RESTART_DELAY).await;
            }
        }
    }
}

/// Point-in-time view of the bot for the periodic status log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub queue_size: usize,
    pub worker: WorkerState,
    pub online: bool,
    pub uptime: Duration,
}

/// Periodically logs queue, worker and connectivity state.
#[derive(Clone)]
pub struct StatusMonitor {
    queue: Arc<JobQueue>,
    worker: WorkerStatus,
    executor: ResilientExecutor,
    started: Instant,
}

impl StatusMonitor {
    pub fn new(queue: Arc<JobQueue>, worker: WorkerStatus, executor: ResilientExecutor) -> Self {
        Self {
            queue,
            worker,
            executor,
            started: Instant::now(),
        }
    }

    pub async fn report(&self) -> StatusReport {
        StatusReport {
            queue_size: self.queue.count(),
            worker: self.worker.get(),
            online: self.executor.is_online().await,
            uptime: self.started.elapsed(),
        }
    }

    /// Logs a report now and then once every `period`, forever.
    pub async fn run(self, period: Duration) {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let report = self.report().await;
            info!(
                queue_size = report.queue_size,
                queue_empty = report.queue_size == 0,
                worker = %report.worker,
                online = report.online,
                uptime = ?report.uptime,
                "Bot status"
            );
        }
    }
}

/// Fetches inbound events forever, handling each in its own task.
///
/// On failure, polling waits for connectivity and restarts after
/// [`RESTART_DELAY`].
pub async fn poll(messenger: Arc<dyn Messenger>, intake: Arc<Intake>, executor: ResilientExecutor) {
    info!("Polling for messages");
    loop {
        match messenger.poll_events(POLL_TIMEOUT).await {
            Ok(events) => {
                for event in events {
                    let intake = intake.clone();
                    tokio::spawn(async move { intake.handle(event).await });
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(error = %e, "Polling failed");
                } else {
                    error!(error = %e, "Polling failed");
                }
                executor.wait_for_connection().await;
                info!(delay = ?RESTART_DELAY, "Restarting polling");
                sleep(RESTART_DELAY).await;
            }
        }
    }
}
