// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::api::{ApiClient, ApiError, JobState, JobStatus, ProgressFn, UploadFile, UploadReceipt};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Backend side of a file ingestion: the upload itself and the status of the
/// server-side row processing that follows it.
#[async_trait]
pub trait IngestBackend: Send + Sync {
    async fn upload(&self, file: UploadFile, progress: ProgressFn)
        -> Result<UploadReceipt, ApiError>;
    async fn job_status(&self) -> Result<JobStatus, ApiError>;
}

#[derive(Debug, Clone)]
pub struct RemoteIngest {
    client: ApiClient,
    upload_path: String,
    status_path: String,
}

impl RemoteIngest {
    pub fn new(client: ApiClient, upload_path: &str, status_path: &str) -> Self {
        Self {
            client,
            upload_path: upload_path.to_string(),
            status_path: status_path.to_string(),
        }
    }
}

#[async_trait]
impl IngestBackend for RemoteIngest {
    async fn upload(
        &self,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, ApiError> {
        self.client.upload(&self.upload_path, file, progress).await
    }

    async fn job_status(&self) -> Result<JobStatus, ApiError> {
        self.client.job_status(&self.status_path).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadPhase {
    Idle,
    Transferring,
    Processing,
    Completed,
    Error(String),
}

impl UploadPhase {
    fn rank(&self) -> u8 {
        match self {
            UploadPhase::Idle => 0,
            UploadPhase::Transferring => 1,
            UploadPhase::Processing => 2,
            UploadPhase::Completed | UploadPhase::Error(_) => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    pub fn is_active(&self) -> bool {
        matches!(self, UploadPhase::Transferring | UploadPhase::Processing)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadJob {
    pub phase: UploadPhase,
    pub filename: Option<String>,
    /// 0..=100, never decreases within one job.
    pub transfer_percent: f64,
    pub total_rows: u64,
    pub processed_rows: u64,
}

impl Default for UploadJob {
    fn default() -> Self {
        Self {
            phase: UploadPhase::Idle,
            filename: None,
            transfer_percent: 0.0,
            total_rows: 0,
            processed_rows: 0,
        }
    }
}

impl UploadJob {
    pub fn processing_percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        (self.processed_rows as f64 / self.total_rows as f64 * 100.0).min(100.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Upload failed: {0}")]
    Upload(String),
    #[error("Upload rejected: {0}")]
    Rejected(String),
    #[error("Ingestion failed: {0}")]
    Terminal(String),
}

impl JobError {
    /// The message shown to the user, without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            JobError::Upload(m) | JobError::Rejected(m) | JobError::Terminal(m) => m,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { total_rows: u64, processed_rows: u64 },
    Failed(JobError),
}

pub type CompletionFn = Arc<dyn Fn(JobOutcome) + Send + Sync>;

/// `tokio::time::interval` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

struct Inner {
    backend: Arc<dyn IngestBackend>,
    poll_interval: Duration,
    job: watch::Sender<UploadJob>,
    on_complete: Mutex<Option<CompletionFn>>,
    torn_down: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut UploadJob),
    {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        self.job.send_modify(edit);
    }

    /// Moves the job forward; attempts to go back to an earlier phase are ignored.
    fn advance(&self, phase: UploadPhase) {
        self.update(|job| {
            if phase.rank() > job.phase.rank() {
                debug!("Upload phase change — from={:?} to={:?}", job.phase, phase);
                job.phase = phase;
            }
        });
    }

    fn record_transfer(&self, sent: u64, total: u64) {
        let percent = if total == 0 {
            100.0
        } else {
            (sent as f64 / total as f64 * 100.0).min(100.0)
        };
        self.update(|job| {
            if percent > job.transfer_percent {
                job.transfer_percent = percent;
            }
        });
    }

    fn finish(&self, outcome: JobOutcome) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let phase = match &outcome {
            JobOutcome::Completed { .. } => UploadPhase::Completed,
            JobOutcome::Failed(e) => UploadPhase::Error(e.message().to_string()),
        };
        self.advance(phase);

        let callback = self
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }

    async fn run(self: Arc<Self>, file: UploadFile) {
        let filename = file.name.clone();
        let progress: ProgressFn = {
            let inner = Arc::clone(&self);
            Arc::new(move |sent, total| inner.record_transfer(sent, total))
        };

        let receipt = match self.backend.upload(file, progress).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Upload failed — file={} error={}", filename, e);
                self.finish(JobOutcome::Failed(JobError::Upload(e.to_string())));
                return;
            }
        };

        if receipt.is_rejected() {
            let message = receipt
                .error_message
                .clone()
                .unwrap_or_else(|| format!("Validation {}", receipt.validation_status));
            warn!("Upload rejected — file={} reason={}", receipt.filename, message);
            self.finish(JobOutcome::Failed(JobError::Rejected(message)));
            return;
        }

        info!(
            "Upload transferred; waiting for ingestion — file={} size_bytes={}",
            receipt.filename, receipt.size_bytes
        );
        self.update(|job| job.transfer_percent = 100.0);
        self.advance(UploadPhase::Processing);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.torn_down.load(Ordering::SeqCst) {
                return;
            }

            let status = match self.backend.job_status().await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Job status poll failed; retrying — error={}", e);
                    continue;
                }
            };

            self.update(|job| {
                job.total_rows = status.total_rows;
                job.processed_rows = job.processed_rows.max(status.processed_rows);
            });

            match status.status {
                JobState::Completed => {
                    info!(
                        "Ingestion completed — total_rows={} processed_rows={}",
                        status.total_rows, status.processed_rows
                    );
                    self.finish(JobOutcome::Completed {
                        total_rows: status.total_rows,
                        processed_rows: status.processed_rows,
                    });
                    return;
                }
                JobState::Error => {
                    let message = status
                        .message
                        .unwrap_or_else(|| "Ingestion failed".to_string());
                    error!("Ingestion reported an error — message={}", message);
                    self.finish(JobOutcome::Failed(JobError::Terminal(message)));
                    return;
                }
                JobState::Idle | JobState::Processing => {}
            }
        }
    }
}

/// Follows one file ingestion from byte transfer through server-side
/// processing. Polling stops on a terminal status or on teardown.
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

impl ProgressTracker {
    pub fn new(backend: Arc<dyn IngestBackend>, poll_interval: Duration) -> Self {
        if poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval too short; clamping — requested_ms={} min_ms={}",
                poll_interval.as_millis(),
                MIN_POLL_INTERVAL.as_millis()
            );
        }
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let (job, _rx) = watch::channel(UploadJob::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                poll_interval,
                job,
                on_complete: Mutex::new(None),
                torn_down: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Registers the callback fired once per job when it reaches a terminal
    /// phase. It stays registered for later jobs until replaced.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(JobOutcome) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Starts a job for `file`. Refused while another job is still running
    /// or after teardown. Must be called from within a tokio runtime.
    pub fn start(&self, file: UploadFile) -> bool {
        if self.inner.torn_down.load(Ordering::SeqCst) {
            return false;
        }
        if self.inner.job.borrow().phase.is_active() {
            warn!("Upload already in progress; ignoring new file — file={}", file.name);
            return false;
        }

        let name = file.name.clone();
        self.inner.job.send_replace(UploadJob {
            phase: UploadPhase::Transferring,
            filename: Some(name),
            ..UploadJob::default()
        });

        let task = tokio::spawn(Arc::clone(&self.inner).run(file));
        let previous = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        true
    }

    pub fn job(&self) -> UploadJob {
        self.inner.job.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadJob> {
        self.inner.job.subscribe()
    }

    /// Dismisses a finished job, returning the tracker to `Idle`.
    pub fn acknowledge(&self) -> bool {
        if !self.inner.job.borrow().phase.is_terminal() {
            return false;
        }
        self.inner.update(|job| *job = UploadJob::default());
        true
    }

    /// Stops polling and ignores anything still in flight.
    pub fn shutdown(&self) {
        self.inner.torn_down.store(true, Ordering::SeqCst);
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
