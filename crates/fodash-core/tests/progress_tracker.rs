use async_trait::async_trait;
use fodash_core::api::{ApiError, JobState, JobStatus, ProgressFn, UploadFile, UploadReceipt};
use fodash_core::progress::{IngestBackend, JobError, JobOutcome, ProgressTracker, UploadJob, UploadPhase};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

const POLL: Duration = Duration::from_millis(100);

/// Ingest backend driven by a script of status replies.
struct ScriptedIngest {
    receipt: Mutex<Option<Result<UploadReceipt, ApiError>>>,
    transfer_steps: Vec<(u64, u64)>,
    statuses: Mutex<VecDeque<Result<JobStatus, ApiError>>>,
    polls: AtomicUsize,
    observer: Mutex<Option<watch::Receiver<UploadJob>>>,
    seen_percents: Mutex<Vec<f64>>,
}

impl ScriptedIngest {
    fn new(statuses: Vec<Result<JobStatus, ApiError>>) -> Self {
        Self {
            receipt: Mutex::new(Some(Ok(accepted()))),
            transfer_steps: vec![(50, 100), (100, 100)],
            statuses: Mutex::new(statuses.into()),
            polls: AtomicUsize::new(0),
            observer: Mutex::new(None),
            seen_percents: Mutex::new(Vec::new()),
        }
    }

    fn with_receipt(self, receipt: Result<UploadReceipt, ApiError>) -> Self {
        *self.receipt.lock().unwrap() = Some(receipt);
        self
    }

    fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IngestBackend for ScriptedIngest {
    async fn upload(
        &self,
        _file: UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, ApiError> {
        for (sent, total) in &self.transfer_steps {
            progress(*sent, *total);
            let observed = self
                .observer
                .lock()
                .unwrap()
                .as_ref()
                .map(|rx| rx.borrow().transfer_percent);
            if let Some(percent) = observed {
                self.seen_percents.lock().unwrap().push(percent);
            }
        }
        self.receipt
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(accepted()))
    }

    async fn job_status(&self) -> Result<JobStatus, ApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(status(JobState::Processing, 100, 10)))
    }
}

fn accepted() -> UploadReceipt {
    UploadReceipt {
        filename: "movements.csv".to_string(),
        size_bytes: 2048,
        validation_status: "success".to_string(),
        error_message: None,
    }
}

fn status(state: JobState, total: u64, processed: u64) -> JobStatus {
    JobStatus {
        status: state,
        total_rows: total,
        processed_rows: processed,
        percentage: 0.0,
        message: None,
    }
}

fn file() -> UploadFile {
    UploadFile {
        name: "movements.csv".to_string(),
        bytes: b"origin,destination\nSKBO,SKRG\n".to_vec(),
    }
}

fn tracker_with(backend: Arc<ScriptedIngest>) -> (ProgressTracker, Arc<Mutex<Vec<JobOutcome>>>) {
    let tracker = ProgressTracker::new(backend, POLL);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    tracker.on_complete(move |outcome| sink.lock().unwrap().push(outcome));
    (tracker, outcomes)
}

#[tokio::test(start_paused = true)]
async fn test_polls_until_completed_then_stops() {
    let backend = Arc::new(ScriptedIngest::new(vec![
        Ok(status(JobState::Processing, 100, 0)),
        Ok(status(JobState::Processing, 100, 50)),
        Ok(status(JobState::Completed, 100, 100)),
    ]));
    let (tracker, outcomes) = tracker_with(backend.clone());

    assert!(tracker.start(file()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.polls(), 3);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.polls(), 3);

    let job = tracker.job();
    assert_eq!(job.phase, UploadPhase::Completed);
    assert_eq!(job.processed_rows, 100);
    assert_eq!(job.transfer_percent, 100.0);
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![JobOutcome::Completed {
            total_rows: 100,
            processed_rows: 100
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failure_keeps_polling() {
    let backend = Arc::new(ScriptedIngest::new(vec![
        Err(ApiError::Status {
            status: 502,
            url: "http://backend/uploads/status".to_string(),
        }),
        Ok(status(JobState::Processing, 10, 5)),
        Ok(status(JobState::Completed, 10, 10)),
    ]));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.polls(), 3);
    assert_eq!(tracker.job().phase, UploadPhase::Completed);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_error_status_ends_job_with_message() {
    let mut failed = status(JobState::Error, 40, 12);
    failed.message = Some("Row 13: unknown aircraft type".to_string());
    let backend = Arc::new(ScriptedIngest::new(vec![
        Ok(status(JobState::Processing, 40, 12)),
        Ok(failed),
    ]));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(backend.polls(), 2);
    assert_eq!(
        tracker.job().phase,
        UploadPhase::Error("Row 13: unknown aircraft type".to_string())
    );
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![JobOutcome::Failed(JobError::Terminal(
            "Row 13: unknown aircraft type".to_string()
        ))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_upload_never_polls() {
    let rejected = UploadReceipt {
        validation_status: "error".to_string(),
        error_message: Some("Missing column: origin".to_string()),
        ..accepted()
    };
    let backend = Arc::new(ScriptedIngest::new(Vec::new()).with_receipt(Ok(rejected)));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.polls(), 0);
    assert_eq!(
        tracker.job().phase,
        UploadPhase::Error("Missing column: origin".to_string())
    );
    assert!(matches!(
        outcomes.lock().unwrap().as_slice(),
        [JobOutcome::Failed(JobError::Rejected(_))]
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_transfer_reports_upload_error() {
    let backend = Arc::new(ScriptedIngest::new(Vec::new()).with_receipt(Err(ApiError::Status {
        status: 413,
        url: "http://backend/uploads".to_string(),
    })));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.polls(), 0);
    assert!(tracker.job().phase.is_terminal());
    match outcomes.lock().unwrap().as_slice() {
        [JobOutcome::Failed(JobError::Upload(message))] => assert!(message.contains("413")),
        other => panic!("unexpected outcomes: {:?}", other),
    };
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_polling_and_updates() {
    let backend = Arc::new(ScriptedIngest::new(Vec::new()));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_millis(350)).await;
    let polls = backend.polls();
    assert!(polls >= 3);
    let before = tracker.job();
    assert_eq!(before.phase, UploadPhase::Processing);

    tracker.shutdown();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(backend.polls(), polls);
    assert_eq!(tracker.job(), before);
    assert!(outcomes.lock().unwrap().is_empty());
    assert!(!tracker.start(file()));
}

#[tokio::test(start_paused = true)]
async fn test_transfer_percent_never_decreases() {
    let mut script = ScriptedIngest::new(vec![Ok(status(JobState::Completed, 1, 1))]);
    script.transfer_steps = vec![(10, 100), (60, 100), (30, 100), (100, 100)];
    let backend = Arc::new(script);
    let (tracker, _outcomes) = tracker_with(backend.clone());
    *backend.observer.lock().unwrap() = Some(tracker.subscribe());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        *backend.seen_percents.lock().unwrap(),
        vec![10.0, 60.0, 60.0, 100.0]
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_start_refused_until_acknowledged() {
    let backend = Arc::new(ScriptedIngest::new(vec![
        Ok(status(JobState::Processing, 10, 1)),
        Ok(status(JobState::Completed, 10, 10)),
    ]));
    let (tracker, _outcomes) = tracker_with(backend.clone());

    assert!(tracker.start(file()));
    assert!(!tracker.start(file()));
    assert!(!tracker.acknowledge());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tracker.job().phase, UploadPhase::Completed);

    assert!(tracker.acknowledge());
    assert_eq!(tracker.job(), UploadJob::default());
    assert!(tracker.start(file()));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_terminal_statuses_complete_once() {
    let backend = Arc::new(ScriptedIngest::new(vec![
        Ok(status(JobState::Completed, 5, 5)),
        Ok(status(JobState::Completed, 5, 5)),
        Ok(status(JobState::Error, 5, 5)),
    ]));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(backend.polls(), 1);
    assert_eq!(tracker.job().phase, UploadPhase::Completed);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_poll_interval_still_completes() {
    let backend = Arc::new(ScriptedIngest::new(vec![Ok(status(JobState::Completed, 3, 3))]));
    let tracker = ProgressTracker::new(backend.clone(), Duration::ZERO);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    tracker.on_complete(move |outcome| sink.lock().unwrap().push(outcome));

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.polls(), 1);
    assert_eq!(tracker.job().phase, UploadPhase::Completed);
    assert_eq!(outcomes.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_callback_fires_for_each_job() {
    let backend = Arc::new(ScriptedIngest::new(vec![
        Ok(status(JobState::Completed, 4, 4)),
        Ok(status(JobState::Completed, 6, 6)),
    ]));
    let (tracker, outcomes) = tracker_with(backend.clone());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(tracker.acknowledge());

    tracker.start(file());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![
            JobOutcome::Completed {
                total_rows: 4,
                processed_rows: 4
            },
            JobOutcome::Completed {
                total_rows: 6,
                processed_rows: 6
            },
        ]
    );
}
