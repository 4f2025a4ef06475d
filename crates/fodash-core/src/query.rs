// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::api::ApiError;
use crate::filter::ValidationError;
use crate::heatmap::HeatmapChart;
use crate::sequence::{Debouncer, SequenceGate, Ticket};
use futures::future::BoxFuture;
use log::{debug, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartStatus {
    Loading,
    Empty,
    Data,
    Error,
}

/// What a widget should currently render.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartResult<T> {
    Loading,
    /// The backend answered with no rows. Rendered as an explicit "no data" state.
    Empty,
    Data(T),
    Error(String),
}

impl<T> ChartResult<T> {
    pub fn status(&self) -> ChartStatus {
        match self {
            ChartResult::Loading => ChartStatus::Loading,
            ChartResult::Empty => ChartStatus::Empty,
            ChartResult::Data(_) => ChartStatus::Data,
            ChartResult::Error(_) => ChartStatus::Error,
        }
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            ChartResult::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ChartResult::Error(message) => Some(message),
            _ => None,
        }
    }
}

/// Results that can be "present but empty".
pub trait ChartPayload {
    fn is_empty(&self) -> bool;
}

impl<T> ChartPayload for Vec<T> {
    fn is_empty(&self) -> bool {
        Vec::is_empty(self)
    }
}

impl ChartPayload for HeatmapChart {
    fn is_empty(&self) -> bool {
        HeatmapChart::is_empty(self)
    }
}

pub type FetchFn<P, T> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

struct Shared<P, T> {
    name: String,
    gate: SequenceGate,
    debouncer: Debouncer,
    fetch: FetchFn<P, T>,
    result: watch::Sender<ChartResult<T>>,
    last_submitted: Mutex<Option<P>>,
    closed: AtomicBool,
    issued: AtomicU64,
}

impl<P, T> Shared<P, T>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: ChartPayload + Send + Sync + 'static,
{
    fn submit(self: &Arc<Self>, payload: P, force: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut last = self
                .last_submitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !force && last.as_ref() == Some(&payload) {
                debug!("Payload unchanged; skipping request — widget={}", self.name);
                return;
            }
            *last = Some(payload.clone());
        }

        let ticket = self.gate.issue();
        let shared = Arc::clone(self);
        self.debouncer.trigger(async move {
            shared.run(ticket, payload).await;
        });
    }

    async fn run(self: Arc<Self>, ticket: Ticket, payload: P) {
        if !self.gate.is_current(ticket) || self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.result.send_replace(ChartResult::Loading);
        debug!(
            "Issuing request — widget={} ticket={}",
            self.name,
            ticket.value()
        );

        let outcome = (self.fetch)(payload).await;
        self.resolve(ticket, outcome);
    }

    fn resolve(&self, ticket: Ticket, outcome: Result<T, ApiError>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if !self.gate.is_current(ticket) {
            debug!(
                "Discarding stale response — widget={} ticket={} latest={}",
                self.name,
                ticket.value(),
                self.gate.latest().value()
            );
            return;
        }

        let next = match outcome {
            Ok(data) if data.is_empty() => ChartResult::Empty,
            Ok(data) => ChartResult::Data(data),
            Err(e) => {
                warn!("Widget request failed — widget={} error={}", self.name, e);
                ChartResult::Error(e.to_string())
            }
        };
        self.result.send_replace(next);
    }

    fn block(&self, reason: &ValidationError) {
        self.gate.invalidate();
        self.debouncer.cancel();
        *self
            .last_submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        debug!(
            "Blocked request on invalid filters — widget={} reason={}",
            self.name, reason
        );
        self.result.send_replace(ChartResult::Error(reason.to_string()));
    }

    fn idle(&self) {
        self.gate.invalidate();
        self.debouncer.cancel();
        *self
            .last_submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.result.send_replace(ChartResult::Empty);
    }
}

/// How a followed filter value maps to a request for one widget.
pub enum Derived<P> {
    /// Fetch with this payload.
    Fetch(P),
    /// Nothing to fetch yet; show the empty call-to-action.
    Idle,
    /// The filters are invalid; show the error without contacting the backend.
    Invalid(ValidationError),
}

/// Debounced, stale-safe fetch loop for a single visualization.
///
/// Every widget owns its own executor; executors never share timers,
/// tickets or in-flight requests. Must be driven from within a tokio runtime.
pub struct QueryExecutor<P, T> {
    shared: Arc<Shared<P, T>>,
    follower: Mutex<Option<JoinHandle<()>>>,
}

impl<P, T> QueryExecutor<P, T>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: ChartPayload + Send + Sync + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, debounce: Duration, fetch: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let fetch: FetchFn<P, T> =
            Arc::new(move |payload: P| -> BoxFuture<'static, Result<T, ApiError>> {
                Box::pin(fetch(payload))
            });
        let (result, _rx) = watch::channel(ChartResult::Loading);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                gate: SequenceGate::new(),
                debouncer: Debouncer::new(debounce),
                fetch,
                result,
                last_submitted: Mutex::new(None),
                closed: AtomicBool::new(false),
                issued: AtomicU64::new(0),
            }),
            follower: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Schedules a request for `payload`, superseding any pending or in-flight one.
    /// Re-submitting the payload that was last submitted is a no-op.
    pub fn submit(&self, payload: P) {
        self.shared.submit(payload, false);
    }

    /// Re-issues the last submitted payload even though it did not change.
    pub fn refresh(&self) {
        let last = self
            .shared
            .last_submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(payload) = last {
            self.shared.submit(payload, true);
        }
    }

    /// Subscribes to a source of filter values. Each change is mapped through
    /// `derive` and submitted; the current value is submitted immediately.
    /// Replaces any previous subscription.
    pub fn follow<S, D>(&self, mut source: watch::Receiver<S>, derive: D)
    where
        S: Send + Sync + 'static,
        D: Fn(&S) -> Derived<P> + Send + Sync + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            loop {
                let derived = derive(&source.borrow_and_update());
                match derived {
                    Derived::Fetch(payload) => shared.submit(payload, false),
                    Derived::Idle => shared.idle(),
                    Derived::Invalid(reason) => shared.block(&reason),
                }
                if source.changed().await.is_err() {
                    break;
                }
            }
        });

        let previous = self
            .follower
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChartResult<T>> {
        self.shared.result.subscribe()
    }

    pub fn current(&self) -> ChartResult<T>
    where
        T: Clone,
    {
        self.shared.result.borrow().clone()
    }

    /// Number of requests that actually reached the fetcher.
    pub fn requests_issued(&self) -> u64 {
        self.shared.issued.load(Ordering::SeqCst)
    }
}

impl<P, T> QueryExecutor<P, T> {
    /// Stops timers and ignores every response that arrives afterwards.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.gate.invalidate();
        self.shared.debouncer.cancel();
        let follower = self
            .follower
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = follower {
            task.abort();
        }
    }
}

impl<P, T> Drop for QueryExecutor<P, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_executor(calls: Arc<AtomicUsize>) -> QueryExecutor<u32, Vec<u32>> {
        QueryExecutor::new("test", Duration::from_millis(500), move |n: u32| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok((0..n).collect::<Vec<u32>>())
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_result_is_distinct_from_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = counting_executor(calls.clone());

        exec.submit(0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(exec.current(), ChartResult::Empty);

        exec.submit(3);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(exec.current(), ChartResult::Data(vec![0, 1, 2]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_payload_is_deduplicated_until_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = counting_executor(calls.clone());

        exec.submit(2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        exec.submit(2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        exec.refresh();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_becomes_error_state() {
        let exec: QueryExecutor<u32, Vec<u32>> =
            QueryExecutor::new("failing", Duration::from_millis(500), |_n: u32| async {
                Err(ApiError::Status {
                    status: 502,
                    url: "http://backend/stats".to_string(),
                })
            });

        exec.submit(1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        let result = exec.current();
        assert_eq!(result.status(), ChartStatus::Error);
        assert!(result.message().unwrap().contains("502"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = counting_executor(calls.clone());

        exec.submit(4);
        exec.shutdown();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(exec.requests_issued(), 0);
    }
}
