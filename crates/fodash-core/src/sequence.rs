// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

//! Ordering primitives shared by every widget that talks to the backend.
//!
//! A [`SequenceGate`] hands out monotonically increasing [`Ticket`]s; only the
//! holder of the most recently issued ticket may publish a result. A
//! [`Debouncer`] delays work until its input has been quiet for a window.
//! Together they give "last issued request wins" without relying on the
//! network layer being able to abort anything.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct SequenceGate {
    latest: AtomicU64,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new ticket, superseding every ticket issued before it.
    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn latest(&self) -> Ticket {
        Ticket(self.latest.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// Supersedes all outstanding tickets without issuing a usable one.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}

/// Reset-on-new-input timer.
///
/// Each [`trigger`](Debouncer::trigger) aborts the pending timer (if it has
/// not fired yet) and arms a new one. When a timer fires, its action is
/// spawned as a separate task, so a later trigger never aborts work that
/// already started; such work is expected to check its [`Ticket`] instead.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Must be called from within a tokio runtime.
    pub fn trigger<Fut>(&self, action: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            tokio::spawn(action);
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Drops the pending timer, if any, without running its action.
    pub fn cancel(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = pending {
            timer.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_latest_ticket_wins() {
        let gate = SequenceGate::new();
        let first = gate.issue();
        let second = gate.issue();

        assert!(first < second);
        assert!(!gate.is_current(first));
        assert!(gate.is_current(second));

        gate.invalidate();
        assert!(!gate.is_current(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_only_last_action() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicU64::new(0));

        for i in 1..=5u64 {
            let runs = runs.clone();
            let last = last.clone();
            debouncer.trigger(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_action() {
        let debouncer = Debouncer::new(Duration::from_millis(300));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        debouncer.trigger(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
