// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::api::{ApiClient, ApiError};
use crate::filter::{EntityId, EntityRef, FilterStore, SelectionField, SelectionList};
use crate::sequence::{Debouncer, SequenceGate, Ticket};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A remote catalog that resolves free text to entities.
#[async_trait]
pub trait LookupSource: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<EntityRef>, ApiError>;
}

/// Lookup endpoint of the backend, optionally scoped to a parent entity
/// (e.g. airports of one region).
#[derive(Debug, Clone)]
pub struct RemoteCatalog {
    client: ApiClient,
    path: String,
    parent: Option<EntityId>,
    page_size: usize,
}

impl RemoteCatalog {
    pub fn new(client: ApiClient, path: impl Into<String>, page_size: usize) -> Self {
        Self {
            client,
            path: path.into(),
            parent: None,
            page_size,
        }
    }

    pub fn scoped_to(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[async_trait]
impl LookupSource for RemoteCatalog {
    async fn search(&self, query: &str) -> Result<Vec<EntityRef>, ApiError> {
        self.client
            .search(&self.path, self.parent.as_ref(), query, self.page_size)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupSettings {
    pub debounce: Duration,
    pub min_chars: usize,
    pub page_size: usize,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            min_chars: 2,
            page_size: 20,
        }
    }
}

/// State of the options panel under a multi-select control.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupView {
    pub query: String,
    pub options: Vec<EntityRef>,
    pub open: bool,
    pub loading: bool,
    pub error: Option<String>,
}

struct Inner {
    name: String,
    source: Arc<dyn LookupSource>,
    settings: LookupSettings,
    gate: SequenceGate,
    debouncer: Debouncer,
    view: watch::Sender<LookupView>,
    closed: AtomicBool,
    issued: AtomicU64,
}

impl Inner {
    async fn run(self: Arc<Self>, ticket: Ticket, query: String) {
        if !self.gate.is_current(ticket) || self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.view.send_modify(|v| v.loading = true);
        debug!(
            "Searching lookup — field={} ticket={} query={}",
            self.name,
            ticket.value(),
            query
        );

        let outcome = self.source.search(&query).await;

        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if !self.gate.is_current(ticket) {
            debug!(
                "Discarding stale lookup response — field={} ticket={} latest={}",
                self.name,
                ticket.value(),
                self.gate.latest().value()
            );
            return;
        }

        let page_size = self.settings.page_size;
        self.view.send_modify(|v| {
            v.loading = false;
            match outcome {
                Ok(mut options) => {
                    options.truncate(page_size);
                    v.options = options;
                    v.error = None;
                }
                Err(e) => {
                    warn!("Lookup search failed — field={} error={}", self.name, e);
                    v.options.clear();
                    v.error = Some(e.to_string());
                }
            }
        });
    }
}

/// Debounced search-as-you-type resolver backing one multi-select field.
///
/// Only the response to the most recently issued search may update the
/// options; earlier responses are dropped whatever order they arrive in.
pub struct LookupResolver {
    inner: Arc<Inner>,
}

impl LookupResolver {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn LookupSource>,
        settings: LookupSettings,
    ) -> Self {
        let (view, _rx) = watch::channel(LookupView::default());
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                source,
                settings,
                gate: SequenceGate::new(),
                debouncer: Debouncer::new(settings.debounce),
                view,
                closed: AtomicBool::new(false),
                issued: AtomicU64::new(0),
            }),
        }
    }

    /// Handles a keystroke. Queries shorter than the minimum clear the
    /// options and cancel any pending search without touching the network.
    pub fn input(&self, text: &str) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let query = text.trim().to_string();

        if query.chars().count() < self.inner.settings.min_chars {
            self.inner.gate.invalidate();
            self.inner.debouncer.cancel();
            self.inner.view.send_modify(|v| {
                v.query = text.to_string();
                v.options.clear();
                v.loading = false;
                v.error = None;
                v.open = true;
            });
            return;
        }

        self.inner.view.send_modify(|v| {
            v.query = text.to_string();
            v.open = true;
        });

        let ticket = self.inner.gate.issue();
        let inner = Arc::clone(&self.inner);
        self.inner.debouncer.trigger(async move {
            inner.run(ticket, query).await;
        });
    }

    /// Closes the options panel. Selections already made are unaffected.
    pub fn blur(&self) {
        self.inner.view.send_modify(|v| v.open = false);
    }

    /// Adds `option` to `target` unless an entry with the same id exists.
    pub fn select(&self, target: &mut SelectionList, option: EntityRef) -> bool {
        let added = target.add(option);
        if !added {
            debug!("Option already selected — field={}", self.inner.name);
        }
        added
    }

    /// Adds the visible option with `id` to `target`.
    pub fn select_by_id(&self, target: &mut SelectionList, id: &EntityId) -> bool {
        let option = self
            .inner
            .view
            .borrow()
            .options
            .iter()
            .find(|o| &o.id == id)
            .cloned();
        match option {
            Some(option) => self.select(target, option),
            None => false,
        }
    }

    pub fn remove(&self, target: &mut SelectionList, id: &EntityId) -> bool {
        target.remove(id)
    }

    /// Selects `option` into a list of the store's criteria, publishing a
    /// new snapshot only if the selection changed.
    pub fn select_into(
        &self,
        store: &FilterStore,
        field: &SelectionField,
        option: EntityRef,
    ) -> bool {
        store.update(|criteria| {
            criteria.list_mut(field).add(option);
        })
    }

    pub fn remove_from(&self, store: &FilterStore, field: &SelectionField, id: &EntityId) -> bool {
        store.update(|criteria| {
            criteria.list_mut(field).remove(id);
        })
    }

    pub fn view(&self) -> LookupView {
        self.inner.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LookupView> {
        self.inner.view.subscribe()
    }

    /// Number of searches that reached the catalog.
    pub fn searches_issued(&self) -> u64 {
        self.inner.issued.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.gate.invalidate();
        self.inner.debouncer.cancel();
    }
}

impl Drop for LookupResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
