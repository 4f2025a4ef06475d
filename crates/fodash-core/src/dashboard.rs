// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::api::{ApiClient, ApiError, CategoryCount, SeriesPoint};
use crate::config::DashboardConfig;
use crate::export::ExportBlob;
use crate::filter::{FilterCriteria, FilterStore, ValidationError};
use crate::gate::{AppliedFilters, FilterGate, SectorCatalog};
use crate::heatmap::{HeatmapBinner, HeatmapCell, HeatmapChart};
use crate::lookup::{LookupResolver, RemoteCatalog};
use crate::payload::{DateRangePayload, StatsPayload};
use crate::progress::{ProgressTracker, RemoteIngest};
use crate::query::{Derived, QueryExecutor};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Maps the shared criteria to a stats request, blocking invalid filters client-side.
pub fn stats_request(criteria: &Arc<FilterCriteria>) -> Derived<StatsPayload> {
    match criteria.validate() {
        Ok(()) => Derived::Fetch(StatsPayload::from(criteria.as_ref())),
        Err(reason) => Derived::Invalid(reason),
    }
}

pub fn date_range_request(criteria: &Arc<FilterCriteria>) -> Derived<DateRangePayload> {
    match criteria.validate() {
        Ok(()) => Derived::Fetch(DateRangePayload::from(criteria.as_ref())),
        Err(reason) => Derived::Invalid(reason),
    }
}

pub fn predictive_request(applied: &Option<Arc<AppliedFilters>>) -> Derived<AppliedFilters> {
    match applied {
        Some(applied) => Derived::Fetch(applied.as_ref().clone()),
        None => Derived::Idle,
    }
}

pub fn category_widget(
    client: &ApiClient,
    path: &str,
    debounce: Duration,
) -> QueryExecutor<StatsPayload, Vec<CategoryCount>> {
    let client = client.clone();
    let path = path.to_string();
    QueryExecutor::new(path.clone(), debounce, move |payload: StatsPayload| {
        let client = client.clone();
        let path = path.clone();
        async move { client.post_rows::<CategoryCount, _>(&path, &payload).await }
    })
}

pub fn heatmap_widget(
    client: &ApiClient,
    path: &str,
    debounce: Duration,
) -> QueryExecutor<StatsPayload, HeatmapChart> {
    let client = client.clone();
    let path = path.to_string();
    QueryExecutor::new(path.clone(), debounce, move |payload: StatsPayload| {
        let client = client.clone();
        let path = path.clone();
        async move {
            let cells = client.post_rows::<HeatmapCell, _>(&path, &payload).await?;
            Ok(HeatmapBinner::bin(&cells))
        }
    })
}

pub fn series_widget(
    client: &ApiClient,
    path: &str,
    debounce: Duration,
) -> QueryExecutor<DateRangePayload, Vec<SeriesPoint>> {
    let client = client.clone();
    let path = path.to_string();
    QueryExecutor::new(path.clone(), debounce, move |payload: DateRangePayload| {
        let client = client.clone();
        let path = path.clone();
        async move { client.post_rows::<SeriesPoint, _>(&path, &payload).await }
    })
}

pub fn predictive_widget(
    client: &ApiClient,
    path: &str,
    debounce: Duration,
) -> QueryExecutor<AppliedFilters, Vec<SeriesPoint>> {
    let client = client.clone();
    let path = path.to_string();
    QueryExecutor::new(path.clone(), debounce, move |payload: AppliedFilters| {
        let client = client.clone();
        let path = path.clone();
        async move { client.post_rows::<SeriesPoint, _>(&path, &payload).await }
    })
}

/// The operations overview: one filter store feeding independent widgets.
///
/// Widgets stay idle until [`Dashboard::attach_widgets`] subscribes them to
/// the store, so one-shot actions (upload, export, forecast) never fetch charts.
pub struct Dashboard {
    client: ApiClient,
    config: DashboardConfig,
    filters: FilterStore,
    pub categories: QueryExecutor<StatsPayload, Vec<CategoryCount>>,
    pub heatmap: QueryExecutor<StatsPayload, HeatmapChart>,
    pub series: QueryExecutor<DateRangePayload, Vec<SeriesPoint>>,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Result<Self, ApiError> {
        let client = ApiClient::new(&config.client_config())?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: ApiClient, config: DashboardConfig) -> Self {
        let debounce = config.timings.query_debounce();
        let endpoints = &config.endpoints;
        let filters = FilterStore::default();

        let categories = category_widget(&client, &endpoints.categories, debounce);
        let heatmap = heatmap_widget(&client, &endpoints.heatmap, debounce);
        let series = series_widget(&client, &endpoints.series, debounce);

        Self {
            client,
            config,
            filters,
            categories,
            heatmap,
            series,
        }
    }

    /// Subscribes every chart widget to the filter store. Must be called inside
    /// a tokio runtime; the current filters are fetched after one debounce window.
    pub fn attach_widgets(&self) {
        self.categories.follow(self.filters.subscribe(), stats_request);
        self.heatmap.follow(self.filters.subscribe(), stats_request);
        self.series.follow(self.filters.subscribe(), date_range_request);
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn filters(&self) -> &FilterStore {
        &self.filters
    }

    /// A resolver over the airport lookup catalog.
    pub fn airport_lookup(&self) -> LookupResolver {
        let settings = self.config.timings.lookup_settings();
        let catalog = RemoteCatalog::new(
            self.client.clone(),
            self.config.endpoints.lookup.clone(),
            settings.page_size,
        );
        LookupResolver::new("airports", Arc::new(catalog), settings)
    }

    pub fn upload_tracker(&self) -> ProgressTracker {
        let backend = RemoteIngest::new(
            self.client.clone(),
            &self.config.endpoints.upload,
            &self.config.endpoints.job_status,
        );
        ProgressTracker::new(Arc::new(backend), self.config.timings.poll_interval())
    }

    pub async fn sector_gate(&self) -> Result<FilterGate, ApiError> {
        let catalog = SectorCatalog::fetch(&self.client, &self.config.endpoints.sectors).await?;
        Ok(FilterGate::new(catalog))
    }

    /// A predictive view that only ever fetches the gate's applied filters.
    pub fn predictive_view(&self, gate: &FilterGate) -> QueryExecutor<AppliedFilters, Vec<SeriesPoint>> {
        let view = predictive_widget(
            &self.client,
            &self.config.endpoints.predictive,
            self.config.timings.query_debounce(),
        );
        view.follow(gate.subscribe(), predictive_request);
        view
    }

    /// Requests an export document for the current filters.
    pub async fn export(&self) -> Result<ExportBlob, ActionError> {
        let criteria = self.filters.current();
        criteria.validate()?;
        let payload = StatsPayload::from(criteria.as_ref());
        Ok(self
            .client
            .export(&self.config.endpoints.export, &payload)
            .await?)
    }
}
