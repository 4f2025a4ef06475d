// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

//! Draft/applied separation for the predictive views.
//!
//! Predictive analyses are expensive, so editing filters never triggers a
//! fetch. The user edits a draft and explicitly commits it; downstream
//! fetchers only ever observe the committed (`applied`) snapshot.

use crate::api::{ApiClient, ApiError};
use crate::filter::{EntityId, ValidationError};
use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub origin: String,
    pub destination: String,
}

impl Route {
    pub fn new(origin: &str, destination: &str) -> Self {
        Self {
            origin: origin.trim().to_uppercase(),
            destination: destination.trim().to_uppercase(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.destination)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub airports: Vec<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

/// The backing catalog the dependent option lists are derived from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectorCatalog {
    sectors: Vec<Sector>,
}

impl SectorCatalog {
    pub fn new(sectors: Vec<Sector>) -> Self {
        Self { sectors }
    }

    pub async fn fetch(client: &ApiClient, path: &str) -> Result<Self, ApiError> {
        let sectors: Vec<Sector> = client.get_rows(path).await?;
        debug!("Loaded sector catalog — sectors={}", sectors.len());
        Ok(Self::new(sectors))
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn find(&self, id: &EntityId) -> Option<&Sector> {
        self.sectors.iter().find(|s| &s.id == id)
    }
}

/// In-progress edits. Blank fields mean "all".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictiveDraft {
    pub sector: Option<EntityId>,
    pub airport: Option<String>,
    pub route: Option<Route>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub horizon_days: Option<u32>,
}

/// The committed filter set, also the wire payload of the predictive endpoint.
/// `None` fields serialize as `null`, which the backend reads as "all".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFilters {
    pub sector_id: EntityId,
    pub airport: Option<String>,
    pub route: Option<Route>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub horizon_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependentOptions {
    pub airports: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Nothing committed yet; predictive views show a call to action.
    Idle,
    Applied,
}

pub struct FilterGate {
    catalog: SectorCatalog,
    draft: PredictiveDraft,
    options: DependentOptions,
    applied: watch::Sender<Option<Arc<AppliedFilters>>>,
}

impl FilterGate {
    pub fn new(catalog: SectorCatalog) -> Self {
        let (applied, _rx) = watch::channel(None);
        Self {
            catalog,
            draft: PredictiveDraft::default(),
            options: DependentOptions::default(),
            applied,
        }
    }

    pub fn draft(&self) -> &PredictiveDraft {
        &self.draft
    }

    pub fn options(&self) -> &DependentOptions {
        &self.options
    }

    pub fn catalog(&self) -> &SectorCatalog {
        &self.catalog
    }

    pub fn state(&self) -> GateState {
        if self.applied.borrow().is_some() {
            GateState::Applied
        } else {
            GateState::Idle
        }
    }

    pub fn applied(&self) -> Option<Arc<AppliedFilters>> {
        self.applied.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AppliedFilters>>> {
        self.applied.subscribe()
    }

    /// Replacing the catalog re-derives the dependent options.
    pub fn set_catalog(&mut self, catalog: SectorCatalog) {
        self.catalog = catalog;
        self.recompute();
    }

    pub fn select_sector(&mut self, sector: Option<EntityId>) {
        self.draft.sector = sector;
        self.recompute();
    }

    /// Picks an airport from the current dependent options. Values outside
    /// the options are refused.
    pub fn select_airport(&mut self, airport: Option<&str>) -> bool {
        match airport.map(|a| a.trim().to_uppercase()) {
            None => {
                self.draft.airport = None;
                true
            }
            Some(code) if self.options.airports.contains(&code) => {
                self.draft.airport = Some(code);
                true
            }
            Some(_) => false,
        }
    }

    pub fn select_route(&mut self, route: Option<Route>) -> bool {
        match route {
            None => {
                self.draft.route = None;
                true
            }
            Some(route) if self.options.routes.contains(&route) => {
                self.draft.route = Some(route);
                true
            }
            Some(_) => false,
        }
    }

    /// Edits free-form draft fields. Never fetches; dependent options are
    /// re-derived afterwards in case the edit touched the sector.
    pub fn edit<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut PredictiveDraft),
    {
        edit(&mut self.draft);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.options = match self.draft.sector.as_ref().and_then(|id| self.catalog.find(id)) {
            Some(sector) => DependentOptions {
                airports: sector.airports.iter().map(|a| a.trim().to_uppercase()).collect(),
                routes: sector.routes.clone(),
            },
            None => DependentOptions::default(),
        };

        if let Some(airport) = &self.draft.airport {
            if !self.options.airports.contains(airport) {
                debug!("Clearing airport no longer valid for sector — airport={}", airport);
                self.draft.airport = None;
            }
        }
        if let Some(route) = &self.draft.route {
            if !self.options.routes.contains(route) {
                debug!("Clearing route no longer valid for sector — route={}", route);
                self.draft.route = None;
            }
        }
    }

    pub fn can_commit(&self) -> bool {
        self.draft.sector.is_some()
    }

    /// Copies the draft into a fresh applied snapshot and publishes it.
    pub fn commit(&mut self) -> Result<Arc<AppliedFilters>, ValidationError> {
        let sector_id = self
            .draft
            .sector
            .clone()
            .ok_or(ValidationError::MissingPrimary)?;

        if let (Some(start), Some(end)) = (self.draft.start_date, self.draft.end_date) {
            if start > end {
                return Err(ValidationError::InvertedDateRange { start, end });
            }
        }

        let applied = Arc::new(AppliedFilters {
            sector_id,
            airport: self
                .draft
                .airport
                .clone()
                .filter(|a| !a.trim().is_empty()),
            route: self.draft.route.clone(),
            start_date: self.draft.start_date,
            end_date: self.draft.end_date,
            horizon_days: self.draft.horizon_days.filter(|d| *d > 0),
        });

        info!(
            "Applied predictive filters — sector={} airport={} route={}",
            applied.sector_id,
            applied.airport.as_deref().unwrap_or("all"),
            applied
                .route
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "all".to_string())
        );
        self.applied.send_replace(Some(applied.clone()));
        Ok(applied)
    }

    /// Resets draft and applied state and returns to `Idle`.
    pub fn clear(&mut self) {
        self.draft = PredictiveDraft::default();
        self.recompute();
        self.applied.send_replace(None);
    }
}
