// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::filter::{EntityId, FieldId, FilterCriteria};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

/// Wire shape accepted by every stats endpoint.
///
/// Entity lists carry ids only; categorical selections are flattened so each
/// field becomes a top-level array keyed by its field id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsPayload {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    pub origins: Vec<EntityId>,
    pub destinations: Vec<EntityId>,
    #[serde(flatten)]
    pub categorical: BTreeMap<FieldId, Vec<EntityId>>,
}

impl From<&FilterCriteria> for StatsPayload {
    fn from(criteria: &FilterCriteria) -> Self {
        Self {
            start_date: criteria.start_date,
            end_date: criteria.end_date,
            min_level: criteria.min_level,
            max_level: criteria.max_level,
            origins: criteria.origins.ids(),
            destinations: criteria.destinations.ids(),
            categorical: criteria
                .categorical
                .iter()
                .map(|(field, list)| (field.clone(), list.ids()))
                .collect(),
        }
    }
}

/// Date-only subset used by widgets that ignore route and level filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DateRangePayload {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl From<&FilterCriteria> for DateRangePayload {
    fn from(criteria: &FilterCriteria) -> Self {
        Self {
            start_date: criteria.start_date,
            end_date: criteria.end_date,
        }
    }
}
