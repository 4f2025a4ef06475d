// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::watch;

/// Identifier of a categorical filter field (e.g. `"airlines"`, `"aircraft_types"`).
pub type FieldId = String;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A primary selection is required before applying filters")]
    MissingPrimary,
    #[error("Start date {start} is after end date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },
    #[error("Minimum level {min} is above maximum level {max}")]
    InvertedLevelRange { min: u32, max: u32 },
    #[error("Invalid ICAO code: {0}")]
    InvalidIcao(String),
}

/// Key of a resolved lookup entity. Catalogs hand out either numeric keys
/// (sectors, regions) or text keys (ICAO codes).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Number(i64),
    Text(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Number(n) => write!(f, "{}", n),
            EntityId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId::Text(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId::Text(s)
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Number(n)
    }
}

/// A resolved lookup result. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
    pub label: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl EntityRef {
    pub fn new(id: impl Into<EntityId>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            value: serde_json::Value::String(label.clone()),
            label,
        }
    }

    /// Shorthand for an airport reference keyed by its ICAO code.
    pub fn airport(icao: &str) -> Self {
        let code = icao.trim().to_uppercase();
        Self::new(code.clone(), code)
    }
}

/// An ordered selection of entities, unique by `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionList(Vec<EntityRef>);

impl SelectionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entity` unless an entry with the same id is already present.
    /// Returns whether the list changed.
    pub fn add(&mut self, entity: EntityRef) -> bool {
        if self.contains(&entity.id) {
            return false;
        }
        self.0.push(entity);
        true
    }

    /// Removes the entry matching `id`. Returns whether the list changed.
    pub fn remove(&mut self, id: &EntityId) -> bool {
        let before = self.0.len();
        self.0.retain(|e| &e.id != id);
        self.0.len() != before
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.0.iter().any(|e| &e.id == id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.0.iter().map(|e| e.id.clone()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<EntityRef> for SelectionList {
    fn from_iter<I: IntoIterator<Item = EntityRef>>(iter: I) -> Self {
        let mut list = SelectionList::new();
        for entity in iter {
            list.add(entity);
        }
        list
    }
}

impl<'a> IntoIterator for &'a SelectionList {
    type Item = &'a EntityRef;
    type IntoIter = std::slice::Iter<'a, EntityRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Names one of the selection lists inside `FilterCriteria`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectionField {
    Origins,
    Destinations,
    Categorical(FieldId),
}

/// The user's currently selected criteria for one dashboard view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_level: Option<u32>,
    pub max_level: Option<u32>,
    #[serde(default)]
    pub origins: SelectionList,
    #[serde(default)]
    pub destinations: SelectionList,
    #[serde(default)]
    pub categorical: BTreeMap<FieldId, SelectionList>,
}

fn icao_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9]{4}$").expect("static ICAO pattern"))
}

pub fn is_valid_icao(code: &str) -> bool {
    icao_pattern().is_match(code)
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// The selection list for a categorical field, created empty on first access.
    pub fn selection_mut(&mut self, field: &str) -> &mut SelectionList {
        self.categorical.entry(field.to_string()).or_default()
    }

    pub fn selection(&self, field: &str) -> Option<&SelectionList> {
        self.categorical.get(field)
    }

    pub fn list_mut(&mut self, field: &SelectionField) -> &mut SelectionList {
        match field {
            SelectionField::Origins => &mut self.origins,
            SelectionField::Destinations => &mut self.destinations,
            SelectionField::Categorical(id) => self.selection_mut(id),
        }
    }

    /// True when nothing at all is selected.
    pub fn is_unfiltered(&self) -> bool {
        self.start_date.is_none()
            && self.end_date.is_none()
            && self.min_level.is_none()
            && self.max_level.is_none()
            && self.origins.is_empty()
            && self.destinations.is_empty()
            && self.categorical.values().all(SelectionList::is_empty)
    }

    /// Client-side checks run before a request is allowed to leave.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ValidationError::InvertedDateRange { start, end });
            }
        }
        if let (Some(min), Some(max)) = (self.min_level, self.max_level) {
            if min > max {
                return Err(ValidationError::InvertedLevelRange { min, max });
            }
        }
        for entity in self.origins.iter().chain(self.destinations.iter()) {
            if let EntityId::Text(code) = &entity.id {
                if !is_valid_icao(code) {
                    return Err(ValidationError::InvalidIcao(code.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Holder of the current `FilterCriteria` for a view.
///
/// Criteria are never edited in place: every update clones the current
/// value, applies the edit and publishes the result as a new `Arc`.
/// Subscribers therefore only ever observe whole snapshots.
#[derive(Clone)]
pub struct FilterStore {
    tx: Arc<watch::Sender<Arc<FilterCriteria>>>,
}

impl Default for FilterStore {
    fn default() -> Self {
        Self::new(FilterCriteria::default())
    }
}

impl FilterStore {
    pub fn new(initial: FilterCriteria) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Arc<FilterCriteria> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FilterCriteria>> {
        self.tx.subscribe()
    }

    /// Applies `edit` to a copy of the current criteria and publishes it.
    /// Edits that leave the criteria unchanged publish nothing.
    pub fn update<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut FilterCriteria),
    {
        let current = self.current();
        let mut next = (*current).clone();
        edit(&mut next);
        if next == *current {
            return false;
        }
        self.tx.send_replace(Arc::new(next));
        true
    }

    pub fn replace(&self, criteria: FilterCriteria) {
        self.tx.send_replace(Arc::new(criteria));
    }

    pub fn reset(&self) {
        self.replace(FilterCriteria::default());
    }
}
