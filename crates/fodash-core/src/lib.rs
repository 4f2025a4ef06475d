// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

pub mod api;
pub mod config;
pub mod dashboard;
pub mod export;
pub mod filter;
pub mod gate;
pub mod heatmap;
pub mod lookup;
pub mod payload;
pub mod progress;
pub mod query;
pub mod sequence;

pub use api::{ApiClient, ApiError, ClientConfig};
pub use config::{ConfigManager, DashboardConfig};
pub use dashboard::{ActionError, Dashboard};
pub use filter::{EntityId, EntityRef, FilterCriteria, FilterStore, SelectionField, ValidationError};
pub use gate::FilterGate;
pub use heatmap::{HeatmapBinner, HeatmapChart};
pub use lookup::LookupResolver;
pub use progress::ProgressTracker;
pub use query::{ChartResult, QueryExecutor};
