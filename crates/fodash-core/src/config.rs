// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use crate::api::ClientConfig;
use crate::lookup::LookupSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR_ENV: &str = "FODASH_CONFIG_DIR";
const CONFIG_FILE: &str = "dashboard.json";

/// Directory holding the dashboard configuration. `FODASH_CONFIG_DIR`
/// overrides the platform default.
pub fn get_config_root() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    directories::ProjectDirs::from("org", "fodash", "FlightOpsDash")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".fodash"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub categories: String,
    pub heatmap: String,
    pub series: String,
    pub lookup: String,
    pub sectors: String,
    pub predictive: String,
    pub upload: String,
    pub job_status: String,
    pub export: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            categories: "stats/operations-by-origin".to_string(),
            heatmap: "stats/weekly-heatmap".to_string(),
            series: "stats/daily-operations".to_string(),
            lookup: "lookup/airports".to_string(),
            sectors: "sectors".to_string(),
            predictive: "predictive/demand".to_string(),
            upload: "uploads".to_string(),
            job_status: "uploads/status".to_string(),
            export: "export/report".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub query_debounce_ms: u64,
    pub lookup_debounce_ms: u64,
    pub lookup_min_chars: usize,
    pub lookup_page_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            query_debounce_ms: 500,
            lookup_debounce_ms: 300,
            lookup_min_chars: 2,
            lookup_page_size: 20,
            poll_interval_ms: 100,
        }
    }
}

impl Timings {
    pub fn query_debounce(&self) -> Duration {
        Duration::from_millis(self.query_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn lookup_settings(&self) -> LookupSettings {
        LookupSettings {
            debounce: Duration::from_millis(self.lookup_debounce_ms),
            min_chars: self.lookup_min_chars,
            page_size: self.lookup_page_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub base_url: String,
    /// Default headers sent with every request (e.g. an API token).
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
    pub endpoints: Endpoints,
    pub timings: Timings,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            headers: BTreeMap::new(),
            timeout_secs: 30,
            endpoints: Endpoints::default(),
            timings: Timings::default(),
        }
    }
}

impl DashboardConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            headers: self.headers.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigManager {
    pub fn new() -> Self {
        Self::at(get_config_root())
    }

    pub fn at<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            config_path: dir.as_ref().join(CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Loads the configuration; a missing file yields the defaults.
    pub fn load(&self) -> Result<DashboardConfig> {
        if !self.config_path.exists() {
            return Ok(DashboardConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.config_path.display()))
    }

    pub fn save(&self, config: &DashboardConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize dashboard config")?;

        fs::write(&self.config_path, content).context("Failed to write dashboard.json")
    }
}
