// SPDX-License-Identifier: MIT
// Copyright (c) 2026 StarTuz

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fodash_core::api::{ApiClient, UploadFile};
use fodash_core::config::{ConfigManager, DashboardConfig};
use fodash_core::dashboard::{self, Dashboard};
use fodash_core::filter::{EntityId, EntityRef, FilterCriteria, FilterStore};
use fodash_core::gate::Route;
use fodash_core::heatmap::{HeatmapChart, HOURS_PER_DAY};
use fodash_core::lookup::{LookupResolver, RemoteCatalog};
use fodash_core::progress::{JobOutcome, UploadPhase};
use fodash_core::query::{ChartPayload, ChartResult, ChartStatus, Derived, QueryExecutor};
use log::debug;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Backend base URL (overrides dashboard.json)
    #[arg(short, long, env = "FODASH_BASE_URL")]
    base_url: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one dashboard chart for a set of filters
    Query {
        #[arg(value_enum)]
        chart: Chart,
        #[command(flatten)]
        filters: FilterArgs,
        /// Also write the rows to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Search a lookup catalog the way the multi-select fields do
    Lookup {
        query: String,
        /// Scope the search to a parent entity (e.g. a region id)
        #[arg(long)]
        parent: Option<String>,
    },
    /// Commit predictive filters and fetch the forecast
    Predict {
        #[arg(long)]
        sector: String,
        #[arg(long)]
        airport: Option<String>,
        /// Route as ORIGIN-DESTINATION
        #[arg(long)]
        route: Option<String>,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        horizon: Option<u32>,
    },
    /// Upload a data file and follow its ingestion
    Upload { file: PathBuf },
    /// Download the report document for a set of filters
    Export {
        #[command(flatten)]
        filters: FilterArgs,
        /// Directory the document is saved into
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Inspect or create dashboard.json
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration if none exists
    Init,
    /// Print the configuration file path
    Path,
}

#[derive(Clone, Copy, ValueEnum)]
enum Chart {
    Categories,
    Heatmap,
    Series,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    #[arg(long)]
    start: Option<NaiveDate>,
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Origin airport ICAO code (repeatable)
    #[arg(long = "origin")]
    origins: Vec<String>,
    /// Destination airport ICAO code (repeatable)
    #[arg(long = "destination")]
    destinations: Vec<String>,
    #[arg(long)]
    min_level: Option<u32>,
    #[arg(long)]
    max_level: Option<u32>,
    /// Categorical selection as FIELD=ID (repeatable)
    #[arg(long = "select", value_parser = parse_selection)]
    selections: Vec<(String, String)>,
}

impl FilterArgs {
    fn criteria(&self) -> FilterCriteria {
        let mut criteria = FilterCriteria::new();
        criteria.start_date = self.start;
        criteria.end_date = self.end;
        criteria.min_level = self.min_level;
        criteria.max_level = self.max_level;
        for code in &self.origins {
            criteria.origins.add(EntityRef::airport(code));
        }
        for code in &self.destinations {
            criteria.destinations.add(EntityRef::airport(code));
        }
        for (field, id) in &self.selections {
            criteria
                .selection_mut(field)
                .add(EntityRef::new(entity_id(id), id.as_str()));
        }
        criteria
    }
}

fn parse_selection(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, id)) if !field.trim().is_empty() && !id.trim().is_empty() => {
            Ok((field.trim().to_string(), id.trim().to_string()))
        }
        _ => Err(format!("expected FIELD=ID, got '{}'", raw)),
    }
}

fn entity_id(raw: &str) -> EntityId {
    raw.parse::<i64>()
        .map(EntityId::Number)
        .unwrap_or_else(|_| EntityId::from(raw))
}

fn parse_route(raw: &str) -> Result<Route> {
    match raw.split_once('-') {
        Some((origin, destination)) => Ok(Route::new(origin, destination)),
        None => bail!("Route must look like ORIGIN-DESTINATION, got '{}'", raw),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => std::env::var("FODASH_LOG")
            .ok()
            .and_then(|raw| LevelFilter::from_str(&raw).ok())
            .unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    // A logger may already be installed when embedded; that is not fatal.
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

fn load_config(base_url: Option<String>) -> Result<DashboardConfig> {
    let manager = ConfigManager::new();
    let mut config = manager.load()?;
    if let Some(url) = base_url {
        config.base_url = url;
    }
    debug!(
        "Loaded configuration — path={} base_url={}",
        manager.path().display(),
        config.base_url
    );
    Ok(config)
}

/// How long to wait for a widget: the request timeout plus its debounce window.
fn wait_limit(config: &DashboardConfig, debounce: Duration) -> Duration {
    Duration::from_secs(config.timeout_secs) + debounce + Duration::from_secs(1)
}

async fn settle<T: Clone>(
    mut rx: watch::Receiver<ChartResult<T>>,
    limit: Duration,
) -> Result<ChartResult<T>> {
    let result = tokio::time::timeout(limit, rx.wait_for(|r| r.status() != ChartStatus::Loading))
        .await
        .context("Timed out waiting for the backend")?
        .context("Widget closed before answering")?;
    Ok(result.clone())
}

/// Runs one widget against a single filter snapshot and waits for its answer.
async fn run_widget<P, T>(
    widget: QueryExecutor<P, T>,
    store: &FilterStore,
    derive: fn(&Arc<FilterCriteria>) -> Derived<P>,
    limit: Duration,
) -> Result<Option<T>>
where
    P: Clone + PartialEq + Send + Sync + 'static,
    T: ChartPayload + Clone + Send + Sync + 'static,
{
    widget.follow(store.subscribe(), derive);
    match settle(widget.subscribe(), limit).await? {
        ChartResult::Data(data) => Ok(Some(data)),
        ChartResult::Empty => Ok(None),
        ChartResult::Error(message) => bail!("{}: {}", widget.name(), message),
        ChartResult::Loading => bail!("{}: still loading", widget.name()),
    }
}

fn print_heatmap(chart: &HeatmapChart) {
    print!("{:>4} ", "");
    for hour in 0..HOURS_PER_DAY {
        print!("{:>3}", hour);
    }
    println!();
    // Rows are stored bottom-to-top; print Monday first.
    for row in chart.rows.iter().rev() {
        print!("{:>4} ", row.label);
        for value in row.values {
            print!("{:>3}", chart.scale.bucket_for(value));
        }
        println!();
    }
    println!();
    for (i, bucket) in chart.scale.buckets.iter().enumerate() {
        println!("  {} = {} ({})", i, bucket.label, bucket.color);
    }
}

fn write_csv(path: &Path, header: &[&str], rows: Vec<Vec<String>>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn query(
    config: &DashboardConfig,
    chart: Chart,
    filters: &FilterArgs,
    csv: Option<&Path>,
) -> Result<()> {
    let client = ApiClient::new(&config.client_config())?;
    let store = FilterStore::new(filters.criteria());
    let endpoints = &config.endpoints;
    // One snapshot only, so there is nothing to debounce.
    let debounce = Duration::ZERO;
    let limit = wait_limit(config, debounce);

    match chart {
        Chart::Categories => {
            let widget = dashboard::category_widget(&client, &endpoints.categories, debounce);
            let Some(rows) = run_widget(widget, &store, dashboard::stats_request, limit).await? else {
                println!("No data for the selected filters");
                return Ok(());
            };
            for row in &rows {
                println!("{:<32} {:>12}", row.name, row.value);
            }
            if let Some(path) = csv {
                let records = rows
                    .iter()
                    .map(|r| vec![r.name.clone(), r.value.to_string()])
                    .collect();
                write_csv(path, &["name", "value"], records)?;
            }
        }
        Chart::Heatmap => {
            let widget = dashboard::heatmap_widget(&client, &endpoints.heatmap, debounce);
            let Some(heatmap) = run_widget(widget, &store, dashboard::stats_request, limit).await? else {
                println!("No data for the selected filters");
                return Ok(());
            };
            print_heatmap(&heatmap);
            if let Some(path) = csv {
                let records = heatmap
                    .cells()
                    .map(|c| {
                        vec![
                            c.day_label.to_string(),
                            c.hour.to_string(),
                            c.value.to_string(),
                        ]
                    })
                    .collect();
                write_csv(path, &["day", "hour", "value"], records)?;
            }
        }
        Chart::Series => {
            let widget = dashboard::series_widget(&client, &endpoints.series, debounce);
            let Some(points) = run_widget(widget, &store, dashboard::date_range_request, limit).await? else {
                println!("No data for the selected filters");
                return Ok(());
            };
            for point in &points {
                println!("{:<16} {:>12}", point.x, point.y);
            }
            if let Some(path) = csv {
                let records = points
                    .iter()
                    .map(|p| vec![p.x.to_string(), p.y.to_string()])
                    .collect();
                write_csv(path, &["x", "y"], records)?;
            }
        }
    }
    Ok(())
}

async fn lookup(config: &DashboardConfig, text: &str, parent: Option<&str>) -> Result<()> {
    let settings = config.timings.lookup_settings();
    if text.trim().chars().count() < settings.min_chars {
        bail!("Type at least {} characters to search", settings.min_chars);
    }

    let client = ApiClient::new(&config.client_config())?;
    let mut catalog = RemoteCatalog::new(client, config.endpoints.lookup.clone(), settings.page_size);
    if let Some(parent) = parent {
        catalog = catalog.scoped_to(entity_id(parent));
    }
    let resolver = LookupResolver::new("lookup", Arc::new(catalog), settings);

    let mut rx = resolver.subscribe();
    resolver.input(text);
    let limit = wait_limit(config, settings.debounce);
    let view = tokio::time::timeout(
        limit,
        rx.wait_for(|v| resolver.searches_issued() > 0 && !v.loading),
    )
    .await
    .context("Timed out waiting for the lookup")?
    .context("Lookup closed before answering")?
    .clone();

    if let Some(error) = view.error {
        bail!("Lookup failed: {}", error);
    }
    if view.options.is_empty() {
        println!("No matches for '{}'", text.trim());
    }
    for option in &view.options {
        println!("{:<12} {}", option.id, option.label);
    }
    Ok(())
}

async fn predict(
    dash: &Dashboard,
    sector: &str,
    airport: Option<&str>,
    route: Option<&str>,
    range: (Option<NaiveDate>, Option<NaiveDate>),
    horizon: Option<u32>,
) -> Result<()> {
    let mut gate = dash.sector_gate().await?;
    let sector_id = entity_id(sector);
    if gate.catalog().find(&sector_id).is_none() {
        bail!("Unknown sector '{}'", sector);
    }
    gate.select_sector(Some(sector_id));

    if airport.is_some() && !gate.select_airport(airport) {
        bail!(
            "Airport {} is not part of this sector (choose from: {})",
            airport.unwrap_or_default(),
            gate.options().airports.join(", ")
        );
    }
    if let Some(raw) = route {
        let route = parse_route(raw)?;
        if !gate.select_route(Some(route.clone())) {
            bail!("Route {} is not part of this sector", route);
        }
    }
    gate.edit(|draft| {
        draft.start_date = range.0;
        draft.end_date = range.1;
        draft.horizon_days = horizon;
    });

    let view = dash.predictive_view(&gate);
    let applied = gate.commit()?;
    println!(
        "Forecast for sector {} (airport: {}, route: {})",
        applied.sector_id,
        applied.airport.as_deref().unwrap_or("all"),
        applied
            .route
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "all".to_string())
    );

    let debounce = dash.config().timings.query_debounce();
    let mut rx = view.subscribe();
    let limit = wait_limit(dash.config(), debounce);
    // The idle view reports Empty before the commit is picked up; wait for a request.
    let result = tokio::time::timeout(
        limit,
        rx.wait_for(|r| view.requests_issued() > 0 && r.status() != ChartStatus::Loading),
    )
    .await
    .context("Timed out waiting for the forecast")?
    .context("Predictive view closed before answering")?
    .clone();

    match result {
        ChartResult::Data(points) => {
            for point in &points {
                println!("{:<16} {:>12}", point.x, point.y);
            }
        }
        ChartResult::Empty => println!("No forecast for the selected filters"),
        ChartResult::Error(message) => bail!("Forecast failed: {}", message),
        ChartResult::Loading => {}
    }
    Ok(())
}

async fn upload(dash: &Dashboard, path: &Path) -> Result<()> {
    let file = UploadFile::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let tracker = dash.upload_tracker();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    tracker.on_complete(move |outcome| {
        let _ = done_tx.send(outcome);
    });

    let mut rx = tracker.subscribe();
    if !tracker.start(file) {
        bail!("Another upload is still running");
    }

    let report = async {
        let mut last = String::new();
        while rx.changed().await.is_ok() {
            let job = rx.borrow_and_update().clone();
            let line = match job.phase {
                UploadPhase::Transferring => format!("Uploading... {:.0}%", job.transfer_percent),
                UploadPhase::Processing => format!(
                    "Processing rows... {}/{} ({:.0}%)",
                    job.processed_rows,
                    job.total_rows,
                    job.processing_percent()
                ),
                _ => continue,
            };
            if line != last {
                println!("{}", line);
                last = line;
            }
        }
    };

    let outcome = tokio::select! {
        outcome = done_rx.recv() => outcome.context("Upload tracker stopped unexpectedly")?,
        _ = report => bail!("Upload tracker stopped unexpectedly"),
    };

    match outcome {
        JobOutcome::Completed {
            total_rows,
            processed_rows,
        } => {
            println!("Ingestion complete: {}/{} rows", processed_rows, total_rows);
            tracker.acknowledge();
            Ok(())
        }
        JobOutcome::Failed(e) => bail!("{}", e),
    }
}

async fn export(dash: &Dashboard, filters: &FilterArgs, out: &Path) -> Result<()> {
    dash.filters().replace(filters.criteria());
    let blob = dash.export().await?;
    let path = blob.save_to(out)?;
    println!(
        "Saved {} ({} bytes, {})",
        path.display(),
        blob.bytes.len(),
        blob.content_type
    );
    Ok(())
}

fn config_command(action: &ConfigAction, base_url: Option<String>) -> Result<()> {
    let manager = ConfigManager::new();
    match action {
        ConfigAction::Show => {
            let config = load_config(base_url)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init => {
            if manager.path().exists() {
                println!("Configuration already exists at {}", manager.path().display());
            } else {
                manager.save(&DashboardConfig::default())?;
                println!("Wrote defaults to {}", manager.path().display());
            }
        }
        ConfigAction::Path => println!("{}", manager.path().display()),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Commands::Config { action } = &cli.command {
        return config_command(action, cli.base_url);
    }

    let config = load_config(cli.base_url)?;

    match &cli.command {
        Commands::Query {
            chart,
            filters,
            csv,
        } => query(&config, *chart, filters, csv.as_deref()).await,
        Commands::Lookup { query, parent } => lookup(&config, query, parent.as_deref()).await,
        Commands::Predict {
            sector,
            airport,
            route,
            start,
            end,
            horizon,
        } => {
            let dash = Dashboard::new(config)?;
            predict(
                &dash,
                sector,
                airport.as_deref(),
                route.as_deref(),
                (*start, *end),
                *horizon,
            )
            .await
        }
        Commands::Upload { file } => {
            let dash = Dashboard::new(config)?;
            upload(&dash, file).await
        }
        Commands::Export { filters, out } => {
            let dash = Dashboard::new(config)?;
            export(&dash, filters, out).await
        }
        Commands::Config { .. } => Ok(()),
    }
}
