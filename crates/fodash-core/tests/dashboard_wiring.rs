use fodash_core::config::DashboardConfig;
use fodash_core::dashboard::Dashboard;
use fodash_core::filter::EntityRef;
use fodash_core::query::ChartResult;
use std::time::Duration;

fn unreachable_backend() -> DashboardConfig {
    DashboardConfig {
        base_url: "http://127.0.0.1:9/api/".to_string(),
        ..DashboardConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_widgets_stay_idle_until_attached() {
    let dash = Dashboard::new(unreachable_backend()).unwrap();
    dash.filters().update(|c| {
        c.origins.add(EntityRef::airport("SKBO"));
    });
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(dash.categories.requests_issued(), 0);
    assert_eq!(dash.heatmap.requests_issued(), 0);
    assert_eq!(dash.series.requests_issued(), 0);
    assert_eq!(dash.categories.current(), ChartResult::Loading);

    dash.attach_widgets();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(dash.categories.requests_issued(), 1);
    assert_eq!(dash.heatmap.requests_issued(), 1);
    assert_eq!(dash.series.requests_issued(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_helpers_do_not_fetch_charts() {
    let dash = Dashboard::new(unreachable_backend()).unwrap();
    let _tracker = dash.upload_tracker();
    let _lookup = dash.airport_lookup();
    dash.filters().update(|c| c.min_level = Some(120));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(dash.categories.requests_issued(), 0);
    assert_eq!(dash.heatmap.requests_issued(), 0);
    assert_eq!(dash.series.requests_issued(), 0);
}
