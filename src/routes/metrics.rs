//! Prometheus metrics endpoint

use axum::{extract::State, response::IntoResponse};

use crate::state::AppState;
use crate::tasks::sync::SyncStatsSnapshot;

/// Render sync counters in the Prometheus text exposition format
pub fn render_metrics(snapshot: &SyncStatsSnapshot) -> String {
    let last_cycle = snapshot
        .last_cycle_at
        .map(|at| at.timestamp())
        .unwrap_or(0);

    format!(
        r#"# HELP campus_sync_cycles_total Total number of sync cycles run
# TYPE campus_sync_cycles_total counter
campus_sync_cycles_total {}

# HELP campus_sync_failed_cycles_total Sync cycles aborted before completing
# TYPE campus_sync_failed_cycles_total counter
campus_sync_failed_cycles_total {}

# HELP campus_sync_fetched_total Readings returned by the external source
# TYPE campus_sync_fetched_total counter
campus_sync_fetched_total {}

# HELP campus_sync_inserted_total Readings written to the environment table
# TYPE campus_sync_inserted_total counter
campus_sync_inserted_total {}

# HELP campus_sync_purged_total Readings removed by the retention sweep
# TYPE campus_sync_purged_total counter
campus_sync_purged_total {}

# HELP campus_sync_insert_failures_total Cycles whose insert step failed
# TYPE campus_sync_insert_failures_total counter
campus_sync_insert_failures_total {}

# HELP campus_sync_last_cycle_timestamp_seconds Unix time of the last completed cycle
# TYPE campus_sync_last_cycle_timestamp_seconds gauge
campus_sync_last_cycle_timestamp_seconds {}

# HELP campus_sync_info Build information
# TYPE campus_sync_info gauge
campus_sync_info{{version="{}"}} 1
"#,
        snapshot.cycles_total,
        snapshot.failed_cycles_total,
        snapshot.fetched_total,
        snapshot.inserted_total,
        snapshot.purged_total,
        snapshot.insert_failures_total,
        last_cycle,
        env!("CARGO_PKG_VERSION"),
    )
}

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let output = render_metrics(&state.sync_stats.snapshot());

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
}
