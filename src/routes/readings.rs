//! Reading query and direct-write endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::{EnvironmentReading, EnvironmentWriteRequest, TrafficReading, WeatherReading};
use crate::state::AppState;
use crate::store::ReadingStore;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;
const MAX_BATCH: usize = 10_000;

/// Query parameters for environment readings
#[derive(Debug, Deserialize)]
pub struct EnvironmentQuery {
    /// Inclusive lower bound on record time
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on record time
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of readings to return (default: 100, max: 1000)
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReadingsResponse<T> {
    pub count: usize,
    pub readings: Vec<T>,
}

impl<T> From<Vec<T>> for ReadingsResponse<T> {
    fn from(readings: Vec<T>) -> Self {
        Self {
            count: readings.len(),
            readings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub inserted: u64,
}

/// GET /api/environment
pub async fn list_environment(
    State(state): State<AppState>,
    Query(params): Query<EnvironmentQuery>,
) -> Result<Json<ReadingsResponse<EnvironmentReading>>> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(AppError::InvalidRequest(
                "'from' must not be after 'to'".into(),
            ));
        }
    }

    let readings = state
        .db
        .list_environment(params.from, params.to, clamp_limit(params.limit))
        .await?;

    Ok(Json(readings.into()))
}

/// GET /api/environment/device/:device_id
pub async fn environment_by_device(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<ReadingsResponse<EnvironmentReading>>> {
    let readings = state
        .db
        .environment_by_device(device_id, clamp_limit(params.limit))
        .await?;

    Ok(Json(readings.into()))
}

/// GET /api/environment/latest/:device_id
pub async fn latest_environment(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
) -> Result<Json<EnvironmentReading>> {
    state
        .db
        .latest_environment(device_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            AppError::NotFound(format!("No environment readings for device {}", device_id))
        })
}

/// POST /api/environment
///
/// Direct write of a single reading. `record_time` defaults to now.
pub async fn create_environment(
    State(state): State<AppState>,
    Json(request): Json<EnvironmentWriteRequest>,
) -> Result<(StatusCode, Json<EnvironmentReading>)> {
    let reading = request.into_reading(Utc::now())?;
    let stored = state.db.insert_environment(&reading).await?;

    Ok((StatusCode::CREATED, Json(stored)))
}

/// POST /api/environment/batch
///
/// Inserts all readings in one statement and returns the count.
pub async fn create_environment_batch(
    State(state): State<AppState>,
    Json(requests): Json<Vec<EnvironmentWriteRequest>>,
) -> Result<Json<BatchResponse>> {
    if requests.len() > MAX_BATCH {
        return Err(AppError::InvalidRequest(format!(
            "Batch of {} exceeds the limit of {}",
            requests.len(),
            MAX_BATCH
        )));
    }

    let now = Utc::now();
    let readings = requests
        .into_iter()
        .map(|r| r.into_reading(now))
        .collect::<Result<Vec<_>>>()?;

    let inserted = state.db.insert_environment_readings(&readings).await?;
    info!(inserted = inserted, "Environment batch ingested");

    Ok(Json(BatchResponse { inserted }))
}

/// GET /api/traffic
pub async fn list_traffic(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<ReadingsResponse<TrafficReading>>> {
    let readings = state.db.recent_traffic(clamp_limit(params.limit)).await?;
    Ok(Json(readings.into()))
}

/// GET /api/weather
pub async fn list_weather(
    State(state): State<AppState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<ReadingsResponse<WeatherReading>>> {
    let readings = state.db.recent_weather(clamp_limit(params.limit)).await?;
    Ok(Json(readings.into()))
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}
