//! Device management API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::{Device, DeviceRequest, DeviceStatus, DeviceStatusUpdate};
use crate::state::AppState;

/// Query parameters for listing devices
#[derive(Debug, Deserialize)]
pub struct DeviceListQuery {
    pub status: Option<DeviceStatus>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceListResponse {
    pub count: usize,
    pub devices: Vec<Device>,
}

/// GET /api/devices
///
/// Query parameters:
/// - status: normal, faulty or maintenance
/// - type: device type
pub async fn list_devices(
    State(state): State<AppState>,
    Query(params): Query<DeviceListQuery>,
) -> Result<Json<DeviceListResponse>> {
    let devices = state
        .db
        .list_devices(params.status, params.device_type.as_deref())
        .await?;

    Ok(Json(DeviceListResponse {
        count: devices.len(),
        devices,
    }))
}

/// GET /api/devices/:id
pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
) -> Result<Json<Device>> {
    state
        .db
        .get_device(device_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(device_id))
}

/// POST /api/devices
pub async fn create_device(
    State(state): State<AppState>,
    Json(request): Json<DeviceRequest>,
) -> Result<(StatusCode, Json<Device>)> {
    request.validate()?;

    let device = state.db.create_device(&request).await?;
    info!(device_id = device.device_id, name = %device.device_name, "Device created");

    Ok((StatusCode::CREATED, Json(device)))
}

/// PUT /api/devices/:id
pub async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
    Json(request): Json<DeviceRequest>,
) -> Result<Json<Device>> {
    request.validate()?;

    state
        .db
        .update_device(device_id, &request)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(device_id))
}

/// PATCH /api/devices/:id/status
pub async fn update_device_status(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
    Json(update): Json<DeviceStatusUpdate>,
) -> Result<Json<Device>> {
    let device = state
        .db
        .update_device_status(device_id, update.status)
        .await?
        .ok_or_else(|| not_found(device_id))?;

    info!(device_id = device_id, status = ?update.status, "Device status changed");
    Ok(Json(device))
}

/// DELETE /api/devices/:id
///
/// Removes the device and, through the foreign key cascade, all of its readings.
pub async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<i32>,
) -> Result<StatusCode> {
    if state.db.delete_device(device_id).await? {
        info!(device_id = device_id, "Device deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(device_id))
    }
}

fn not_found(device_id: i32) -> AppError {
    AppError::NotFound(format!("Device {} not found", device_id))
}
