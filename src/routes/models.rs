//! 3D building model import and lookup endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::BuildingData;
use crate::services::model_import::{self, ModelImportOutcome, DEFAULT_MODEL_NAME};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    pub file_path: Option<String>,
    pub model_type: Option<String>,
    pub model_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub model_id: i32,
    pub parts: usize,
    pub data_items: usize,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ImportStatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingDataQuery {
    pub model_name: Option<String>,
}

/// POST /api/model/import
///
/// Query parameters:
/// - filePath: descriptor path on the server (required)
/// - modelType: e.g. architecture, structure, mep (required)
/// - modelName: defaults to the campus building model name
pub async fn import_model(
    State(state): State<AppState>,
    Query(params): Query<ImportQuery>,
) -> Result<Json<ImportResponse>> {
    let file_path = required(params.file_path, "filePath")?;
    let model_type = required(params.model_type, "modelType")?;
    let model_name = params
        .model_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());

    let ModelImportOutcome {
        model_id,
        parts,
        data_items,
    } = model_import::import_model(
        state.db.as_ref(),
        &state.import_status,
        Path::new(&file_path),
        &model_type,
        &model_name,
    )
    .await?;

    Ok(Json(ImportResponse {
        model_id,
        parts,
        data_items,
        status: state.import_status.get(),
    }))
}

/// GET /api/model/import-status
pub async fn import_status(State(state): State<AppState>) -> Json<ImportStatusResponse> {
    Json(ImportStatusResponse {
        status: state.import_status.get(),
    })
}

/// GET /api/model/building-data
///
/// Latest import of the named model (default: the campus building model)
/// with its parts and property data.
pub async fn building_data(
    State(state): State<AppState>,
    Query(params): Query<BuildingDataQuery>,
) -> Result<Json<BuildingData>> {
    let model_name = params
        .model_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());

    state
        .db
        .building_data(&model_name)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Model '{}' not found", model_name)))
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest(format!("{} is required", name)))
}
