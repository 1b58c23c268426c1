//! Importer for exported 3D building model descriptors
//!
//! A descriptor is the JSON file written by the model exporter next to the
//! geometry chunks. It lists the chunk file names and a flat property database
//! whose arrays are indexed by element id.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{error, info};

use crate::error::{AppError, Result};
use crate::models::check_required;

/// Name given to imported models unless the caller picks another one
pub const DEFAULT_MODEL_NAME: &str = "Liberal Arts Building";

const PART_TYPE: &str = "model part";
const MAX_EXTERNAL_ID_LEN: usize = 100;

/// Top level of a model descriptor file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelJson {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub part_file_names: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub db: Option<ModelDbJson>,
}

/// Property database arrays. Unused arrays (names, parent ids) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDbJson {
    #[serde(default)]
    pub external_ids: Option<Vec<Value>>,
    #[serde(default)]
    pub categories: Option<Vec<Value>>,
    #[serde(default)]
    pub types: Option<Vec<Value>>,
}

/// Kind of property stored in `model_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelDataType {
    ExternalId,
    Category,
    Type,
}

impl ModelDataType {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelDataType::ExternalId => "external_id",
            ModelDataType::Category => "category",
            ModelDataType::Type => "type",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewModelInfo {
    pub model_name: String,
    pub version: String,
    pub created_date: DateTime<Utc>,
    pub copyright: Option<String>,
    pub schema: Option<String>,
    pub model_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewModelPart {
    pub part_file_name: String,
    pub part_index: i32,
    pub part_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewModelData {
    pub data_type: ModelDataType,
    pub data_key: String,
    pub external_id: String,
}

/// Rows to write for one descriptor, all in a single transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ModelImportPlan {
    pub info: NewModelInfo,
    pub parts: Vec<NewModelPart>,
    pub data: Vec<NewModelData>,
}

/// Destination of an import. Implementations must write the plan atomically.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persist the plan and return the new model id
    async fn insert_model(&self, plan: &ModelImportPlan) -> Result<i32>;
}

/// Human-readable progress of the most recent import
pub struct ImportStatus {
    message: RwLock<String>,
}

impl ImportStatus {
    pub fn new() -> Self {
        Self {
            message: RwLock::new("No import has run".to_string()),
        }
    }

    pub fn set(&self, message: impl Into<String>) {
        *self.message.write() = message.into();
    }

    pub fn get(&self) -> String {
        self.message.read().clone()
    }
}

impl Default for ImportStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and parse a descriptor file
pub async fn load_model_file(path: &Path) -> Result<ModelJson> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::InvalidRequest(format!(
                "Model file not found: {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(AppError::InvalidRequest(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::InvalidRequest(format!("Malformed model file: {}", e)))
}

/// Turn a parsed descriptor into rows.
///
/// Part indexes and data keys are positions in the source arrays, so
/// skipped (null or blank) entries leave gaps rather than shifting later ones.
pub fn plan_import(
    model: ModelJson,
    model_type: &str,
    model_name: &str,
    now: DateTime<Utc>,
) -> Result<ModelImportPlan> {
    check_required("model_name", model_name, 100)?;
    check_required("model_type", model_type, 20)?;

    let version = model.version.unwrap_or_default();
    check_required("version", &version, 20)?;
    check_optional("copyright", model.copyright.as_deref(), 200)?;
    check_optional("schema", model.schema.as_deref(), 50)?;

    let info = NewModelInfo {
        model_name: model_name.to_string(),
        version,
        created_date: parse_created(model.created.as_deref(), now)?,
        copyright: model.copyright,
        schema: model.schema,
        model_type: model_type.to_string(),
        description: format!("{} 3D model", model_type),
    };

    let mut parts = Vec::new();
    for (i, name) in model.part_file_names.unwrap_or_default().into_iter().enumerate() {
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        check_optional("part file name", Some(&name), 200)?;
        parts.push(NewModelPart {
            part_file_name: name,
            part_index: index_to_i32(i)?,
            part_type: PART_TYPE.to_string(),
            description: format!("{} part {}", model_type, i + 1),
        });
    }

    let db = model.db.unwrap_or_default();
    let mut data = Vec::new();
    for (data_type, values) in [
        (ModelDataType::ExternalId, db.external_ids),
        (ModelDataType::Category, db.categories),
        (ModelDataType::Type, db.types),
    ] {
        for (i, value) in values.unwrap_or_default().into_iter().enumerate() {
            let Some(value) = value_to_string(value) else {
                continue;
            };
            if value.chars().count() > MAX_EXTERNAL_ID_LEN {
                return Err(AppError::InvalidRequest(format!(
                    "{} entry {} is longer than {} characters",
                    data_type.as_str(),
                    i,
                    MAX_EXTERNAL_ID_LEN
                )));
            }
            data.push(NewModelData {
                data_type,
                data_key: i.to_string(),
                external_id: value,
            });
        }
    }

    Ok(ModelImportPlan { info, parts, data })
}

/// Load, plan and persist one descriptor, publishing progress through `status`.
pub async fn import_model(
    store: &dyn ModelStore,
    status: &ImportStatus,
    path: &Path,
    model_type: &str,
    model_name: &str,
) -> Result<ModelImportOutcome> {
    let result = run_import(store, status, path, model_type, model_name).await;
    match &result {
        Ok(outcome) => {
            status.set(format!(
                "Import completed: model {} with {} parts and {} data items",
                outcome.model_id, outcome.parts, outcome.data_items
            ));
            info!(
                model_id = outcome.model_id,
                parts = outcome.parts,
                data_items = outcome.data_items,
                path = %path.display(),
                "Model imported"
            );
        }
        Err(e) => {
            status.set(format!("Import failed: {}", e));
            error!(error = %e, path = %path.display(), "Model import failed");
        }
    }
    result
}

/// Row counts written by a successful import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelImportOutcome {
    pub model_id: i32,
    pub parts: usize,
    pub data_items: usize,
}

async fn run_import(
    store: &dyn ModelStore,
    status: &ImportStatus,
    path: &Path,
    model_type: &str,
    model_name: &str,
) -> Result<ModelImportOutcome> {
    status.set(format!("Reading {}", path.display()));
    let model = load_model_file(path).await?;

    status.set("Preparing model rows");
    let plan = plan_import(model, model_type, model_name, Utc::now())?;

    status.set(format!(
        "Saving model with {} parts and {} data items",
        plan.parts.len(),
        plan.data.len()
    ));
    let model_id = store.insert_model(&plan).await?;

    Ok(ModelImportOutcome {
        model_id,
        parts: plan.parts.len(),
        data_items: plan.data.len(),
    })
}

fn check_optional(field: &str, value: Option<&str>, max_len: usize) -> Result<()> {
    match value {
        Some(v) if v.chars().count() > max_len => Err(AppError::InvalidRequest(format!(
            "{} must be at most {} characters",
            field, max_len
        ))),
        _ => Ok(()),
    }
}

/// Strings and numbers are stored as text; null and blank entries are skipped.
fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn index_to_i32(i: usize) -> Result<i32> {
    i32::try_from(i).map_err(|_| AppError::InvalidRequest("Too many model parts".into()))
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Exporters write either RFC 3339 or a zone-less local stamp; zone-less
/// stamps are taken as UTC. A missing stamp means "now".
fn parse_created(raw: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(now);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }

    Err(AppError::InvalidRequest(format!(
        "Unrecognised created timestamp: {}",
        raw
    )))
}
