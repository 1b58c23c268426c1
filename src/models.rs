//! Core domain models for campus monitoring

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Operational status of a monitoring device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Device is reporting normally
    Normal,
    /// Device is reporting errors or has stopped reporting
    Faulty,
    /// Device is taken out of service for maintenance
    Maintenance,
}

/// A monitoring device installed on campus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: i32,
    pub device_name: String,
    /// Free-form category, e.g. "environment" or "traffic"
    pub device_type: String,
    pub location: String,
    pub installation_date: DateTime<Utc>,
    pub status: DeviceStatus,
    pub last_maintenance_date: Option<DateTime<Utc>>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub is_active: bool,
}

/// Request payload for creating or replacing a device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRequest {
    pub device_name: String,
    pub device_type: String,
    pub location: String,
    /// Defaults to the time of the request
    pub installation_date: Option<DateTime<Utc>>,
    /// Defaults to `normal`
    pub status: Option<DeviceStatus>,
    pub last_maintenance_date: Option<DateTime<Utc>>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    /// Defaults to `true`
    pub is_active: Option<bool>,
}

impl DeviceRequest {
    /// Check required fields and column limits before hitting the database.
    pub fn validate(&self) -> Result<()> {
        check_required("device_name", &self.device_name, 100)?;
        check_required("device_type", &self.device_type, 50)?;
        check_required("location", &self.location, 200)?;

        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(AppError::InvalidRequest(format!(
                    "longitude {} out of range",
                    lon
                )));
            }
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(AppError::InvalidRequest(format!(
                    "latitude {} out of range",
                    lat
                )));
            }
        }
        Ok(())
    }
}

/// Request payload for `PATCH /api/devices/:id/status`
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStatusUpdate {
    pub status: DeviceStatus,
}

/// Measurement columns shared by stored and incoming environment readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentMeasurements {
    /// Degrees Celsius
    pub temperature: Option<f64>,
    /// Relative humidity in percent
    pub humidity: Option<f64>,
    /// Metres per second
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<String>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub co2: Option<f64>,
    /// Decibels
    pub noise: Option<f64>,
}

impl EnvironmentMeasurements {
    pub fn validate(&self) -> Result<()> {
        validate_wind_direction(self.wind_direction.as_deref())
    }
}

/// `wind_direction` is stored as `VARCHAR(20)`
pub fn validate_wind_direction(direction: Option<&str>) -> Result<()> {
    match direction {
        Some(d) if d.chars().count() > 20 => Err(AppError::InvalidRequest(
            "wind_direction must be at most 20 characters".into(),
        )),
        _ => Ok(()),
    }
}

/// An environment reading that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEnvironmentReading {
    pub device_id: i32,
    pub record_time: DateTime<Utc>,
    #[serde(flatten)]
    pub measurements: EnvironmentMeasurements,
}

/// A persisted environment reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentReading {
    pub data_id: i64,
    pub device_id: i32,
    pub record_time: DateTime<Utc>,
    #[serde(flatten)]
    pub measurements: EnvironmentMeasurements,
}

/// Request payload for direct environment writes
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentWriteRequest {
    pub device_id: i32,
    /// Defaults to the time the request is handled
    pub record_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub measurements: EnvironmentMeasurements,
}

impl EnvironmentWriteRequest {
    pub fn into_reading(self, now: DateTime<Utc>) -> Result<NewEnvironmentReading> {
        self.measurements.validate()?;
        Ok(NewEnvironmentReading {
            device_id: self.device_id,
            record_time: self.record_time.unwrap_or(now),
            measurements: self.measurements,
        })
    }
}

/// A persisted traffic reading
#[derive(Debug, Clone, Serialize)]
pub struct TrafficReading {
    pub traffic_id: i64,
    pub device_id: i32,
    pub record_time: DateTime<Utc>,
    /// Vehicles counted in the sampling window
    pub traffic_flow: Option<i32>,
    pub average_speed: Option<f64>,
    pub congestion_level: Option<String>,
    /// JSON-encoded distribution of vehicle types
    pub vehicle_type_distribution: Option<String>,
}

/// A persisted weather observation. Weather is campus-wide and carries no device.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherReading {
    pub weather_id: i64,
    pub record_date: NaiveDate,
    pub record_time: NaiveTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<String>,
    pub weather_condition: Option<String>,
    pub precipitation: Option<f64>,
    pub uv_index: Option<i32>,
    pub air_quality_index: Option<i32>,
    pub weather_source: Option<String>,
}

/// Basic information about an imported 3D building model
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_id: i32,
    pub model_name: String,
    pub version: String,
    pub created_date: DateTime<Utc>,
    pub copyright: Option<String>,
    pub schema: Option<String>,
    pub model_type: String,
    pub description: Option<String>,
}

/// One geometry chunk of a model
#[derive(Debug, Clone, Serialize)]
pub struct ModelPart {
    pub part_id: i32,
    pub part_file_name: String,
    /// Position in the source `partFileNames` array
    pub part_index: i32,
    pub part_type: Option<String>,
    pub description: Option<String>,
}

/// One element of the model property database (external id, category or type)
#[derive(Debug, Clone, Serialize)]
pub struct ModelDataItem {
    pub data_id: i32,
    pub data_type: String,
    /// Index of the element in its source array
    pub data_key: String,
    pub external_id: String,
}

/// Everything the front-end needs to render and annotate a building
#[derive(Debug, Clone, Serialize)]
pub struct BuildingData {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub model_parts: Vec<ModelPart>,
    pub model_datas: Vec<ModelDataItem>,
}

pub(crate) fn check_required(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidRequest(format!("{} is required", field)));
    }
    if value.chars().count() > max_len {
        return Err(AppError::InvalidRequest(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}
