//! Adapter for the external environment data source

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{AppError, Result};
use crate::models::{validate_wind_direction, EnvironmentMeasurements, NewEnvironmentReading};

/// Source of environment readings pulled by the sync task.
///
/// Implementations never fail: any problem is logged and reported as an empty batch.
#[async_trait]
pub trait ExternalSource: Send + Sync {
    async fn fetch_environment_readings(&self) -> Vec<NewEnvironmentReading>;
}

/// A record as published by the external source
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEnvironmentRecord {
    pub device_id: i32,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub wind_speed: Option<f64>,
    #[serde(default)]
    pub wind_direction: Option<String>,
    #[serde(default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub pm10: Option<f64>,
    #[serde(default)]
    pub co2: Option<f64>,
    #[serde(default)]
    pub noise: Option<f64>,
}

impl ExternalEnvironmentRecord {
    fn into_reading(self, record_time: DateTime<Utc>) -> NewEnvironmentReading {
        NewEnvironmentReading {
            device_id: self.device_id,
            record_time,
            measurements: EnvironmentMeasurements {
                temperature: self.temperature,
                humidity: self.humidity,
                wind_speed: self.wind_speed,
                wind_direction: self.wind_direction,
                pm25: self.pm25,
                pm10: self.pm10,
                co2: self.co2,
                noise: self.noise,
            },
        }
    }
}

/// Stamp every record with `now`. Source-side timestamps are not trusted.
pub fn normalize_records(
    records: Vec<ExternalEnvironmentRecord>,
    now: DateTime<Utc>,
) -> Vec<NewEnvironmentReading> {
    records.into_iter().map(|r| r.into_reading(now)).collect()
}

/// Parse a response body. `null` is treated as an empty batch; anything
/// malformed, including a value that would not fit its column, rejects the
/// whole batch.
pub fn parse_records(body: &[u8]) -> Result<Vec<ExternalEnvironmentRecord>> {
    let records: Option<Vec<ExternalEnvironmentRecord>> = serde_json::from_slice(body)
        .map_err(|e| AppError::Fetch(format!("Malformed payload: {}", e)))?;
    let records = records.unwrap_or_default();

    for (i, record) in records.iter().enumerate() {
        validate_wind_direction(record.wind_direction.as_deref())
            .map_err(|e| AppError::Fetch(format!("Malformed payload: record {}: {}", i, e)))?;
    }
    Ok(records)
}

/// Fetches readings over HTTP from a fixed URL
pub struct HttpExternalSource {
    client: reqwest::Client,
    url: String,
}

impl HttpExternalSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn try_fetch(&self) -> Result<Vec<NewEnvironmentReading>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        let records = parse_records(&body)?;

        Ok(normalize_records(records, Utc::now()))
    }
}

#[async_trait]
impl ExternalSource for HttpExternalSource {
    async fn fetch_environment_readings(&self) -> Vec<NewEnvironmentReading> {
        match self.try_fetch().await {
            Ok(readings) => {
                debug!(url = %self.url, count = readings.len(), "Fetched external readings");
                readings
            }
            Err(e) => {
                error!(error = %e, url = %self.url, "Failed to fetch external readings");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio::net::TcpListener;

    /// Serve `router` on an ephemeral port and return the feed URL.
    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/feed", addr)
    }

    fn source(url: String) -> HttpExternalSource {
        HttpExternalSource::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_maps_records_and_stamps_now() {
        let body = r#"[
            {"deviceId": 1, "temperature": 20.0, "humidity": 45, "windDirection": "N"},
            {"deviceId": 2, "temperature": 21.5, "pm25": 12.3, "co2": 410},
            {"deviceId": 3, "temperature": null, "noise": 55.2}
        ]"#;
        let url = serve(Router::new().route("/feed", get(move || async move { body }))).await;

        let before = Utc::now();
        let readings = source(url).fetch_environment_readings().await;
        let after = Utc::now();

        assert_eq!(readings.len(), 3);
        assert_eq!(
            readings.iter().map(|r| r.device_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(readings[0].measurements.temperature, Some(20.0));
        assert_eq!(readings[0].measurements.humidity, Some(45.0));
        assert_eq!(readings[0].measurements.wind_direction.as_deref(), Some("N"));
        assert_eq!(readings[1].measurements.temperature, Some(21.5));
        assert_eq!(readings[1].measurements.co2, Some(410.0));
        assert_eq!(readings[2].measurements.temperature, None);
        assert_eq!(readings[2].measurements.noise, Some(55.2));

        for reading in &readings {
            assert!(reading.record_time >= before && reading.record_time <= after);
        }
    }

    #[tokio::test]
    async fn test_error_status_degrades_to_empty() {
        let url = serve(Router::new().route(
            "/feed",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
        ))
        .await;

        assert!(source(url).fetch_environment_readings().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_discards_batch() {
        // Second record is missing its device id.
        let body = r#"[{"deviceId": 1, "temperature": 20.0}, {"temperature": 19.0}]"#;
        let url = serve(Router::new().route("/feed", get(move || async move { body }))).await;

        assert!(source(url).fetch_environment_readings().await.is_empty());
    }

    #[tokio::test]
    async fn test_null_body_is_empty_batch() {
        let url = serve(Router::new().route("/feed", get(|| async { "null" }))).await;

        assert!(source(url).fetch_environment_readings().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_degrades_to_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let readings = source(format!("http://{}/feed", addr))
            .fetch_environment_readings()
            .await;
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_empty() {
        let url = serve(Router::new().route(
            "/feed",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "[]"
            }),
        ))
        .await;

        let slow = HttpExternalSource::new(url, Duration::from_millis(100)).unwrap();
        assert!(slow.fetch_environment_readings().await.is_empty());
    }

    #[test]
    fn test_parse_records_rejects_non_array() {
        assert!(matches!(
            parse_records(br#"{"deviceId": 1}"#),
            Err(AppError::Fetch(_))
        ));
        assert!(parse_records(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_records_rejects_long_wind_direction() {
        let body = br#"[
            {"deviceId": 1, "windDirection": "NE"},
            {"deviceId": 2, "windDirection": "north-north-east-by-east"}
        ]"#;
        assert!(matches!(parse_records(body), Err(AppError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_long_wind_direction_discards_batch() {
        let body = r#"[{"deviceId": 1, "windDirection": "N"}, {"deviceId": 2, "windDirection": "xxxxxxxxxxxxxxxxxxxxx"}]"#;
        let url = serve(Router::new().route("/feed", get(move || async move { body }))).await;

        assert!(source(url).fetch_environment_readings().await.is_empty());
    }

    #[test]
    fn test_normalize_uses_given_time() {
        let records = parse_records(br#"[{"deviceId": 7, "windSpeed": 3.4}]"#).unwrap();
        let now = Utc::now();
        let readings = normalize_records(records, now);

        assert_eq!(readings[0].record_time, now);
        assert_eq!(readings[0].measurements.wind_speed, Some(3.4));
    }
}
