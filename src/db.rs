//! Database access layer with SQLx and PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::models::{
    BuildingData, Device, DeviceRequest, DeviceStatus, EnvironmentMeasurements,
    EnvironmentReading, ModelDataItem, ModelInfo, ModelPart, NewEnvironmentReading,
    TrafficReading, WeatherReading,
};
use crate::services::model_import::{ModelImportPlan, ModelStore};
use crate::store::{ReadingStore, ReadingTable};

const DEVICE_COLUMNS: &str = r#"
    device_id, device_name, device_type, location, installation_date,
    status, last_maintenance_date, longitude, latitude, is_active
"#;

const ENVIRONMENT_COLUMNS: &str = r#"
    data_id, device_id, record_time, temperature, humidity, wind_speed,
    wind_direction, pm25, pm10, co2, noise
"#;

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Apply embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Migrations completed");
        Ok(())
    }

    /// Pool that connects on first use; lets handler tests build an `AppState`
    #[cfg(test)]
    pub(crate) fn connect_lazy(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy(connection_string)?;
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ---- devices -------------------------------------------------------

    /// List devices, optionally filtered by status and type
    pub async fn list_devices(
        &self,
        status: Option<DeviceStatus>,
        device_type: Option<&str>,
    ) -> Result<Vec<Device>> {
        let query = format!(
            r#"
            SELECT {DEVICE_COLUMNS}
            FROM devices
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR device_type = $2)
            ORDER BY device_id
            "#
        );

        let rows = sqlx::query(&query)
            .bind(status.map(status_to_string))
            .bind(device_type)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(device_from_row).collect())
    }

    pub async fn get_device(&self, device_id: i32) -> Result<Option<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = $1");

        let row = sqlx::query(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(device_from_row))
    }

    pub async fn create_device(&self, request: &DeviceRequest) -> Result<Device> {
        let query = format!(
            r#"
            INSERT INTO devices (
                device_name, device_type, location, installation_date,
                status, last_maintenance_date, longitude, latitude, is_active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(&request.device_name)
            .bind(&request.device_type)
            .bind(&request.location)
            .bind(request.installation_date.unwrap_or_else(Utc::now))
            .bind(status_to_string(request.status.unwrap_or(DeviceStatus::Normal)))
            .bind(request.last_maintenance_date)
            .bind(request.longitude)
            .bind(request.latitude)
            .bind(request.is_active.unwrap_or(true))
            .fetch_one(&self.pool)
            .await?;

        Ok(device_from_row(&row))
    }

    /// Replace a device's attributes; returns `None` if it does not exist
    pub async fn update_device(
        &self,
        device_id: i32,
        request: &DeviceRequest,
    ) -> Result<Option<Device>> {
        let query = format!(
            r#"
            UPDATE devices SET
                device_name = $2,
                device_type = $3,
                location = $4,
                installation_date = COALESCE($5, installation_date),
                status = COALESCE($6, status),
                last_maintenance_date = $7,
                longitude = $8,
                latitude = $9,
                is_active = COALESCE($10, is_active)
            WHERE device_id = $1
            RETURNING {DEVICE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(device_id)
            .bind(&request.device_name)
            .bind(&request.device_type)
            .bind(&request.location)
            .bind(request.installation_date)
            .bind(request.status.map(status_to_string))
            .bind(request.last_maintenance_date)
            .bind(request.longitude)
            .bind(request.latitude)
            .bind(request.is_active)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(device_from_row))
    }

    pub async fn update_device_status(
        &self,
        device_id: i32,
        status: DeviceStatus,
    ) -> Result<Option<Device>> {
        let query = format!(
            "UPDATE devices SET status = $2 WHERE device_id = $1 RETURNING {DEVICE_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(device_id)
            .bind(status_to_string(status))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(device_from_row))
    }

    /// Delete a device together with its readings. Returns false if it did not exist.
    pub async fn delete_device(&self, device_id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ---- environment readings -------------------------------------------

    /// Recent environment readings within an optional time range, newest first
    pub async fn list_environment(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<EnvironmentReading>> {
        let query = format!(
            r#"
            SELECT {ENVIRONMENT_COLUMNS}
            FROM environment_data
            WHERE ($1::timestamptz IS NULL OR record_time >= $1)
              AND ($2::timestamptz IS NULL OR record_time <= $2)
            ORDER BY record_time DESC
            LIMIT $3
            "#
        );

        let rows = sqlx::query(&query)
            .bind(from)
            .bind(to)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(environment_from_row).collect())
    }

    pub async fn environment_by_device(
        &self,
        device_id: i32,
        limit: i64,
    ) -> Result<Vec<EnvironmentReading>> {
        let query = format!(
            r#"
            SELECT {ENVIRONMENT_COLUMNS}
            FROM environment_data
            WHERE device_id = $1
            ORDER BY record_time DESC
            LIMIT $2
            "#
        );

        let rows = sqlx::query(&query)
            .bind(device_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(environment_from_row).collect())
    }

    pub async fn latest_environment(&self, device_id: i32) -> Result<Option<EnvironmentReading>> {
        let query = format!(
            r#"
            SELECT {ENVIRONMENT_COLUMNS}
            FROM environment_data
            WHERE device_id = $1
            ORDER BY record_time DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(environment_from_row))
    }

    /// Insert a single reading and return it with its generated id
    pub async fn insert_environment(
        &self,
        reading: &NewEnvironmentReading,
    ) -> Result<EnvironmentReading> {
        let query = format!(
            r#"
            INSERT INTO environment_data (
                device_id, record_time, temperature, humidity, wind_speed,
                wind_direction, pm25, pm10, co2, noise
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {ENVIRONMENT_COLUMNS}
            "#
        );

        let m = &reading.measurements;
        let row = sqlx::query(&query)
            .bind(reading.device_id)
            .bind(reading.record_time)
            .bind(m.temperature)
            .bind(m.humidity)
            .bind(m.wind_speed)
            .bind(m.wind_direction.as_deref())
            .bind(m.pm25)
            .bind(m.pm10)
            .bind(m.co2)
            .bind(m.noise)
            .fetch_one(&self.pool)
            .await?;

        Ok(environment_from_row(&row))
    }

    // ---- traffic & weather ----------------------------------------------

    pub async fn recent_traffic(&self, limit: i64) -> Result<Vec<TrafficReading>> {
        let rows = sqlx::query(
            r#"
            SELECT traffic_id, device_id, record_time, traffic_flow, average_speed,
                   congestion_level, vehicle_type_distribution
            FROM traffic_data
            ORDER BY record_time DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let readings = rows
            .into_iter()
            .map(|row| TrafficReading {
                traffic_id: row.get("traffic_id"),
                device_id: row.get("device_id"),
                record_time: row.get("record_time"),
                traffic_flow: row.get("traffic_flow"),
                average_speed: row.get("average_speed"),
                congestion_level: row.get("congestion_level"),
                vehicle_type_distribution: row.get("vehicle_type_distribution"),
            })
            .collect();

        Ok(readings)
    }

    pub async fn recent_weather(&self, limit: i64) -> Result<Vec<WeatherReading>> {
        let rows = sqlx::query(
            r#"
            SELECT weather_id, record_date, record_time, temperature, humidity,
                   wind_speed, wind_direction, weather_condition, precipitation,
                   uv_index, air_quality_index, weather_source
            FROM weather_data
            ORDER BY record_date DESC, record_time DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let readings = rows
            .into_iter()
            .map(|row| WeatherReading {
                weather_id: row.get("weather_id"),
                record_date: row.get("record_date"),
                record_time: row.get("record_time"),
                temperature: row.get("temperature"),
                humidity: row.get("humidity"),
                wind_speed: row.get("wind_speed"),
                wind_direction: row.get("wind_direction"),
                weather_condition: row.get("weather_condition"),
                precipitation: row.get("precipitation"),
                uv_index: row.get("uv_index"),
                air_quality_index: row.get("air_quality_index"),
                weather_source: row.get("weather_source"),
            })
            .collect();

        Ok(readings)
    }

    // ---- building models ------------------------------------------------

    /// Most recently imported model with this name, with its parts and data
    pub async fn building_data(&self, model_name: &str) -> Result<Option<BuildingData>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT model_id, model_name, version, created_date, copyright,
                   schema, model_type, description
            FROM model_info
            WHERE model_name = $1
            ORDER BY model_id DESC
            LIMIT 1
            "#,
        )
        .bind(model_name)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let info = ModelInfo {
            model_id: row.get("model_id"),
            model_name: row.get("model_name"),
            version: row.get("version"),
            created_date: row.get("created_date"),
            copyright: row.get("copyright"),
            schema: row.get("schema"),
            model_type: row.get("model_type"),
            description: row.get("description"),
        };

        let model_parts = sqlx::query(
            r#"
            SELECT part_id, part_file_name, part_index, part_type, description
            FROM model_parts
            WHERE model_id = $1
            ORDER BY part_index
            "#,
        )
        .bind(info.model_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| ModelPart {
            part_id: row.get("part_id"),
            part_file_name: row.get("part_file_name"),
            part_index: row.get("part_index"),
            part_type: row.get("part_type"),
            description: row.get("description"),
        })
        .collect();

        let model_datas = sqlx::query(
            r#"
            SELECT data_id, data_type, data_key, external_id
            FROM model_data
            WHERE model_id = $1
            ORDER BY data_id
            "#,
        )
        .bind(info.model_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| ModelDataItem {
            data_id: row.get("data_id"),
            data_type: row.get("data_type"),
            data_key: row.get("data_key"),
            external_id: row.get("external_id"),
        })
        .collect();

        Ok(Some(BuildingData {
            info,
            model_parts,
            model_datas,
        }))
    }
}

#[async_trait]
impl ModelStore for Database {
    /// Model info, parts and data land together or not at all
    async fn insert_model(&self, plan: &ModelImportPlan) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let info = &plan.info;
        let row = sqlx::query(
            r#"
            INSERT INTO model_info (
                model_name, version, created_date, copyright, schema, model_type, description
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING model_id
            "#,
        )
        .bind(&info.model_name)
        .bind(&info.version)
        .bind(info.created_date)
        .bind(&info.copyright)
        .bind(&info.schema)
        .bind(&info.model_type)
        .bind(&info.description)
        .fetch_one(&mut *tx)
        .await?;
        let model_id: i32 = row.get("model_id");

        if !plan.parts.is_empty() {
            let file_names: Vec<&str> = plan.parts.iter().map(|p| p.part_file_name.as_str()).collect();
            let indexes: Vec<i32> = plan.parts.iter().map(|p| p.part_index).collect();
            let part_types: Vec<&str> = plan.parts.iter().map(|p| p.part_type.as_str()).collect();
            let descriptions: Vec<&str> = plan.parts.iter().map(|p| p.description.as_str()).collect();

            sqlx::query(
                r#"
                INSERT INTO model_parts (model_id, part_file_name, part_index, part_type, description)
                SELECT $1::int4, * FROM UNNEST($2::text[], $3::int4[], $4::text[], $5::text[])
                "#,
            )
            .bind(model_id)
            .bind(&file_names)
            .bind(&indexes)
            .bind(&part_types)
            .bind(&descriptions)
            .execute(&mut *tx)
            .await?;
        }

        if !plan.data.is_empty() {
            let data_types: Vec<&str> = plan.data.iter().map(|d| d.data_type.as_str()).collect();
            let keys: Vec<&str> = plan.data.iter().map(|d| d.data_key.as_str()).collect();
            let values: Vec<&str> = plan.data.iter().map(|d| d.external_id.as_str()).collect();

            sqlx::query(
                r#"
                INSERT INTO model_data (model_id, data_type, data_key, external_id)
                SELECT $1::int4, * FROM UNNEST($2::text[], $3::text[], $4::text[])
                "#,
            )
            .bind(model_id)
            .bind(&data_types)
            .bind(&keys)
            .bind(&values)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(model_id)
    }
}

#[async_trait]
impl ReadingStore for Database {
    /// Batch insert through UNNEST so the whole fetch lands in one statement
    async fn insert_environment_readings(&self, readings: &[NewEnvironmentReading]) -> Result<u64> {
        if readings.is_empty() {
            return Ok(0);
        }

        let device_ids: Vec<i32> = readings.iter().map(|r| r.device_id).collect();
        let record_times: Vec<DateTime<Utc>> = readings.iter().map(|r| r.record_time).collect();
        let temperatures: Vec<Option<f64>> =
            readings.iter().map(|r| r.measurements.temperature).collect();
        let humidities: Vec<Option<f64>> =
            readings.iter().map(|r| r.measurements.humidity).collect();
        let wind_speeds: Vec<Option<f64>> =
            readings.iter().map(|r| r.measurements.wind_speed).collect();
        let wind_directions: Vec<Option<String>> = readings
            .iter()
            .map(|r| r.measurements.wind_direction.clone())
            .collect();
        let pm25s: Vec<Option<f64>> = readings.iter().map(|r| r.measurements.pm25).collect();
        let pm10s: Vec<Option<f64>> = readings.iter().map(|r| r.measurements.pm10).collect();
        let co2s: Vec<Option<f64>> = readings.iter().map(|r| r.measurements.co2).collect();
        let noises: Vec<Option<f64>> = readings.iter().map(|r| r.measurements.noise).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO environment_data (
                device_id, record_time, temperature, humidity, wind_speed,
                wind_direction, pm25, pm10, co2, noise
            )
            SELECT * FROM UNNEST(
                $1::int4[], $2::timestamptz[], $3::float8[], $4::float8[], $5::float8[],
                $6::text[], $7::float8[], $8::float8[], $9::float8[], $10::float8[]
            )
            "#,
        )
        .bind(&device_ids)
        .bind(&record_times)
        .bind(&temperatures)
        .bind(&humidities)
        .bind(&wind_speeds)
        .bind(&wind_directions)
        .bind(&pm25s)
        .bind(&pm10s)
        .bind(&co2s)
        .bind(&noises)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_readings_before(
        &self,
        table: ReadingTable,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = match table {
            ReadingTable::Environment => {
                sqlx::query("DELETE FROM environment_data WHERE record_time < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            ReadingTable::Traffic => {
                sqlx::query("DELETE FROM traffic_data WHERE record_time < $1")
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?
            }
            ReadingTable::Weather => {
                sqlx::query("DELETE FROM weather_data WHERE record_date < $1")
                    .bind(cutoff.date_naive())
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected())
    }
}

fn device_from_row(row: &PgRow) -> Device {
    let status: String = row.get("status");
    Device {
        device_id: row.get("device_id"),
        device_name: row.get("device_name"),
        device_type: row.get("device_type"),
        location: row.get("location"),
        installation_date: row.get("installation_date"),
        status: string_to_status(&status),
        last_maintenance_date: row.get("last_maintenance_date"),
        longitude: row.get("longitude"),
        latitude: row.get("latitude"),
        is_active: row.get("is_active"),
    }
}

fn environment_from_row(row: &PgRow) -> EnvironmentReading {
    EnvironmentReading {
        data_id: row.get("data_id"),
        device_id: row.get("device_id"),
        record_time: row.get("record_time"),
        measurements: EnvironmentMeasurements {
            temperature: row.get("temperature"),
            humidity: row.get("humidity"),
            wind_speed: row.get("wind_speed"),
            wind_direction: row.get("wind_direction"),
            pm25: row.get("pm25"),
            pm10: row.get("pm10"),
            co2: row.get("co2"),
            noise: row.get("noise"),
        },
    }
}

/// Convert DeviceStatus to database string
fn status_to_string(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Normal => "normal",
        DeviceStatus::Faulty => "faulty",
        DeviceStatus::Maintenance => "maintenance",
    }
}

/// Convert database string to DeviceStatus
fn string_to_status(s: &str) -> DeviceStatus {
    match s {
        "normal" => DeviceStatus::Normal,
        "maintenance" => DeviceStatus::Maintenance,
        _ => DeviceStatus::Faulty,
    }
}
