//! In-memory reading store for tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use super::{ReadingStore, ReadingTable};
use crate::error::{AppError, Result};
use crate::models::{EnvironmentMeasurements, NewEnvironmentReading};

#[derive(Default)]
pub(crate) struct MemoryStore {
    environment: Mutex<Vec<NewEnvironmentReading>>,
    traffic: Mutex<Vec<DateTime<Utc>>>,
    weather: Mutex<Vec<NaiveDate>>,
    failing_tables: Mutex<HashSet<ReadingTable>>,
    fail_inserts: AtomicBool,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_environment(&self, device_id: i32, record_time: DateTime<Utc>) {
        self.environment.lock().push(NewEnvironmentReading {
            device_id,
            record_time,
            measurements: EnvironmentMeasurements::default(),
        });
    }

    pub fn seed_traffic(&self, record_time: DateTime<Utc>) {
        self.traffic.lock().push(record_time);
    }

    pub fn seed_weather(&self, record_date: NaiveDate) {
        self.weather.lock().push(record_date);
    }

    pub fn fail_table(&self, table: ReadingTable) {
        self.failing_tables.lock().insert(table);
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn environment_rows(&self) -> Vec<NewEnvironmentReading> {
        self.environment.lock().clone()
    }

    pub fn traffic_rows(&self) -> Vec<DateTime<Utc>> {
        self.traffic.lock().clone()
    }

    pub fn weather_rows(&self) -> Vec<NaiveDate> {
        self.weather.lock().clone()
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert_environment_readings(&self, readings: &[NewEnvironmentReading]) -> Result<u64> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError("simulated insert failure".into()));
        }
        self.environment.lock().extend_from_slice(readings);
        Ok(readings.len() as u64)
    }

    async fn delete_readings_before(
        &self,
        table: ReadingTable,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_tables.lock().contains(&table) {
            return Err(AppError::DatabaseError(format!(
                "simulated failure deleting from {}",
                table
            )));
        }

        let removed = match table {
            ReadingTable::Environment => {
                let mut rows = self.environment.lock();
                let before = rows.len();
                rows.retain(|r| r.record_time >= cutoff);
                before - rows.len()
            }
            ReadingTable::Traffic => {
                let mut rows = self.traffic.lock();
                let before = rows.len();
                rows.retain(|ts| *ts >= cutoff);
                before - rows.len()
            }
            ReadingTable::Weather => {
                let cutoff_date = cutoff.date_naive();
                let mut rows = self.weather.lock();
                let before = rows.len();
                rows.retain(|date| *date >= cutoff_date);
                before - rows.len()
            }
        };

        Ok(removed as u64)
    }
}
