//! Storage seam used by the background sync task.
//!
//! [`crate::db::Database`] is the production implementation. Tests drive the
//! sync loop and retention sweep against an in-memory store instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::NewEnvironmentReading;

#[cfg(test)]
pub(crate) mod memory;

/// The three time-series tables subject to retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingTable {
    Environment,
    Traffic,
    Weather,
}

impl ReadingTable {
    /// Sweep order used by the retention routine
    pub const ALL: [ReadingTable; 3] = [
        ReadingTable::Environment,
        ReadingTable::Traffic,
        ReadingTable::Weather,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingTable::Environment => "environment_data",
            ReadingTable::Traffic => "traffic_data",
            ReadingTable::Weather => "weather_data",
        }
    }
}

impl std::fmt::Display for ReadingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert all readings in one round trip and return the number of rows written.
    async fn insert_environment_readings(&self, readings: &[NewEnvironmentReading]) -> Result<u64>;

    /// Delete every row of `table` recorded before `cutoff`, returning the number removed.
    ///
    /// Weather rows only carry a date, so they are compared against the date of `cutoff`.
    async fn delete_readings_before(&self, table: ReadingTable, cutoff: DateTime<Utc>)
        -> Result<u64>;
}
