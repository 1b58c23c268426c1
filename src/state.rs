//! Application state shared across handlers

use crate::db::Database;
use crate::services::model_import::ImportStatus;
use crate::tasks::sync::SyncStats;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, shared with the sync task
    pub db: Arc<Database>,
    /// Counters published by the sync task
    pub sync_stats: Arc<SyncStats>,
    /// Whether the sync task was started
    pub sync_enabled: bool,
    /// Progress of the most recent model import
    pub import_status: Arc<ImportStatus>,
}

impl AppState {
    pub fn new(db: Arc<Database>, sync_stats: Arc<SyncStats>, sync_enabled: bool) -> Self {
        Self {
            db,
            sync_stats,
            sync_enabled,
            import_status: Arc::new(ImportStatus::new()),
        }
    }
}
