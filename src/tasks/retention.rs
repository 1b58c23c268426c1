//! Retention sweep - purges readings older than the retention window

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, info, warn};

use crate::shutdown::ShutdownListener;
use crate::store::{ReadingStore, ReadingTable};

/// Delete readings older than `retention` from all three reading tables.
///
/// The cutoff is computed once so every table is swept against the same instant.
/// Returns the number of rows removed.
pub async fn purge_expired_readings(
    store: &dyn ReadingStore,
    retention: TimeDelta,
    shutdown: &ShutdownListener,
) -> u64 {
    let cutoff = Utc::now() - retention;
    purge_readings_before(store, cutoff, shutdown).await
}

/// Delete readings recorded before `cutoff` from every reading table.
///
/// A table that fails is logged and skipped; the others are still swept and
/// the returned count covers only what was actually deleted. Shutdown is
/// checked between tables, never in the middle of a delete.
pub async fn purge_readings_before(
    store: &dyn ReadingStore,
    cutoff: DateTime<Utc>,
    shutdown: &ShutdownListener,
) -> u64 {
    let mut total = 0u64;
    let mut failed = 0usize;

    for table in ReadingTable::ALL {
        if shutdown.is_triggered() {
            warn!(table = %table, "Shutdown requested, skipping remaining retention sweep");
            break;
        }

        match store.delete_readings_before(table, cutoff).await {
            Ok(deleted) => {
                debug!(table = %table, deleted = deleted, "Swept reading table");
                total += deleted;
            }
            Err(e) => {
                failed += 1;
                error!(error = %e, table = %table, cutoff = %cutoff, "Failed to purge expired readings");
            }
        }
    }

    if total > 0 {
        info!(deleted = total, cutoff = %cutoff, failed_tables = failed, "Pruned expired readings");
    } else {
        debug!(cutoff = %cutoff, failed_tables = failed, "No expired readings to prune");
    }

    total
}
