use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

pub const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough records pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maintain(&engine, threshold).await {
            warn!(business_id = %engine.business_id, "compaction failed: {e}");
        }
    }
}

/// One housekeeping pass: drop an abandoned notification channel, then
/// compact if due.
pub async fn maintain(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    engine.notify.prune(&engine.business_id);
    compact_if_due(engine, threshold).await
}

/// Compact when at least `threshold` records were appended since the last
/// compaction. Returns whether it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(business_id = %engine.business_id, appends, "compaction not due");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(business_id = %engine.business_id, appends, "compacted WAL");
    Ok(true)
}
