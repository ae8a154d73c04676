use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::compactor;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::notify::NotifyHub;

/// Per-business engines. Each business gets its own Engine + WAL + compactor,
/// created on first use.
pub struct TenantManager {
    engines: DashMap<Ulid, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    catalog: Arc<dyn Catalog>,
    notify: Arc<NotifyHub>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            catalog,
            notify: Arc::new(NotifyHub::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Engine of a catalogued business. Unknown businesses fail with
    /// `NotFound` before anything touches the disk.
    pub async fn get_or_create(&self, business_id: Ulid) -> Result<Arc<Engine>, EngineError> {
        if let Some(engine) = self.engines.get(&business_id) {
            return Ok(engine.value().clone());
        }
        if self.catalog.business(business_id).await?.is_none() {
            return Err(EngineError::not_found("business", business_id));
        }

        let engine = match self.engines.entry(business_id) {
            Entry::Occupied(existing) => return Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                if self.engines.len() >= MAX_TENANTS {
                    return Err(EngineError::LimitExceeded("too many tenants"));
                }
                // ULIDs are Crockford base32, safe as file names.
                let wal_path = self.data_dir.join(format!("{business_id}.wal"));
                let engine = Engine::new(business_id, wal_path, self.catalog.clone(), self.notify.clone())
                    .map(Arc::new)
                    .map_err(|e| EngineError::WalError(e.to_string()))?;
                slot.insert(engine.clone());
                engine
            }
        };

        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(%business_id, "tenant loaded");
        Ok(engine)
    }
}
