mod actions;
mod appointments;
mod availability;
mod conflict;
mod error;
pub mod lifecycle;
mod queries;
#[cfg(test)]
mod tests;

pub use actions::{ActionAcceptance, NewAction};
pub use appointments::NewAppointment;
pub use availability::{Slot, SlotQuery, candidate_starts, generate_slots, local_to_ms, windows_for_date};
pub use conflict::overlaps;
pub use error::EngineError;
pub use queries::AppointmentFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::catalog::{Business, Catalog, Service};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

type AppendResponse = oneshot::Sender<io::Result<()>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: AppendResponse,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// Every append that is already queued when the first one arrives joins its
/// batch; the batch costs a single fsync. A non-append command ends the batch
/// and runs after it has been flushed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, AppendResponse)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so partially buffered bytes don't
    // leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn respond_batch(batch: Vec<(Event, AppendResponse)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let batch = vec![(event, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// Booking engine of one business. All appointments and actions of the
/// business sit behind a single lock, so a conflict check and the write
/// it guards are one atomic step.
pub struct Engine {
    pub business_id: Ulid,
    pub(super) ledger: RwLock<Ledger>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) catalog: Arc<dyn Catalog>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(
        business_id: Ulid,
        wal_path: PathBuf,
        catalog: Arc<dyn Catalog>,
        notify: Arc<NotifyHub>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let mut ledger = Ledger::new(business_id);
        for event in &events {
            ledger.apply(event);
        }
        tracing::debug!(%business_id, replayed = events.len(), "ledger restored");

        Ok(Self {
            business_id,
            ledger: RwLock::new(ledger),
            wal_tx,
            catalog,
            notify,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify. The caller holds the write lock.
    pub(super) async fn persist_and_apply(&self, ledger: &mut Ledger, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        ledger.apply(&event);
        self.notify.send(self.business_id, &event);
        Ok(())
    }

    pub(super) async fn business(&self) -> Result<Business, EngineError> {
        self.catalog
            .business(self.business_id)
            .await?
            .ok_or(EngineError::not_found("business", self.business_id))
    }

    /// Active service of this business.
    pub(super) async fn active_service(&self, service_id: Ulid) -> Result<Service, EngineError> {
        self.catalog
            .service(self.business_id, service_id)
            .await?
            .filter(|s| s.active)
            .ok_or(EngineError::not_found("service", service_id))
    }

    /// Rewrite the WAL as one record per appointment and action.
    ///
    /// Writers append while holding the write lock, so holding the read lock
    /// until the swap is done keeps the snapshot and the log in step.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let ledger = self.ledger.read().await;
        let events: Vec<Event> = ledger
            .appointments()
            .map(|a| Event::AppointmentBooked { appointment: a.clone() })
            .chain(ledger.actions().map(|a| Event::ActionRecorded { action: a.clone() }))
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(ledger);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Reject over-long free text.
pub(super) fn check_len(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}
