mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::ConflictCheck;
pub use error::{EngineError, ErrorBody, ErrorKind, ReservationConflict};
pub use store::ReservationStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};

use crate::compactor;
use crate::config::Config;
use crate::directory::TestDirectory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSchedule = Arc<RwLock<DeviceSchedule>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
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
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    let err = match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => e,
        (None, None) => return Ok(()),
    };
    // Every sender gets the error, so none of the batch may survive on disk.
    if let Err(rollback_err) = wal.rollback() {
        tracing::error!("WAL rollback after failed batch failed: {rollback_err}");
    }
    Err(err)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
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

/// The reservation manager.
///
/// Owns the interval store, the WAL writer channel, the notify hub and the
/// test directory. Every mutation is WAL-appended before it is applied.
pub struct Engine {
    pub(super) store: Arc<ReservationStore>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn TestDirectory>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can slip between the snapshot and the WAL swap. A commit task
    /// that outlives its caller still holds the device lock, so the snapshot
    /// waits for it.
    pub(super) compaction_gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn TestDirectory>,
    ) -> io::Result<Self> {
        Self::with_channel_capacity(wal_path, notify, directory, 4096)
    }

    pub fn with_channel_capacity(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn TestDirectory>,
        channel_capacity: usize,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(channel_capacity.max(1));
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Arc::new(ReservationStore::new()),
            wal_tx,
            notify,
            directory,
            compaction_gate: RwLock::new(()),
        };

        // Sole owner of every schedule during replay, so try_write never contends.
        // Never block here: this may run inside an async context.
        let mut skipped = 0;
        for event in &events {
            let schedule = engine.store.get_or_create_schedule(event.device_id());
            let mut guard = schedule
                .try_write()
                .expect("replay: uncontended write");
            if let Err(e) = conflict::admit_replayed(&guard, event) {
                warn!("replay skipped {event:?}: {e}");
                skipped += 1;
                continue;
            }
            engine.store.apply_event(&mut guard, event);
        }

        let active = engine.store.reservation_count();
        metrics::gauge!(crate::observability::RESERVATIONS_ACTIVE).set(active as f64);
        info!(
            "replayed {} events ({skipped} skipped) from {}: {active} active reservations",
            events.len(),
            wal_path.display()
        );
        Ok(engine)
    }

    /// Open the engine described by `config` and start its compactor.
    pub fn open(config: &Config, directory: Arc<dyn TestDirectory>) -> io::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let engine = Arc::new(Self::with_channel_capacity(
            config.wal_path(),
            Arc::new(NotifyHub::new()),
            directory,
            config.wal_channel_capacity,
        )?);

        let compactor_engine = engine.clone();
        let threshold = config.compact_threshold;
        let interval = config.compact_interval;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold, interval).await;
        });

        info!("labres engine open, data_dir: {}", config.data_dir.display());
        Ok(engine)
    }

    /// The interval store backing this engine.
    pub fn store(&self) -> &ReservationStore {
        &self.store
    }

    /// WAL-append + apply + notify.
    ///
    /// Runs on its own task holding the device lock, so once the append is
    /// sent the apply happens even if the caller is dropped. Hands the lock
    /// back on success.
    pub(super) async fn persist_and_apply(
        &self,
        mut guard: OwnedRwLockWriteGuard<DeviceSchedule>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<DeviceSchedule>, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let store = self.store.clone();
        let notify = self.notify.clone();
        let commit = tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            store.apply_event(&mut guard, &event);
            notify.send(guard.device_id, &event);
            Ok::<_, EngineError>(guard)
        });
        commit
            .await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// Lookup reservation → device, acquire the device write lock.
    /// The caller re-checks that the reservation is still on the schedule.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &ReservationId,
    ) -> Result<OwnedRwLockWriteGuard<DeviceSchedule>, EngineError> {
        let device_id = self
            .store
            .device_for_reservation(id)
            .ok_or(EngineError::NotFound(*id))?;
        let schedule = self
            .store
            .get_schedule(device_id)
            .ok_or(EngineError::NotFound(*id))?;
        Ok(schedule.write_owned().await)
    }
}
