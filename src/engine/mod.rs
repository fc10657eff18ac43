mod bookings;
mod conflict;
mod error;
mod mutations;
mod queries;
mod status;
mod store;

pub use conflict::find_conflicts;
pub use error::EngineError;
pub use status::{busy_machines, desired_status};
pub use store::InMemoryStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedMachineState = Arc<RwLock<MachineState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<usize>>,
    },
    RecordsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even on append error so partially buffered bytes don't leak
    // into the next batch; callers were told this batch failed.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let _ = response.send(compact_in_place(wal));
        }
        WalCommand::RecordsSinceCompact { response } => {
            let _ = response.send(wal.records_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Rewrite the WAL as a snapshot of itself. Runs on the writer task, so no
/// append can interleave between the replay and the swap.
fn compact_in_place(wal: &mut Wal) -> io::Result<usize> {
    wal.flush_sync()?;
    let events = Wal::replay(wal.path())?;
    let snapshot = InMemoryStore::from_events(&events).snapshot_events();
    Wal::write_compact_file(wal.path(), &snapshot)?;
    wal.swap_compact_file()?;
    Ok(snapshot.len())
}

/// Scheduling engine: the entity store, its WAL, and the booking/machine-status
/// consistency rules layered over them.
pub struct Engine {
    pub(super) store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) project_delete_policy: ProjectDeletePolicy,
    /// Held for the duration of a full reconcile pass.
    pub(super) reconcile_gate: Mutex<()>,
    /// Booking writes and employee/project updates hold this shared; deletes
    /// of employees and projects hold it exclusively. Nothing can reference
    /// or rewrite an entity whose delete is in progress.
    pub(super) reference_gate: RwLock<()>,
    /// Serializes read-modify-write of employee and project records, and
    /// machine creation against the machine cap.
    pub(super) record_gate: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay_and_repair(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::from_events(&events);
        tracing::info!(
            events = events.len(),
            machines = store.machine_count(),
            bookings = store.booking_count(),
            "store replayed"
        );

        Ok(Self {
            store,
            wal_tx,
            clock,
            project_delete_policy: ProjectDeletePolicy::default(),
            reconcile_gate: Mutex::new(()),
            reference_gate: RwLock::new(()),
            record_gate: Mutex::new(()),
        })
    }

    pub fn with_project_delete_policy(mut self, policy: ProjectDeletePolicy) -> Self {
        self.project_delete_policy = policy;
        self
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
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
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// WAL-append, then apply to the locked machines and the collections.
    pub(super) async fn persist_and_apply<'a>(
        &self,
        touched: impl IntoIterator<Item = &'a mut MachineState>,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for ms in touched {
            self.store.apply_to_machine(ms, event);
        }
        self.store.apply_global(event);
        Ok(())
    }

    /// Persist an event that touches no machine's state.
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        self.persist_and_apply(std::iter::empty::<&mut MachineState>(), event)
            .await
    }

    pub(super) fn machine_handle(&self, id: &Ulid) -> Result<SharedMachineState, EngineError> {
        self.store
            .get_machine(id)
            .ok_or_else(|| EngineError::not_found("machine", id))
    }

    /// Write-lock one machine. Fails if it was deleted while we waited.
    pub(super) async fn write_machine(
        &self,
        id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<MachineState>, EngineError> {
        let guard = self.machine_handle(id)?.write_owned().await;
        if guard.retired {
            return Err(EngineError::not_found("machine", id));
        }
        Ok(guard)
    }

    /// Write-lock several machines in id order so concurrent multi-machine
    /// writers cannot deadlock. Duplicates are locked once.
    pub(super) async fn lock_machines(
        &self,
        ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<MachineState>>, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let handles = ids
            .iter()
            .map(|id| self.machine_handle(id))
            .collect::<Result<Vec<_>, _>>()?;
        let mut guards = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.write_owned().await;
            if guard.retired {
                return Err(EngineError::not_found("machine", guard.machine.id));
            }
            guards.push(guard);
        }
        Ok(guards)
    }

    /// Rewrite the WAL as a minimal snapshot. Returns the record count written.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_records_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::RecordsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
