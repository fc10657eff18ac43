use std::collections::HashSet;

use tracing::{debug, error, info};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Machines occupied at `now` by a non-terminal booking.
pub fn busy_machines<'a>(bookings: impl IntoIterator<Item = &'a Booking>, now: Ms) -> HashSet<Ulid> {
    bookings
        .into_iter()
        .filter(|b| b.is_active_at(now))
        .map(|b| b.machine_id)
        .collect()
}

pub fn desired_status(machine_id: &Ulid, busy: &HashSet<Ulid>) -> MachineStatus {
    if busy.contains(machine_id) {
        MachineStatus::Occupied
    } else {
        MachineStatus::Available
    }
}

impl Engine {
    /// Bring one locked machine's status in line with its bookings at `now`.
    /// Writes only when the status actually changes.
    pub(super) async fn reconcile_locked(
        &self,
        ms: &mut MachineState,
        now: Ms,
    ) -> Result<Option<StatusChange>, EngineError> {
        let busy = busy_machines(&ms.bookings, now);
        let to = desired_status(&ms.machine.id, &busy);
        let from = ms.machine.status;
        if from == to {
            return Ok(None);
        }

        let event = Event::MachineStatusChanged {
            id: ms.machine.id,
            status: to,
        };
        self.persist_and_apply([&mut *ms], &event).await?;
        info!(machine = %ms.machine.code, ?from, ?to, "machine status changed");
        metrics::counter!(crate::observability::MACHINE_STATUS_CHANGES_TOTAL).increment(1);
        Ok(Some(StatusChange {
            machine_id: ms.machine.id,
            code: ms.machine.code.clone(),
            from,
            to,
        }))
    }

    /// Reconcile a set of machines, e.g. the ones a booking write touched.
    /// Machines that vanished in the meantime are skipped.
    pub async fn reconcile_machines(&self, ids: &[Ulid]) -> ReconcileReport {
        let now = self.clock.now_ms();
        let mut report = ReconcileReport::default();
        for id in ids {
            let Some(rs) = self.store.get_machine(id) else {
                continue;
            };
            let mut guard = rs.write().await;
            if guard.retired {
                continue;
            }
            let outcome = self.reconcile_locked(&mut guard, now).await;
            self.record_outcome(&mut report, id, outcome);
        }
        report
    }

    /// Full pass over every machine. A failure on one machine is logged and
    /// counted; the pass continues with the rest.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let _pass = self.reconcile_gate.lock().await;
        self.run_full_pass().await
    }

    /// Like [`Engine::reconcile_all`], but returns `None` instead of waiting
    /// when another full pass is in flight.
    pub async fn reconcile_if_idle(&self) -> Option<ReconcileReport> {
        let Ok(_pass) = self.reconcile_gate.try_lock() else {
            debug!("reconcile pass already running, skipping");
            return None;
        };
        Some(self.run_full_pass().await)
    }

    async fn run_full_pass(&self) -> ReconcileReport {
        let start = std::time::Instant::now();
        let now = self.clock.now_ms();
        let mut report = ReconcileReport::default();
        for rs in self.store.machine_handles() {
            let mut guard = rs.write().await;
            if guard.retired {
                continue;
            }
            let id = guard.machine.id;
            let outcome = self.reconcile_locked(&mut guard, now).await;
            self.record_outcome(&mut report, &id, outcome);
        }
        metrics::counter!(crate::observability::RECONCILE_PASSES_TOTAL).increment(1);
        metrics::histogram!(crate::observability::RECONCILE_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        debug!(
            changed = report.changes.len(),
            failed = report.failed,
            "reconcile pass finished"
        );
        report
    }

    fn record_outcome(
        &self,
        report: &mut ReconcileReport,
        machine_id: &Ulid,
        outcome: Result<Option<StatusChange>, EngineError>,
    ) {
        match outcome {
            Ok(Some(change)) => report.changes.push(change),
            Ok(None) => {}
            Err(e) => {
                error!(machine_id = %machine_id, error = %e, "machine status write failed");
                metrics::counter!(crate::observability::RECONCILE_FAILURES_TOTAL).increment(1);
                report.failed += 1;
            }
        }
    }
}
