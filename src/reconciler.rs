use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::engine::Engine;

/// Background task that keeps machine status in line with the clock.
/// The first tick fires immediately, so a pass runs at startup.
pub async fn run_reconciler(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(report) = engine.reconcile_if_idle().await else {
            continue;
        };
        if !report.changes.is_empty() {
            info!(changed = report.changes.len(), "scheduled reconcile updated machine statuses");
        }
        if report.failed > 0 {
            warn!(failed = report.failed, "scheduled reconcile left machines unreconciled");
        }
    }
}

/// Background task that compacts the WAL once enough records pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let pending = engine.wal_records_since_compact().await;
        if pending < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(records) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!(before = pending, after = records, "wal compacted");
            }
            Err(e) => error!(error = %e, "wal compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use std::path::PathBuf;

    const H: Ms = 3_600_000;
    const DAY: Ms = 1_767_225_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("shopfloor_test_reconciler");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn machine_with_booking(engine: &Engine) -> Machine {
        let machine = engine
            .create_machine(MachineInput {
                name: Some("Bandsaw".into()),
                order: None,
            })
            .await
            .unwrap();
        engine
            .create_booking(BookingInput {
                booking_id: Some("svc".into()),
                start_time: Some(DAY + 10 * H),
                end_time: Some(DAY + 11 * H),
                machine_id: Some(machine.id),
                maintenance_type: Some(MaintenanceType::General),
                ..Default::default()
            })
            .await
            .unwrap();
        machine
    }

    async fn wait_for_status(engine: &Engine, machine: &Machine, want: MachineStatus) -> bool {
        for _ in 0..100 {
            if engine.get_machine(&machine.id).await.unwrap().status == want {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn reconciler_tracks_clock() {
        let clock = Arc::new(ManualClock::new(DAY));
        let engine = Arc::new(Engine::new(test_wal_path("tracks_clock.wal"), clock.clone()).unwrap());
        let machine = machine_with_booking(&engine).await;

        let task = tokio::spawn(run_reconciler(engine.clone(), Duration::from_millis(20)));

        clock.set(DAY + 10 * H + 1);
        assert!(wait_for_status(&engine, &machine, MachineStatus::Occupied).await);

        clock.set(DAY + 11 * H);
        assert!(wait_for_status(&engine, &machine, MachineStatus::Available).await);

        task.abort();
    }

    #[tokio::test]
    async fn startup_pass_runs_immediately() {
        let path = test_wal_path("startup_pass.wal");
        let clock = Arc::new(ManualClock::new(DAY));
        let machine = {
            let engine = Engine::new(path.clone(), clock.clone()).unwrap();
            machine_with_booking(&engine).await
        };

        // Time moved on while the process was down.
        clock.set(DAY + 10 * H + H / 2);
        let engine = Arc::new(Engine::new(path, clock).unwrap());
        assert_eq!(
            engine.get_machine(&machine.id).await.unwrap().status,
            MachineStatus::Available
        );

        let task = tokio::spawn(run_reconciler(engine.clone(), Duration::from_secs(3600)));
        assert!(wait_for_status(&engine, &machine, MachineStatus::Occupied).await);
        task.abort();
    }

    #[tokio::test]
    async fn compactor_respects_threshold() {
        let clock = Arc::new(ManualClock::new(DAY));
        let engine = Arc::new(Engine::new(test_wal_path("compactor.wal"), clock).unwrap());
        machine_with_booking(&engine).await;
        assert!(engine.wal_records_since_compact().await >= 2);

        let high = tokio::spawn(run_compactor(engine.clone(), 1_000, Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        high.abort();
        assert!(engine.wal_records_since_compact().await >= 2);

        let low = tokio::spawn(run_compactor(engine.clone(), 1, Duration::from_millis(10)));
        let mut compacted = false;
        for _ in 0..100 {
            if engine.wal_records_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        low.abort();
        assert!(compacted);
    }
}
