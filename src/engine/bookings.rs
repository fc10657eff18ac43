use tracing::{error, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflicts, validate_span};
use super::{Engine, EngineError};

/// Remove duplicate ids, keeping first occurrence order.
fn dedup_ids(ids: Vec<Ulid>) -> Vec<Ulid> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Merge `input` over `existing` (if any) into a validated booking.
/// Reference existence is checked separately.
fn build_booking(input: BookingInput, existing: Option<&Booking>) -> Result<Booking, EngineError> {
    let id = match (existing, input.booking_id) {
        (Some(b), Some(new_id)) if new_id.trim() != b.id => {
            return Err(EngineError::validation("bookingId", "booking id cannot be changed"));
        }
        (Some(b), _) => b.id.clone(),
        (None, Some(id)) => id.trim().to_string(),
        (None, None) => return Err(EngineError::validation("bookingId", "booking id is required")),
    };
    if id.is_empty() {
        return Err(EngineError::validation("bookingId", "booking id is required"));
    }
    if id.len() > MAX_BOOKING_ID_LEN {
        return Err(EngineError::LimitExceeded("booking id too long"));
    }

    let machine_id = input
        .machine_id
        .or(existing.map(|b| b.machine_id))
        .ok_or_else(|| EngineError::validation("machineId", "machine is required"))?;
    let start = input
        .start_time
        .or(existing.map(|b| b.span.start))
        .ok_or_else(|| EngineError::validation("startTime", "start time is required"))?;
    let end = input
        .end_time
        .or(existing.map(|b| b.span.end))
        .ok_or_else(|| EngineError::validation("endTime", "end time is required"))?;
    let span = validate_span(start, end)?;

    // Maintenance wins over a project reference sent alongside it.
    let kind = match (input.maintenance_type, input.project_id, existing) {
        (Some(mt), _, _) => BookingKind::Maintenance(mt),
        (None, Some(pid), _) => BookingKind::ProjectWork(pid),
        (None, None, Some(b)) => b.kind,
        (None, None, None) => {
            return Err(EngineError::validation(
                "projectId",
                "project is required unless the booking is maintenance",
            ));
        }
    };

    let employee_ids = match input.employee_ids {
        Some(ids) => dedup_ids(ids),
        None => existing.map(|b| b.employee_ids.clone()).unwrap_or_default(),
    };
    if employee_ids.len() > MAX_EMPLOYEES_PER_BOOKING {
        return Err(EngineError::LimitExceeded("too many employees on booking"));
    }

    let notes = match input.notes {
        Some(n) if n.trim().is_empty() => None,
        Some(n) => Some(n),
        None => existing.and_then(|b| b.notes.clone()),
    };
    if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }

    Ok(Booking {
        id,
        span,
        machine_id,
        kind,
        employee_ids,
        status: input
            .status
            .or(existing.map(|b| b.status))
            .unwrap_or_default(),
        notes,
    })
}

impl Engine {
    /// Every id the booking references must resolve.
    fn check_booking_refs(&self, booking: &Booking) -> Result<(), EngineError> {
        if let Some(pid) = booking.kind.project_id()
            && !self.store.project_exists(&pid)
        {
            return Err(EngineError::not_found("project", pid));
        }
        if let Some(missing) = booking
            .employee_ids
            .iter()
            .find(|id| self.store.get_employee(id).is_none())
        {
            return Err(EngineError::not_found("employee", missing));
        }
        Ok(())
    }

    /// Conflicts `booking` would cause on `ms`. Terminal bookings reserve
    /// nothing, so they never conflict.
    fn conflicts_on(&self, ms: &MachineState, booking: &Booking, exclude: Option<&str>) -> Vec<ConflictInfo> {
        if booking.status.is_terminal() {
            return Vec::new();
        }
        find_conflicts(
            ms.machine.id,
            &booking.span,
            ms.overlapping(&booking.span),
            exclude,
            |pid| self.store.project_exists(pid),
        )
    }

    /// Resolve a booking's references for display. Dangling references
    /// resolve to nothing rather than failing the read.
    pub(super) fn booking_view(&self, machine: &Machine, booking: &Booking) -> BookingView {
        BookingView {
            booking_id: booking.id.clone(),
            start_time: booking.span.start,
            end_time: booking.span.end,
            machine: machine.clone(),
            project: booking
                .kind
                .project_id()
                .and_then(|pid| self.store.get_project(&pid)),
            maintenance_type: booking.kind.maintenance_type(),
            employees: booking
                .employee_ids
                .iter()
                .filter_map(|id| self.store.get_employee(id))
                .collect(),
            status: booking.status,
            notes: booking.notes.clone(),
        }
    }

    /// Status write after a booking write. The booking itself is already
    /// durable, so a failure here is logged and left to the next pass.
    async fn reconcile_after_write(&self, ms: &mut MachineState) {
        let now = self.clock.now_ms();
        if let Err(e) = self.reconcile_locked(ms, now).await {
            error!(machine_id = %ms.machine.id, error = %e, "status reconcile after booking write failed");
            metrics::counter!(crate::observability::RECONCILE_FAILURES_TOTAL).increment(1);
        }
    }

    pub async fn create_booking(&self, input: BookingInput) -> Result<BookingView, EngineError> {
        let booking = build_booking(input, None)?;
        let _refs = self.reference_gate.read().await;
        self.check_booking_refs(&booking)?;
        let mut guard = self.write_machine(&booking.machine_id).await?;

        if !self.store.claim_booking_id(&booking.id, booking.machine_id) {
            return Err(EngineError::AlreadyExists {
                entity: "booking",
                id: booking.id,
            });
        }

        let result = self.insert_booking_locked(&mut guard, &booking).await;
        if result.is_err() {
            self.store.release_booking_id(&booking.id);
        }
        result?;

        self.reconcile_after_write(&mut guard).await;
        metrics::counter!(crate::observability::BOOKING_WRITES_TOTAL, "op" => "create").increment(1);
        info!(booking = %booking.id, machine = %guard.machine.code, "booking created");
        Ok(self.booking_view(&guard.machine, &booking))
    }

    async fn insert_booking_locked(&self, ms: &mut MachineState, booking: &Booking) -> Result<(), EngineError> {
        if ms.bookings.len() >= MAX_BOOKINGS_PER_MACHINE {
            return Err(EngineError::LimitExceeded("too many bookings on machine"));
        }
        let conflicts = self.conflicts_on(ms, booking, None);
        if !conflicts.is_empty() {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(conflicts));
        }
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply([ms], &event).await
    }

    pub async fn update_booking(&self, id: &str, patch: BookingInput) -> Result<BookingView, EngineError> {
        let _refs = self.reference_gate.read().await;
        // A concurrent move can relocate the booking between the index lookup
        // and taking the locks; retry against the new location.
        for _ in 0..3 {
            let old_machine_id = self
                .store
                .machine_for_booking(id)
                .ok_or_else(|| EngineError::not_found("booking", id))?;
            let new_machine_id = patch.machine_id.unwrap_or(old_machine_id);
            let mut guards = self.lock_machines(&[old_machine_id, new_machine_id]).await?;

            let Some(old_idx) = guards.iter().position(|g| g.machine.id == old_machine_id) else {
                continue;
            };
            let Some(existing) = guards[old_idx].booking(id).cloned() else {
                continue;
            };

            let updated = build_booking(patch, Some(&existing))?;
            self.check_booking_refs(&updated)?;
            let new_idx = guards
                .iter()
                .position(|g| g.machine.id == updated.machine_id)
                .ok_or_else(|| EngineError::not_found("machine", updated.machine_id))?;

            let conflicts = self.conflicts_on(&guards[new_idx], &updated, Some(id));
            if !conflicts.is_empty() {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::Conflict(conflicts));
            }

            let event = Event::BookingUpdated {
                previous_machine_id: old_machine_id,
                booking: updated.clone(),
            };
            self.persist_and_apply(guards.iter_mut().map(|g| &mut **g), &event)
                .await?;

            // Old and new machine both, so a moved or finished booking frees
            // its machine immediately.
            for guard in guards.iter_mut() {
                self.reconcile_after_write(guard).await;
            }
            metrics::counter!(crate::observability::BOOKING_WRITES_TOTAL, "op" => "update").increment(1);
            info!(booking = %id, status = ?updated.status, "booking updated");
            return Ok(self.booking_view(&guards[new_idx].machine, &updated));
        }
        Err(EngineError::not_found("booking", id))
    }

    pub async fn delete_booking(&self, id: &str) -> Result<(), EngineError> {
        // Same relocation race as `update_booking`: re-read the index once the
        // lock is held and follow the booking if it moved.
        for _ in 0..3 {
            let machine_id = self
                .store
                .machine_for_booking(id)
                .ok_or_else(|| EngineError::not_found("booking", id))?;
            let Ok(mut guard) = self.write_machine(&machine_id).await else {
                continue;
            };
            if guard.booking(id).is_none() {
                continue;
            }

            let event = Event::BookingDeleted {
                id: id.to_string(),
                machine_id,
            };
            self.persist_and_apply([&mut *guard], &event).await?;
            self.reconcile_after_write(&mut guard).await;
            metrics::counter!(crate::observability::BOOKING_WRITES_TOTAL, "op" => "delete").increment(1);
            info!(booking = %id, machine = %guard.machine.code, "booking deleted");
            return Ok(());
        }
        Err(EngineError::not_found("booking", id))
    }

    pub async fn get_booking(&self, id: &str) -> Result<BookingView, EngineError> {
        for _ in 0..3 {
            let machine_id = self
                .store
                .machine_for_booking(id)
                .ok_or_else(|| EngineError::not_found("booking", id))?;
            let Ok(rs) = self.machine_handle(&machine_id) else {
                continue;
            };
            let guard = rs.read().await;
            if let Some(booking) = guard.booking(id) {
                return Ok(self.booking_view(&guard.machine, booking));
            }
        }
        Err(EngineError::not_found("booking", id))
    }

    /// All bookings, ordered by start time.
    pub async fn list_bookings(&self) -> Vec<BookingView> {
        let mut views = Vec::new();
        for rs in self.store.machine_handles() {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            views.extend(guard.bookings.iter().map(|b| self.booking_view(&guard.machine, b)));
        }
        views.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.booking_id.cmp(&b.booking_id))
        });
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Ms = 1_767_225_600_000;
    const H: Ms = 3_600_000;

    fn input() -> BookingInput {
        BookingInput {
            booking_id: Some(" B-100 ".into()),
            start_time: Some(T0),
            end_time: Some(T0 + H),
            machine_id: Some(Ulid::new()),
            project_id: Some(Ulid::new()),
            ..Default::default()
        }
    }

    #[test]
    fn build_trims_id_and_defaults_status() {
        let b = build_booking(input(), None).unwrap();
        assert_eq!(b.id, "B-100");
        assert_eq!(b.status, BookingStatus::Planned);
        assert!(matches!(b.kind, BookingKind::ProjectWork(_)));
    }

    #[test]
    fn build_requires_project_unless_maintenance() {
        let err = build_booking(
            BookingInput {
                project_id: None,
                ..input()
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "projectId", .. }));

        let b = build_booking(
            BookingInput {
                project_id: None,
                maintenance_type: Some(MaintenanceType::General),
                ..input()
            },
            None,
        )
        .unwrap();
        assert_eq!(b.kind, BookingKind::Maintenance(MaintenanceType::General));
    }

    #[test]
    fn maintenance_with_project_stays_maintenance() {
        let b = build_booking(
            BookingInput {
                maintenance_type: Some(MaintenanceType::General),
                ..input()
            },
            None,
        )
        .unwrap();
        assert_eq!(b.kind.project_id(), None);
    }

    #[test]
    fn build_reports_missing_fields() {
        for (field, mutate) in [
            ("bookingId", (|i: &mut BookingInput| i.booking_id = None) as fn(&mut BookingInput)),
            ("machineId", |i| i.machine_id = None),
            ("startTime", |i| i.start_time = None),
            ("endTime", |i| i.end_time = None),
        ] {
            let mut i = input();
            mutate(&mut i);
            match build_booking(i, None) {
                Err(EngineError::Validation { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected validation error on {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let existing = build_booking(
            BookingInput {
                employee_ids: Some(vec![Ulid::new()]),
                notes: Some("first shift".into()),
                ..input()
            },
            None,
        )
        .unwrap();
        let patched = build_booking(
            BookingInput {
                status: Some(BookingStatus::InProgress),
                ..Default::default()
            },
            Some(&existing),
        )
        .unwrap();
        assert_eq!(patched.span, existing.span);
        assert_eq!(patched.kind, existing.kind);
        assert_eq!(patched.employee_ids, existing.employee_ids);
        assert_eq!(patched.notes, existing.notes);
        assert_eq!(patched.status, BookingStatus::InProgress);
    }

    #[test]
    fn patch_cannot_rename() {
        let existing = build_booking(input(), None).unwrap();
        let err = build_booking(
            BookingInput {
                booking_id: Some("other".into()),
                ..Default::default()
            },
            Some(&existing),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "bookingId", .. }));
    }

    #[test]
    fn employee_ids_deduplicated() {
        let e = Ulid::new();
        let b = build_booking(
            BookingInput {
                employee_ids: Some(vec![e, e, e]),
                ..input()
            },
            None,
        )
        .unwrap();
        assert_eq!(b.employee_ids, vec![e]);
    }
}
