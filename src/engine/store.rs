use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedMachineState;

/// The four collections plus their uniqueness indexes.
///
/// Mutations arrive only as [`Event`]s. Machine-scoped events are applied to a
/// `MachineState` the caller already holds a write guard on; collection-level
/// effects (inserting or dropping a machine, employees, projects) are applied
/// by [`InMemoryStore::apply_global`].
pub struct InMemoryStore {
    machines: DashMap<Ulid, SharedMachineState>,
    machine_codes: DashMap<String, Ulid>,
    employees: DashMap<Ulid, Employee>,
    employee_numbers: DashMap<String, Ulid>,
    projects: DashMap<Ulid, Project>,
    /// Booking id → machine id.
    booking_index: DashMap<String, Ulid>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            machines: DashMap::new(),
            machine_codes: DashMap::new(),
            employees: DashMap::new(),
            employee_numbers: DashMap::new(),
            projects: DashMap::new(),
            booking_index: DashMap::new(),
        }
    }

    /// Rebuild a store from a replayed event stream.
    pub fn from_events(events: &[Event]) -> Self {
        let store = Self::new();
        for event in events {
            store.replay_event(event);
        }
        store
    }

    // ── Machines ─────────────────────────────────────────────

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn get_machine(&self, id: &Ulid) -> Option<SharedMachineState> {
        self.machines.get(id).map(|e| e.value().clone())
    }

    /// Handles to every machine. Collected first so no map shard is held
    /// across an await.
    pub fn machine_handles(&self) -> Vec<SharedMachineState> {
        self.machines.iter().map(|e| e.value().clone()).collect()
    }

    #[cfg(test)]
    pub fn code_taken(&self, code: &str) -> bool {
        self.machine_codes.contains_key(code)
    }

    /// Reserve a machine code ahead of its create event. `false` if taken.
    pub fn claim_machine_code(&self, code: &str, machine_id: Ulid) -> bool {
        claim(&self.machine_codes, code, machine_id)
    }

    pub fn release_machine_code(&self, code: &str) {
        self.machine_codes.remove(code);
    }

    // ── Employees ────────────────────────────────────────────

    pub fn get_employee(&self, id: &Ulid) -> Option<Employee> {
        self.employees.get(id).map(|e| e.value().clone())
    }

    pub fn employees(&self) -> Vec<Employee> {
        self.employees.iter().map(|e| e.value().clone()).collect()
    }

    #[cfg(test)]
    pub fn employee_by_number(&self, number: &str) -> Option<Ulid> {
        self.employee_numbers.get(number).map(|e| *e.value())
    }

    /// Reserve an employee number for `employee_id`. Succeeds if the number
    /// is free or already belongs to that employee.
    pub fn claim_employee_number(&self, number: &str, employee_id: Ulid) -> bool {
        match self.employee_numbers.entry(number.to_string()) {
            Entry::Occupied(slot) => *slot.get() == employee_id,
            Entry::Vacant(slot) => {
                slot.insert(employee_id);
                true
            }
        }
    }

    /// Drop a reservation that never got its save event.
    pub fn release_employee_number(&self, number: &str, employee_id: Ulid) {
        self.employee_numbers
            .remove_if(number, |_, owner| *owner == employee_id);
    }

    // ── Projects ─────────────────────────────────────────────

    pub fn get_project(&self, id: &Ulid) -> Option<Project> {
        self.projects.get(id).map(|e| e.value().clone())
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.iter().map(|e| e.value().clone()).collect()
    }

    pub fn project_exists(&self, id: &Ulid) -> bool {
        self.projects.contains_key(id)
    }

    // ── Booking index ────────────────────────────────────────

    pub fn machine_for_booking(&self, booking_id: &str) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    pub fn booking_count(&self) -> usize {
        self.booking_index.len()
    }

    /// Reserve a booking id ahead of its create event. `false` if taken.
    pub fn claim_booking_id(&self, booking_id: &str, machine_id: Ulid) -> bool {
        claim(&self.booking_index, booking_id, machine_id)
    }

    /// Undo a claim whose create was rejected.
    pub fn release_booking_id(&self, booking_id: &str) {
        self.booking_index.remove(booking_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply the per-machine part of an event. No locking; the caller holds the
    /// guard. Parts of the event addressed to other machines are ignored.
    pub fn apply_to_machine(&self, ms: &mut MachineState, event: &Event) {
        let mid = ms.machine.id;
        match event {
            Event::MachineUpdated { id, name, order } if *id == mid => {
                ms.machine.name = name.clone();
                ms.machine.order = *order;
            }
            Event::MachinesReordered { orders } => {
                if let Some((_, order)) = orders.iter().find(|(id, _)| *id == mid) {
                    ms.machine.order = *order;
                }
            }
            Event::MachineStatusChanged { id, status } if *id == mid => {
                ms.machine.status = *status;
            }
            Event::MachineDeleted { id } if *id == mid => {
                ms.retired = true;
                for booking in ms.bookings.drain(..) {
                    self.booking_index.remove(&booking.id);
                }
            }
            Event::ProjectDeleted { cascaded, .. } => {
                for (machine_id, booking_id) in cascaded {
                    if *machine_id == mid && ms.remove_booking(booking_id).is_some() {
                        self.booking_index.remove(booking_id);
                    }
                }
            }
            Event::BookingCreated { booking } if booking.machine_id == mid => {
                self.booking_index.insert(booking.id.clone(), mid);
                ms.insert_booking(booking.clone());
            }
            Event::BookingUpdated {
                previous_machine_id,
                booking,
            } => {
                if *previous_machine_id == mid {
                    ms.remove_booking(&booking.id);
                }
                if booking.machine_id == mid {
                    ms.insert_booking(booking.clone());
                    self.booking_index.insert(booking.id.clone(), mid);
                }
            }
            Event::BookingDeleted { id, machine_id } if *machine_id == mid => {
                ms.remove_booking(id);
                self.booking_index.remove(id);
            }
            _ => {}
        }
    }

    /// Apply the collection-level part of an event.
    pub fn apply_global(&self, event: &Event) {
        match event {
            Event::MachineCreated { machine } => {
                self.machine_codes.insert(machine.code.clone(), machine.id);
                self.machines.insert(
                    machine.id,
                    Arc::new(RwLock::new(MachineState::new(machine.clone()))),
                );
            }
            Event::MachineDeleted { id } => {
                self.machine_codes.retain(|_, mid| mid != id);
                self.machines.remove(id);
            }
            Event::EmployeeSaved { employee } => {
                if let Some(prev) = self.employees.insert(employee.id, employee.clone())
                    && prev.employee_number != employee.employee_number
                {
                    self.employee_numbers.remove(&prev.employee_number);
                }
                self.employee_numbers
                    .insert(employee.employee_number.clone(), employee.id);
            }
            Event::EmployeeDeleted { id } => {
                if let Some((_, prev)) = self.employees.remove(id) {
                    self.employee_numbers.remove(&prev.employee_number);
                }
            }
            Event::ProjectSaved { project } => {
                self.projects.insert(project.id, project.clone());
            }
            Event::ProjectDeleted { id, .. } => {
                self.projects.remove(id);
            }
            _ => {}
        }
    }

    /// Replay one event. We're the sole owner of the machine locks during
    /// replay, so `try_write` always succeeds.
    fn replay_event(&self, event: &Event) {
        for mid in event_machine_ids(event) {
            if let Some(rs) = self.get_machine(&mid) {
                let mut guard = rs.try_write().expect("replay: uncontended write");
                self.apply_to_machine(&mut guard, event);
            }
        }
        self.apply_global(event);
    }

    /// The minimal event stream that recreates the current state.
    /// Only valid on a store nobody else is writing to.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for entry in self.employees.iter() {
            events.push(Event::EmployeeSaved {
                employee: entry.value().clone(),
            });
        }
        for entry in self.projects.iter() {
            events.push(Event::ProjectSaved {
                project: entry.value().clone(),
            });
        }
        for rs in self.machine_handles() {
            let guard = rs.try_read().expect("snapshot: uncontended read");
            events.push(Event::MachineCreated {
                machine: guard.machine.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }
        events
    }
}

fn claim(index: &DashMap<String, Ulid>, key: &str, owner: Ulid) -> bool {
    match index.entry(key.to_string()) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(owner);
            true
        }
    }
}

/// Machines whose booking lists or fields an event touches.
pub(crate) fn event_machine_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::MachineUpdated { id, .. }
        | Event::MachineStatusChanged { id, .. }
        | Event::MachineDeleted { id } => vec![*id],
        Event::MachinesReordered { orders } => orders.iter().map(|(id, _)| *id).collect(),
        Event::ProjectDeleted { cascaded, .. } => cascaded
            .iter()
            .map(|(mid, _)| *mid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        Event::BookingCreated { booking } => vec![booking.machine_id],
        Event::BookingUpdated {
            previous_machine_id,
            booking,
        } => {
            if *previous_machine_id == booking.machine_id {
                vec![booking.machine_id]
            } else {
                vec![*previous_machine_id, booking.machine_id]
            }
        }
        Event::BookingDeleted { machine_id, .. } => vec![*machine_id],
        Event::MachineCreated { .. }
        | Event::EmployeeSaved { .. }
        | Event::EmployeeDeleted { .. }
        | Event::ProjectSaved { .. } => vec![],
    }
}
