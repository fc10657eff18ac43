use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Machines ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineStatus {
    #[default]
    Available,
    Occupied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: Ulid,
    /// Human-readable code, `M0000`..`M9999`.
    pub code: String,
    pub name: String,
    pub status: MachineStatus,
    pub order: i64,
}

/// A machine together with every booking that references it.
#[derive(Debug, Clone)]
pub struct MachineState {
    pub machine: Machine,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
    /// Set once the machine is deleted. A writer that was queued on the lock
    /// must treat the machine as gone.
    pub retired: bool,
}

impl MachineState {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            bookings: Vec::new(),
            retired: false,
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: &str) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: &str) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

// ── Employees ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: Ulid,
    pub employee_number: String,
    pub name: String,
    pub skills: Vec<String>,
}

// ── Projects ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Inspection {
    pub selected: bool,
    pub date: Option<Ms>,
    pub completed: bool,
}

/// The fixed inspection set carried by class projects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Inspections {
    pub first_inspection: Inspection,
    pub wps_wpqr: Inspection,
    pub ndt: Inspection,
    pub final_inspection: Inspection,
    pub report: Inspection,
}

impl Inspections {
    /// Look up an inspection by its camelCase key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Inspection> {
        match key {
            "firstInspection" => Some(&mut self.first_inspection),
            "wpsWpqr" => Some(&mut self.wps_wpqr),
            "ndt" => Some(&mut self.ndt),
            "finalInspection" => Some(&mut self.final_inspection),
            "report" => Some(&mut self.report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Ulid,
    pub name: String,
    pub customer: String,
    pub description: Option<String>,
    pub start_date: Ms,
    pub deadline: Ms,
    pub price: f64,
    pub is_class_project: bool,
    /// Present iff `is_class_project`.
    pub inspections: Option<Inspections>,
}

/// What happens to bookings when their project is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectDeletePolicy {
    /// Delete dependent bookings together with the project.
    #[default]
    Cascade,
    /// Refuse while any booking references the project.
    Block,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BookingStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// Completed and cancelled bookings no longer reserve their machine.
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceType {
    General,
}

/// A booking is either maintenance or work on exactly one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    Maintenance(MaintenanceType),
    ProjectWork(Ulid),
}

impl BookingKind {
    pub fn project_id(&self) -> Option<Ulid> {
        match self {
            BookingKind::ProjectWork(pid) => Some(*pid),
            BookingKind::Maintenance(_) => None,
        }
    }

    pub fn maintenance_type(&self) -> Option<MaintenanceType> {
        match self {
            BookingKind::Maintenance(mt) => Some(*mt),
            BookingKind::ProjectWork(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub span: Span,
    pub machine_id: Ulid,
    pub kind: BookingKind,
    pub employee_ids: Vec<Ulid>,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

impl Booking {
    /// Reserves its machine right now.
    pub fn is_active_at(&self, now: Ms) -> bool {
        !self.status.is_terminal() && self.span.contains_instant(now)
    }
}

// ── Write inputs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInput {
    pub name: Option<String>,
    pub order: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeInput {
    pub employee_number: Option<String>,
    pub name: Option<String>,
    pub skills: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub name: Option<String>,
    pub customer: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<Ms>,
    pub deadline: Option<Ms>,
    pub price: Option<f64>,
    pub is_class_project: Option<bool>,
    pub inspections: Option<Inspections>,
}

/// Create body for a booking; also used as a patch, where absent fields keep
/// their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInput {
    pub booking_id: Option<String>,
    pub start_time: Option<Ms>,
    pub end_time: Option<Ms>,
    pub machine_id: Option<Ulid>,
    pub project_id: Option<Ulid>,
    pub maintenance_type: Option<MaintenanceType>,
    pub employee_ids: Option<Vec<Ulid>>,
    pub status: Option<BookingStatus>,
    pub notes: Option<String>,
}

// ── Events ───────────────────────────────────────────────────────

/// The event types, flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    MachineCreated {
        machine: Machine,
    },
    MachineUpdated {
        id: Ulid,
        name: String,
        order: i64,
    },
    MachinesReordered {
        orders: Vec<(Ulid, i64)>,
    },
    MachineStatusChanged {
        id: Ulid,
        status: MachineStatus,
    },
    /// Removes the machine and every booking on it.
    MachineDeleted {
        id: Ulid,
    },
    EmployeeSaved {
        employee: Employee,
    },
    EmployeeDeleted {
        id: Ulid,
    },
    ProjectSaved {
        project: Project,
    },
    /// `cascaded` lists `(machine_id, booking_id)` removed with the project.
    ProjectDeleted {
        id: Ulid,
        cascaded: Vec<(Ulid, String)>,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingUpdated {
        previous_machine_id: Ulid,
        booking: Booking,
    },
    BookingDeleted {
        id: String,
        machine_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A conflicting booking as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub booking_id: String,
    pub start_time: Ms,
    pub end_time: Ms,
}

impl From<&Booking> for ConflictInfo {
    fn from(b: &Booking) -> Self {
        Self {
            booking_id: b.id.clone(),
            start_time: b.span.start,
            end_time: b.span.end,
        }
    }
}

/// Bookings that reference an entity, for pre-delete checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRefs {
    pub count: usize,
    pub bookings: Vec<ConflictInfo>,
}

impl BookingRefs {
    pub fn new(mut bookings: Vec<ConflictInfo>) -> Self {
        bookings.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.booking_id.cmp(&b.booking_id)));
        Self {
            count: bookings.len(),
            bookings,
        }
    }
}

/// A booking with its references resolved for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub booking_id: String,
    pub start_time: Ms,
    pub end_time: Ms,
    pub machine: Machine,
    pub project: Option<Project>,
    pub maintenance_type: Option<MaintenanceType>,
    pub employees: Vec<Employee>,
    pub status: BookingStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub machine_id: Ulid,
    pub code: String,
    pub from: MachineStatus,
    pub to: MachineStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub changes: Vec<StatusChange>,
    /// Machines whose status write failed this pass.
    pub failed: usize,
}
