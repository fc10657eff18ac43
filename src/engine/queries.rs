use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Every live booking matching `pred`, across all machines.
    pub(super) async fn bookings_where(&self, pred: impl Fn(&Booking) -> bool) -> Vec<Booking> {
        let mut out = Vec::new();
        for rs in self.store.machine_handles() {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            out.extend(guard.bookings.iter().filter(|b| pred(b)).cloned());
        }
        out
    }

    /// Machines in display order: `order`, then code.
    pub async fn list_machines(&self) -> Vec<Machine> {
        let mut machines = Vec::new();
        for rs in self.store.machine_handles() {
            let guard = rs.read().await;
            if !guard.retired {
                machines.push(guard.machine.clone());
            }
        }
        machines.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.code.cmp(&b.code)));
        machines
    }

    pub async fn get_machine(&self, id: &Ulid) -> Result<Machine, EngineError> {
        let rs = self.machine_handle(id)?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::not_found("machine", id));
        }
        Ok(guard.machine.clone())
    }

    /// Bookings a machine delete would take with it.
    pub async fn machine_bookings(&self, id: &Ulid) -> Result<BookingRefs, EngineError> {
        let rs = self.machine_handle(id)?;
        let guard = rs.read().await;
        if guard.retired {
            return Err(EngineError::not_found("machine", id));
        }
        Ok(BookingRefs::new(guard.bookings.iter().map(ConflictInfo::from).collect()))
    }

    /// Bookings that reference a project.
    pub async fn project_bookings(&self, id: &Ulid) -> Result<BookingRefs, EngineError> {
        if !self.store.project_exists(id) {
            return Err(EngineError::not_found("project", id));
        }
        let bookings = self
            .bookings_where(|b| b.kind.project_id() == Some(*id))
            .await;
        Ok(BookingRefs::new(bookings.iter().map(ConflictInfo::from).collect()))
    }

    pub fn list_employees(&self) -> Vec<Employee> {
        let mut employees = self.store.employees();
        employees.sort_by(|a, b| a.employee_number.cmp(&b.employee_number));
        employees
    }

    pub fn get_employee(&self, id: &Ulid) -> Result<Employee, EngineError> {
        self.store
            .get_employee(id)
            .ok_or_else(|| EngineError::not_found("employee", id))
    }

    /// Projects by start date, then name.
    pub fn list_projects(&self) -> Vec<Project> {
        let mut projects = self.store.projects();
        projects.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then_with(|| a.name.cmp(&b.name))
        });
        projects
    }

    pub fn get_project(&self, id: &Ulid) -> Result<Project, EngineError> {
        self.store
            .get_project(id)
            .ok_or_else(|| EngineError::not_found("project", id))
    }
}
