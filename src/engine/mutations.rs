use std::collections::HashSet;

use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Trimmed, non-empty, bounded text field.
fn required_text(field: &'static str, value: Option<String>, max: usize) -> Result<String, EngineError> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        return Err(EngineError::validation(field, format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(value)
}

fn machine_code(seed: u128) -> String {
    format!("M{:04}", seed % MACHINE_CODE_SPACE)
}

fn normalize_skills(skills: Vec<String>) -> Result<Vec<String>, EngineError> {
    let mut seen = HashSet::new();
    let skills: Vec<String> = skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect();
    if skills.len() > MAX_SKILLS {
        return Err(EngineError::LimitExceeded("too many skills"));
    }
    if skills.iter().any(|s| s.len() > MAX_NAME_LEN) {
        return Err(EngineError::LimitExceeded("skill name too long"));
    }
    Ok(skills)
}

/// Merge `input` over `existing` (if any) into a validated project.
fn build_project(id: Ulid, input: ProjectInput, existing: Option<&Project>) -> Result<Project, EngineError> {
    let name = required_text("name", input.name.or(existing.map(|p| p.name.clone())), MAX_NAME_LEN)?;
    let customer = required_text(
        "customer",
        input.customer.or(existing.map(|p| p.customer.clone())),
        MAX_NAME_LEN,
    )?;
    let description = match input.description {
        Some(d) if d.trim().is_empty() => None,
        Some(d) => Some(d),
        None => existing.and_then(|p| p.description.clone()),
    };
    if description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("description too long"));
    }

    let start_date = input
        .start_date
        .or(existing.map(|p| p.start_date))
        .ok_or_else(|| EngineError::validation("startDate", "start date is required"))?;
    let deadline = input
        .deadline
        .or(existing.map(|p| p.deadline))
        .ok_or_else(|| EngineError::validation("deadline", "deadline is required"))?;
    if deadline < start_date {
        return Err(EngineError::validation("deadline", "deadline must not be before start date"));
    }

    let price = input
        .price
        .or(existing.map(|p| p.price))
        .ok_or_else(|| EngineError::validation("price", "price is required"))?;
    if !price.is_finite() || price < 0.0 {
        return Err(EngineError::validation("price", "price must be a non-negative number"));
    }

    let is_class_project = input
        .is_class_project
        .or(existing.map(|p| p.is_class_project))
        .unwrap_or(false);
    let inspections = if is_class_project {
        Some(
            input
                .inspections
                .or(existing.and_then(|p| p.inspections.clone()))
                .unwrap_or_default(),
        )
    } else {
        None
    };

    Ok(Project {
        id,
        name,
        customer,
        description,
        start_date,
        deadline,
        price,
        is_class_project,
        inspections,
    })
}

impl Engine {
    // ── Machines ─────────────────────────────────────────────

    pub async fn create_machine(&self, input: MachineInput) -> Result<Machine, EngineError> {
        let name = required_text("name", input.name, MAX_NAME_LEN)?;
        // Held until the create is applied so the count cannot be raced past.
        let _records = self.record_gate.lock().await;
        if self.store.machine_count() >= MAX_MACHINES {
            return Err(EngineError::LimitExceeded("too many machines"));
        }

        let id = Ulid::new();
        let code = (0..MACHINE_CODE_ATTEMPTS)
            .map(|_| machine_code(Ulid::new().random()))
            .find(|code| self.store.claim_machine_code(code, id))
            .ok_or(EngineError::LimitExceeded("no free machine code"))?;

        let machine = Machine {
            id,
            code,
            name,
            status: MachineStatus::Available,
            order: input.order.unwrap_or(0),
        };
        let event = Event::MachineCreated {
            machine: machine.clone(),
        };
        if let Err(e) = self.persist_global(&event).await {
            self.store.release_machine_code(&machine.code);
            return Err(e);
        }
        info!(machine = %machine.code, id = %machine.id, "machine created");
        Ok(machine)
    }

    /// Operators edit name and order; status belongs to the reconciler.
    pub async fn update_machine(&self, id: &Ulid, input: MachineInput) -> Result<Machine, EngineError> {
        let mut guard = self.write_machine(id).await?;
        let name = match input.name {
            Some(n) => required_text("name", Some(n), MAX_NAME_LEN)?,
            None => guard.machine.name.clone(),
        };
        let event = Event::MachineUpdated {
            id: *id,
            name,
            order: input.order.unwrap_or(guard.machine.order),
        };
        self.persist_and_apply([&mut *guard], &event).await?;
        Ok(guard.machine.clone())
    }

    /// Delete a machine and every booking on it in one record. Returns the
    /// number of bookings removed.
    pub async fn delete_machine(&self, id: &Ulid) -> Result<usize, EngineError> {
        let mut guard = self.write_machine(id).await?;
        let deleted = guard.bookings.len();
        let code = guard.machine.code.clone();
        self.persist_and_apply([&mut *guard], &Event::MachineDeleted { id: *id })
            .await?;
        info!(machine = %code, deleted_bookings = deleted, "machine deleted");
        Ok(deleted)
    }

    /// Set display order for several machines at once. Any unknown id
    /// rejects the whole batch.
    pub async fn reorder_machines(&self, orders: Vec<(Ulid, i64)>) -> Result<usize, EngineError> {
        if orders.len() > MAX_REORDER_BATCH {
            return Err(EngineError::LimitExceeded("reorder batch too large"));
        }
        let mut seen = HashSet::new();
        if let Some((dup, _)) = orders.iter().find(|(id, _)| !seen.insert(*id)) {
            return Err(EngineError::validation(
                "machineOrders",
                format!("machine {dup} listed more than once"),
            ));
        }
        if orders.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Ulid> = orders.iter().map(|(id, _)| *id).collect();
        let mut guards = self.lock_machines(&ids).await?;
        let count = orders.len();
        let event = Event::MachinesReordered { orders };
        self.persist_and_apply(guards.iter_mut().map(|g| &mut **g), &event)
            .await?;
        Ok(count)
    }

    // ── Employees ────────────────────────────────────────────

    pub async fn create_employee(&self, input: EmployeeInput) -> Result<Employee, EngineError> {
        let employee = Employee {
            id: Ulid::new(),
            employee_number: required_text("employeeNumber", input.employee_number, MAX_NAME_LEN)?,
            name: required_text("name", input.name, MAX_NAME_LEN)?,
            skills: normalize_skills(input.skills.unwrap_or_default())?,
        };
        self.save_employee(employee, None).await
    }

    /// Runs under the reference gate so it cannot resurrect an employee
    /// whose delete is in flight.
    pub async fn update_employee(&self, id: &Ulid, input: EmployeeInput) -> Result<Employee, EngineError> {
        let _refs = self.reference_gate.read().await;
        let _records = self.record_gate.lock().await;
        let existing = self
            .store
            .get_employee(id)
            .ok_or_else(|| EngineError::not_found("employee", id))?;
        let employee = Employee {
            id: *id,
            employee_number: required_text(
                "employeeNumber",
                input.employee_number.or(Some(existing.employee_number.clone())),
                MAX_NAME_LEN,
            )?,
            name: required_text("name", input.name.or(Some(existing.name.clone())), MAX_NAME_LEN)?,
            skills: match input.skills {
                Some(skills) => normalize_skills(skills)?,
                None => existing.skills.clone(),
            },
        };
        self.save_employee(employee, Some(&existing)).await
    }

    /// Claim the employee number, then persist. The claim is released if the
    /// write fails.
    async fn save_employee(&self, employee: Employee, existing: Option<&Employee>) -> Result<Employee, EngineError> {
        let renumbered = existing.is_none_or(|e| e.employee_number != employee.employee_number);
        if renumbered && !self.store.claim_employee_number(&employee.employee_number, employee.id) {
            return Err(EngineError::AlreadyExists {
                entity: "employee",
                id: employee.employee_number,
            });
        }
        let event = Event::EmployeeSaved {
            employee: employee.clone(),
        };
        if let Err(e) = self.persist_global(&event).await {
            if renumbered {
                self.store
                    .release_employee_number(&employee.employee_number, employee.id);
            }
            return Err(e);
        }
        Ok(employee)
    }

    /// Refused while any booking references the employee.
    pub async fn delete_employee(&self, id: &Ulid) -> Result<(), EngineError> {
        let _refs = self.reference_gate.write().await;
        if self.store.get_employee(id).is_none() {
            return Err(EngineError::not_found("employee", id));
        }
        let referencing = self.bookings_where(|b| b.employee_ids.contains(id)).await;
        if !referencing.is_empty() {
            return Err(EngineError::ReferencedBy {
                entity: "employee",
                id: id.to_string(),
                bookings: referencing.into_iter().map(|b| b.id).collect(),
            });
        }
        self.persist_global(&Event::EmployeeDeleted { id: *id }).await?;
        info!(employee = %id, "employee deleted");
        Ok(())
    }

    // ── Projects ─────────────────────────────────────────────

    pub async fn create_project(&self, input: ProjectInput) -> Result<Project, EngineError> {
        let project = build_project(Ulid::new(), input, None)?;
        self.persist_global(&Event::ProjectSaved {
            project: project.clone(),
        })
        .await?;
        Ok(project)
    }

    pub async fn update_project(&self, id: &Ulid, input: ProjectInput) -> Result<Project, EngineError> {
        let _refs = self.reference_gate.read().await;
        let _records = self.record_gate.lock().await;
        let existing = self
            .store
            .get_project(id)
            .ok_or_else(|| EngineError::not_found("project", id))?;
        let project = build_project(*id, input, Some(&existing))?;
        self.persist_global(&Event::ProjectSaved {
            project: project.clone(),
        })
        .await?;
        Ok(project)
    }

    /// Mark one inspection of a class project as completed or not.
    pub async fn set_inspection_completed(
        &self,
        id: &Ulid,
        key: &str,
        completed: bool,
    ) -> Result<Project, EngineError> {
        let _refs = self.reference_gate.read().await;
        let _records = self.record_gate.lock().await;
        let mut project = self
            .store
            .get_project(id)
            .ok_or_else(|| EngineError::not_found("project", id))?;
        let inspection = project
            .inspections
            .as_mut()
            .ok_or_else(|| EngineError::validation("isClassProject", "project has no inspections"))?
            .get_mut(key)
            .ok_or_else(|| EngineError::validation("inspectionKey", format!("unknown inspection: {key}")))?;
        inspection.completed = completed;

        self.persist_global(&Event::ProjectSaved {
            project: project.clone(),
        })
        .await?;
        Ok(project)
    }

    /// Delete a project according to the configured policy. Under `Cascade`
    /// its bookings go in the same record and the affected machines are
    /// reconciled; returns the number of bookings removed.
    pub async fn delete_project(&self, id: &Ulid) -> Result<usize, EngineError> {
        let _refs = self.reference_gate.write().await;
        if !self.store.project_exists(id) {
            return Err(EngineError::not_found("project", id));
        }
        let referencing = self
            .bookings_where(|b| b.kind.project_id() == Some(*id))
            .await;

        if self.project_delete_policy == ProjectDeletePolicy::Block && !referencing.is_empty() {
            return Err(EngineError::ReferencedBy {
                entity: "project",
                id: id.to_string(),
                bookings: referencing.into_iter().map(|b| b.id).collect(),
            });
        }

        let machine_ids: Vec<Ulid> = referencing.iter().map(|b| b.machine_id).collect();
        let mut guards = self.lock_machines(&machine_ids).await?;
        let cascaded: Vec<(Ulid, String)> = guards
            .iter()
            .flat_map(|g| {
                g.bookings
                    .iter()
                    .filter(|b| b.kind.project_id() == Some(*id))
                    .map(|b| (g.machine.id, b.id.clone()))
            })
            .collect();
        let deleted = cascaded.len();

        let event = Event::ProjectDeleted { id: *id, cascaded };
        self.persist_and_apply(guards.iter_mut().map(|g| &mut **g), &event)
            .await?;
        let now = self.clock.now_ms();
        for guard in guards.iter_mut() {
            if let Err(e) = self.reconcile_locked(guard, now).await {
                tracing::error!(machine_id = %guard.machine.id, error = %e, "status reconcile after project delete failed");
                metrics::counter!(crate::observability::RECONCILE_FAILURES_TOTAL).increment(1);
            }
        }
        info!(project = %id, deleted_bookings = deleted, "project deleted");
        Ok(deleted)
    }
}
