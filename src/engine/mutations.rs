use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::vacation_info_on;
use super::conflict::{now_ms, validate_dates, validate_window};
use super::{Engine, EngineError};

/// Task fields as a caller submits them. Employee and location may be
/// absent in a half-filled form, but persisting requires both.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub title: String,
    pub employee_id: Option<Ulid>,
    pub location_id: Option<Ulid>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VacationDecision {
    Approve,
    Reject,
}

/// Before/after snapshot of an updated task, so callers can notify and
/// build diff emails without re-reading state.
#[derive(Debug, Clone)]
pub struct TaskUpdateOutcome {
    pub before: TaskInfo,
    pub after: TaskInfo,
}

fn validated_task_fields(input: &TaskInput) -> Result<(Ulid, Ulid), EngineError> {
    let employee_id = input.employee_id.ok_or(EngineError::MissingEmployee)?;
    let location_id = input.location_id.ok_or(EngineError::MissingLocation)?;
    if input.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("task title too long"));
    }
    validate_dates(input.start_date, input.end_date, MAX_TASK_SPAN_DAYS)?;
    validate_window(&input.window)?;
    Ok((employee_id, location_id))
}

fn entry_task_info(entry: &Entry, employee_id: Ulid) -> Option<TaskInfo> {
    match &entry.kind {
        EntryKind::Task { title, location_id, window } => Some(TaskInfo {
            id: entry.id,
            employee_id,
            location_id: *location_id,
            title: title.clone(),
            start_date: entry.start_date,
            end_date: entry.end_date,
            window: *window,
        }),
        EntryKind::VacationBlock { .. } => None,
    }
}

impl Engine {
    // ── Employees ────────────────────────────────────────────

    pub async fn create_employee(
        &self,
        id: Ulid,
        name: String,
        email: String,
        color: Option<String>,
        role: Role,
        active: bool,
    ) -> Result<(), EngineError> {
        if self.employees.len() >= MAX_EMPLOYEES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many employees"));
        }
        if name.len() > MAX_NAME_LEN || email.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("employee name or email too long"));
        }
        if self.employees.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::EmployeeCreated {
            id,
            name: name.clone(),
            email: email.clone(),
            color: color.clone(),
            role,
            active,
        };
        self.wal_append(&event).await?;
        let rs = EmployeeState::new(id, name, email, color, role, active);
        self.employees
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(rs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_employee(
        &self,
        id: Ulid,
        name: String,
        email: String,
        color: Option<String>,
        role: Role,
        active: bool,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN || email.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("employee name or email too long"));
        }
        let rs = self.get_employee(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let event = Event::EmployeeUpdated { id, name, email, color, role, active };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Employees are never hard-deleted while tasks reference them; the
    /// admin path for "removing" someone with history is deactivation.
    pub async fn delete_employee(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_employee(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if guard.entries.iter().any(|e| e.is_task()) {
            return Err(EngineError::HasTasks(id));
        }
        let entry_ids: Vec<Ulid> = guard.entries.iter().map(|e| e.id).collect();
        let request_ids: Vec<Ulid> = guard.requests.iter().map(|r| r.id).collect();
        drop(guard);

        let event = Event::EmployeeDeleted { id };
        self.wal_append(&event).await?;
        self.employees.remove(&id);
        for eid in entry_ids {
            self.entity_to_employee.remove(&eid);
        }
        for rid in request_ids {
            self.entity_to_employee.remove(&rid);
        }
        self.notify.send(id, &event);
        self.notify.remove(&id);
        Ok(())
    }

    // ── Locations ────────────────────────────────────────────

    pub async fn create_location(
        &self,
        id: Ulid,
        name: String,
        address: String,
        city: String,
    ) -> Result<(), EngineError> {
        if self.locations.len() >= MAX_LOCATIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if name.len() > MAX_NAME_LEN || address.len() > MAX_NAME_LEN || city.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("location field too long"));
        }
        if self.locations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::LocationCreated {
            id,
            name: name.clone(),
            address: address.clone(),
            city: city.clone(),
        };
        self.wal_append(&event).await?;
        self.locations.insert(id, Location { id, name, address, city });
        Ok(())
    }

    pub async fn update_location(
        &self,
        id: Ulid,
        name: String,
        address: String,
        city: String,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN || address.len() > MAX_NAME_LEN || city.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("location field too long"));
        }
        if !self.locations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::LocationUpdated {
            id,
            name: name.clone(),
            address: address.clone(),
            city: city.clone(),
        };
        self.wal_append(&event).await?;
        self.locations.insert(id, Location { id, name, address, city });
        Ok(())
    }

    /// Deleting a location drops its coverage rules; tasks keep it alive.
    pub async fn delete_location(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.locations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let states: Vec<_> = self.employees.iter().map(|e| e.value().clone()).collect();
        for rs in states {
            let guard = rs.read().await;
            let referenced = guard.entries.iter().any(|e| {
                matches!(&e.kind, EntryKind::Task { location_id, .. } if *location_id == id)
            });
            if referenced {
                return Err(EngineError::HasTasks(id));
            }
        }

        let event = Event::LocationDeleted { id };
        self.wal_append(&event).await?;
        self.locations.remove(&id);
        let mut rules = self.coverage.write().await;
        rules.retain(|r| r.location_id != id);
        Ok(())
    }

    // ── Coverage rules ───────────────────────────────────────

    pub async fn add_coverage_rule(
        &self,
        id: Ulid,
        location_id: Ulid,
        weekday: u8,
    ) -> Result<(), EngineError> {
        let weekday = normalize_weekday(weekday).ok_or(EngineError::InvalidWeekday(weekday))?;
        if !self.locations.contains_key(&location_id) {
            return Err(EngineError::NotFound(location_id));
        }
        let mut rules = self.coverage.write().await;
        if rules.len() >= MAX_COVERAGE_RULES {
            return Err(EngineError::LimitExceeded("too many coverage rules"));
        }
        // One rule per (location, weekday) pair — the set is unique.
        if let Some(existing) = rules
            .iter()
            .find(|r| r.id == id || (r.location_id == location_id && normalize_weekday(r.weekday) == Some(weekday)))
        {
            return Err(EngineError::AlreadyExists(existing.id));
        }

        let event = Event::CoverageRuleAdded { id, location_id, weekday };
        self.wal_append(&event).await?;
        rules.push(CoverageRule { id, location_id, weekday });
        Ok(())
    }

    pub async fn remove_coverage_rule(&self, id: Ulid) -> Result<(), EngineError> {
        let mut rules = self.coverage.write().await;
        if !rules.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::CoverageRuleRemoved { id };
        self.wal_append(&event).await?;
        rules.retain(|r| r.id != id);
        Ok(())
    }

    // ── Tasks ────────────────────────────────────────────────

    pub async fn create_task(&self, id: Ulid, input: TaskInput) -> Result<TaskInfo, EngineError> {
        let (employee_id, location_id) = validated_task_fields(&input)?;
        if !self.locations.contains_key(&location_id) {
            return Err(EngineError::NotFound(location_id));
        }
        if self.entity_to_employee.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_employee(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = rs.write().await;
        if guard.entries.len() >= MAX_ENTRIES_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many entries for employee"));
        }

        // Hard gate — unlike the conflict detectors, vacations block the write.
        if vacation_info_on(&guard, input.start_date).is_some() {
            return Err(EngineError::EmployeeOnVacation {
                employee_id,
                date: input.start_date,
            });
        }

        let event = Event::TaskCreated {
            id,
            employee_id,
            location_id,
            title: input.title.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            window: input.window,
        };
        self.persist_and_apply(employee_id, &mut guard, &event).await?;
        Ok(TaskInfo {
            id,
            employee_id,
            location_id,
            title: input.title,
            start_date: input.start_date,
            end_date: input.end_date,
            window: input.window,
        })
    }

    /// Full-field update; changing the employee is a reassignment, not a
    /// new task. A date change that lands on the (possibly new) employee's
    /// vacation rejects the whole update — no silent clearing of fields.
    pub async fn update_task(
        &self,
        id: Ulid,
        input: TaskInput,
    ) -> Result<TaskUpdateOutcome, EngineError> {
        let (employee_id, location_id) = validated_task_fields(&input)?;
        if !self.locations.contains_key(&location_id) {
            return Err(EngineError::NotFound(location_id));
        }
        let prev_employee_id = self
            .get_employee_for_entity(&id)
            .ok_or(EngineError::NotFound(id))?;

        // Acquire write locks in sorted id order to prevent deadlocks when
        // two reassignments cross.
        let mut lock_ids = vec![prev_employee_id];
        if employee_id != prev_employee_id {
            lock_ids.push(employee_id);
        }
        lock_ids.sort();

        let mut guards = Vec::with_capacity(lock_ids.len());
        for eid in &lock_ids {
            let rs = self.get_employee(eid).ok_or(EngineError::NotFound(*eid))?;
            guards.push((*eid, rs.write_owned().await));
        }

        let prev_idx = lock_ids.iter().position(|e| *e == prev_employee_id).unwrap();
        let new_idx = lock_ids.iter().position(|e| *e == employee_id).unwrap();

        let before = {
            let (_, guard) = &guards[prev_idx];
            let entry = guard.entry(id).ok_or(EngineError::NotFound(id))?;
            // Vacation blocks cannot be edited through the task API.
            entry_task_info(entry, prev_employee_id).ok_or(EngineError::NotFound(id))?
        };

        {
            let (_, guard) = &guards[new_idx];
            if guard.entries.len() >= MAX_ENTRIES_PER_EMPLOYEE {
                return Err(EngineError::LimitExceeded("too many entries for employee"));
            }
            if vacation_info_on(guard, input.start_date).is_some() {
                return Err(EngineError::EmployeeOnVacation {
                    employee_id,
                    date: input.start_date,
                });
            }
        }

        let event = Event::TaskUpdated {
            id,
            prev_employee_id,
            employee_id,
            location_id,
            title: input.title.clone(),
            start_date: input.start_date,
            end_date: input.end_date,
            window: input.window,
        };
        self.wal_append(&event).await?;
        for (eid, guard) in guards.iter_mut() {
            super::apply_to_employee(guard, &event, &self.entity_to_employee);
            self.notify.send(*eid, &event);
        }

        Ok(TaskUpdateOutcome {
            before,
            after: TaskInfo {
                id,
                employee_id,
                location_id,
                title: input.title,
                start_date: input.start_date,
                end_date: input.end_date,
                window: input.window,
            },
        })
    }

    pub async fn delete_task(&self, id: Ulid) -> Result<TaskInfo, EngineError> {
        let (employee_id, mut guard) = self.resolve_entity_write(&id).await?;
        let info = guard
            .entry(id)
            .and_then(|e| entry_task_info(e, employee_id))
            // Vacation blocks are not tasks — the task API cannot touch them.
            .ok_or(EngineError::NotFound(id))?;
        let event = Event::TaskDeleted { id, employee_id };
        self.persist_and_apply(employee_id, &mut guard, &event).await?;
        Ok(info)
    }

    // ── Vacation workflow ────────────────────────────────────

    pub async fn submit_vacation(
        &self,
        id: Ulid,
        employee_id: Ulid,
        range: DateRange,
        kind: VacationKind,
        reason: Option<String>,
    ) -> Result<VacationRequest, EngineError> {
        if range.start > range.end {
            return Err(EngineError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        validate_dates(range.start, Some(range.end), MAX_VACATION_SPAN_DAYS)?;
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("reason too long"));
            }
        if self.entity_to_employee.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_employee(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let mut guard = rs.write().await;
        if guard.requests.len() >= MAX_REQUESTS_PER_EMPLOYEE {
            return Err(EngineError::LimitExceeded("too many requests for employee"));
        }

        // Only APPROVED requests block a new submission; pending and
        // rejected ones never do.
        if let Some(existing) = guard
            .requests
            .iter()
            .find(|r| r.status == RequestStatus::Approved && r.range.overlaps(&range))
        {
            return Err(EngineError::OverlapsApprovedVacation(existing.id));
        }

        let event = Event::VacationSubmitted {
            id,
            employee_id,
            range,
            kind,
            reason,
        };
        self.persist_and_apply(employee_id, &mut guard, &event).await?;
        Ok(guard.request(id).expect("request just inserted").clone())
    }

    pub async fn decide_vacation(
        &self,
        id: Ulid,
        decision: VacationDecision,
        decided_by: Ulid,
        comment: Option<String>,
    ) -> Result<VacationRequest, EngineError> {
        if let Some(ref c) = comment
            && c.len() > MAX_COMMENT_LEN {
                return Err(EngineError::LimitExceeded("comment too long"));
            }
        let (employee_id, mut guard) = self.resolve_entity_write(&id).await?;
        let request = guard.request(id).ok_or(EngineError::NotFound(id))?;
        if request.status != RequestStatus::Pending {
            // Re-deciding must not silently succeed, and must not touch the
            // stored decision fields.
            return Err(EngineError::AlreadyDecided(id));
        }

        let decided_at = now_ms();
        let event = match decision {
            VacationDecision::Approve => Event::VacationApproved {
                id,
                employee_id,
                decided_by,
                decided_at,
                comment,
            },
            VacationDecision::Reject => Event::VacationRejected {
                id,
                employee_id,
                decided_by,
                decided_at,
                comment,
            },
        };
        self.persist_and_apply(employee_id, &mut guard, &event).await?;
        Ok(guard.request(id).expect("request still present").clone())
    }

    /// Deleting a request is allowed in any state and is idempotent.
    /// Returns whether a request was actually removed. An approved
    /// request's calendar block goes with it.
    pub async fn delete_vacation(&self, id: Ulid) -> Result<bool, EngineError> {
        let Some(employee_id) = self.get_employee_for_entity(&id) else {
            return Ok(false);
        };
        let rs = match self.get_employee(&employee_id) {
            Some(rs) => rs,
            None => return Ok(false),
        };
        let mut guard = rs.write().await;
        if guard.request(id).is_none() {
            // The id belongs to a task, not a vacation request.
            return Ok(false);
        }
        let event = Event::VacationDeleted { id, employee_id };
        self.persist_and_apply(employee_id, &mut guard, &event).await?;
        Ok(true)
    }
}
