use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::availability::vacation_info_on;
use super::conflict::{find_location_conflict, find_time_conflict, TaskCandidate};
use super::coverage::missing_from_required;
use super::{Engine, EngineError};

fn entry_to_task_info(entry: &Entry, employee_id: Ulid) -> Option<TaskInfo> {
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
    /// Employee ids in sorted order. All cross-employee scans iterate in
    /// this order so query results are deterministic.
    fn sorted_employee_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.employees.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn list_employees(&self) -> Vec<EmployeeInfo> {
        let mut out = Vec::new();
        for id in self.sorted_employee_ids() {
            if let Some(entry) = self.employees.get(&id) {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_employees: uncontended read");
                out.push(EmployeeInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    email: guard.email.clone(),
                    color: guard.color.clone(),
                    role: guard.role,
                    active: guard.active,
                });
            }
        }
        out
    }

    pub async fn get_employee_info(&self, id: Ulid) -> Option<EmployeeInfo> {
        let rs = self.get_employee(&id)?;
        let guard = rs.read().await;
        Some(EmployeeInfo {
            id: guard.id,
            name: guard.name.clone(),
            email: guard.email.clone(),
            color: guard.color.clone(),
            role: guard.role,
            active: guard.active,
        })
    }

    pub fn list_locations(&self) -> Vec<Location> {
        let mut out: Vec<Location> = self.locations.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn get_location(&self, id: &Ulid) -> Option<Location> {
        self.locations.get(id).map(|e| e.value().clone())
    }

    pub async fn list_coverage_rules(&self, location_id: Option<Ulid>) -> Vec<CoverageRule> {
        let rules = self.coverage.read().await;
        rules
            .iter()
            .filter(|r| location_id.is_none_or(|l| r.location_id == l))
            .copied()
            .collect()
    }

    pub async fn list_tasks(
        &self,
        employee_id: Option<Ulid>,
        date: Option<NaiveDate>,
    ) -> Vec<TaskInfo> {
        let ids = match employee_id {
            Some(id) => vec![id],
            None => self.sorted_employee_ids(),
        };
        let mut out = Vec::new();
        for eid in ids {
            let Some(rs) = self.get_employee(&eid) else { continue };
            let guard = rs.read().await;
            for entry in &guard.entries {
                if let Some(d) = date
                    && !entry.covers(d) {
                        continue;
                    }
                if let Some(info) = entry_to_task_info(entry, eid) {
                    out.push(info);
                }
            }
        }
        out.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then(a.window.start.cmp(&b.window.start))
                .then(a.id.cmp(&b.id))
        });
        out
    }

    /// Requests with the derived completed flag. `today` is supplied by the
    /// caller so the engine stays clock-free and tests stay deterministic.
    pub async fn list_vacation_requests(
        &self,
        employee_id: Option<Ulid>,
        status: Option<RequestStatus>,
        today: NaiveDate,
    ) -> Vec<VacationRequestInfo> {
        let ids = match employee_id {
            Some(id) => vec![id],
            None => self.sorted_employee_ids(),
        };
        let mut out = Vec::new();
        for eid in ids {
            let Some(rs) = self.get_employee(&eid) else { continue };
            let guard = rs.read().await;
            for req in &guard.requests {
                if status.is_some_and(|s| req.status != s) {
                    continue;
                }
                out.push(VacationRequestInfo {
                    id: req.id,
                    employee_id: req.employee_id,
                    range: req.range,
                    kind: req.kind,
                    reason: req.reason.clone(),
                    status: req.status,
                    decided_by: req.decided_by,
                    decided_at: req.decided_at,
                    comment: req.comment.clone(),
                    completed: req.is_completed(today),
                });
            }
        }
        out
    }

    pub async fn availability(
        &self,
        employee_id: Ulid,
        date: NaiveDate,
    ) -> Result<AvailabilityInfo, EngineError> {
        let rs = self
            .get_employee(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = rs.read().await;
        let kind = vacation_info_on(&guard, date);
        Ok(AvailabilityInfo {
            available: kind.is_none(),
            vacation_kind: kind,
        })
    }

    /// Advisory: first overlapping same-employee task, or None. An unknown
    /// employee simply has no conflicts.
    pub async fn check_time_conflict(&self, candidate: &TaskCandidate) -> Option<TaskInfo> {
        let rs = self.get_employee(&candidate.employee_id)?;
        let guard = rs.read().await;
        find_time_conflict(&guard, candidate).and_then(|e| entry_to_task_info(e, guard.id))
    }

    /// Advisory: first task of a different employee at the candidate's
    /// location with an overlapping window. Employees are scanned in
    /// sorted-id order for deterministic reporting.
    pub async fn check_location_conflict(&self, candidate: &TaskCandidate) -> Option<TaskInfo> {
        for eid in self.sorted_employee_ids() {
            if eid == candidate.employee_id {
                continue;
            }
            let Some(rs) = self.get_employee(&eid) else { continue };
            let guard = rs.read().await;
            if let Some(info) =
                find_location_conflict(&guard, candidate).and_then(|e| entry_to_task_info(e, eid))
            {
                return Some(info);
            }
        }
        None
    }

    /// Locations with a coverage rule for `date`'s weekday but no task
    /// spanning `date`. Vacation blocks never count as coverage. Rule
    /// definition order is preserved; an empty rule set short-circuits.
    pub async fn missing_coverage(&self, date: NaiveDate) -> Vec<LocationRef> {
        let weekday = weekday_of(date);
        let rules: Vec<CoverageRule> = {
            let guard = self.coverage.read().await;
            guard
                .iter()
                .filter(|r| normalize_weekday(r.weekday) == Some(weekday))
                .copied()
                .collect()
        };
        if rules.is_empty() {
            return Vec::new();
        }

        let mut covered: HashSet<Ulid> = HashSet::new();
        for eid in self.sorted_employee_ids() {
            let Some(rs) = self.get_employee(&eid) else { continue };
            let guard = rs.read().await;
            for entry in guard.entries_on(date) {
                if let EntryKind::Task { location_id, .. } = &entry.kind {
                    covered.insert(*location_id);
                }
            }
        }

        missing_from_required(&rules, weekday, &covered)
            .into_iter()
            .map(|location_id| {
                let name = self
                    .get_location(&location_id)
                    .map(|l| l.name)
                    .unwrap_or_default();
                LocationRef { id: location_id, name }
            })
            .collect()
    }
}
