use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_dates(
    start: NaiveDate,
    end: Option<NaiveDate>,
    max_span_days: i64,
) -> Result<(), EngineError> {
    if start < min_valid_date() || start > max_valid_date() {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if let Some(end) = end {
        if end < min_valid_date() || end > max_valid_date() {
            return Err(EngineError::LimitExceeded("date out of range"));
        }
        if end < start {
            return Err(EngineError::InvalidRange { start, end });
        }
        if (end - start).num_days() + 1 > max_span_days {
            return Err(EngineError::LimitExceeded("span too wide"));
        }
    }
    Ok(())
}

pub(crate) fn validate_window(window: &TimeWindow) -> Result<(), EngineError> {
    if window.start >= window.end || window.start < 0 || window.end > MINUTES_PER_DAY {
        return Err(EngineError::InvalidTimeRange {
            start: window.start,
            end: window.end,
        });
    }
    Ok(())
}

/// A proposed task, as far as the conflict detectors care: who, where,
/// which date, which time window, and (when editing) which task to ignore.
#[derive(Debug, Clone, Copy)]
pub struct TaskCandidate {
    pub employee_id: Ulid,
    pub location_id: Ulid,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub exclude_task: Option<Ulid>,
}

fn task_fields(entry: &Entry) -> Option<(Ulid, TimeWindow)> {
    match &entry.kind {
        EntryKind::Task { location_id, window, .. } => Some((*location_id, *window)),
        EntryKind::VacationBlock { .. } => None,
    }
}

/// First existing task of the same employee on the candidate's start date
/// whose `[start, end)` minute window overlaps the candidate's. Calendar
/// order is stable, so the same conflict is reported every time; callers
/// present it to the operator, who may still proceed — this never blocks.
pub fn find_time_conflict<'a>(
    employee: &'a EmployeeState,
    candidate: &TaskCandidate,
) -> Option<&'a Entry> {
    employee.entries_on(candidate.date).find(|entry| {
        if candidate.exclude_task == Some(entry.id) {
            return false;
        }
        match task_fields(entry) {
            Some((_, window)) => window.overlaps(&candidate.window),
            None => false,
        }
    })
}

/// Same overlap test, but against tasks at the candidate's location that
/// belong to a DIFFERENT employee. Same-employee overlap at one location is
/// already the time conflict's job.
pub fn find_location_conflict<'a>(
    other_employee: &'a EmployeeState,
    candidate: &TaskCandidate,
) -> Option<&'a Entry> {
    if other_employee.id == candidate.employee_id {
        return None;
    }
    other_employee.entries_on(candidate.date).find(|entry| {
        if candidate.exclude_task == Some(entry.id) {
            return false;
        }
        match task_fields(entry) {
            Some((location_id, window)) => {
                location_id == candidate.location_id && window.overlaps(&candidate.window)
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn employee(id: Ulid) -> EmployeeState {
        EmployeeState::new(id, "x".into(), "x@example.com".into(), None, Role::Staff, true)
    }

    fn task(id: Ulid, date: NaiveDate, location_id: Ulid, start: Minutes, end: Minutes) -> Entry {
        Entry {
            id,
            start_date: date,
            end_date: None,
            kind: EntryKind::Task {
                title: "t".into(),
                location_id,
                window: TimeWindow::new(start, end),
            },
        }
    }

    fn candidate(employee_id: Ulid, location_id: Ulid, date: NaiveDate, start: Minutes, end: Minutes) -> TaskCandidate {
        TaskCandidate {
            employee_id,
            location_id,
            date,
            window: TimeWindow::new(start, end),
            exclude_task: None,
        }
    }

    #[test]
    fn overlapping_same_day_conflicts() {
        let eid = Ulid::new();
        let loc = Ulid::new();
        let mut emp = employee(eid);
        let existing = Ulid::new();
        emp.insert_entry(task(existing, d(2026, 1, 15), loc, 540, 660)); // 09:00-11:00
        let hit = find_time_conflict(&emp, &candidate(eid, loc, d(2026, 1, 15), 600, 720));
        assert_eq!(hit.map(|e| e.id), Some(existing));
    }

    #[test]
    fn back_to_back_never_conflicts() {
        let eid = Ulid::new();
        let loc = Ulid::new();
        let mut emp = employee(eid);
        emp.insert_entry(task(Ulid::new(), d(2026, 1, 15), loc, 540, 600)); // 09:00-10:00
        let hit = find_time_conflict(&emp, &candidate(eid, loc, d(2026, 1, 15), 600, 660)); // 10:00-11:00
        assert!(hit.is_none());
    }

    #[test]
    fn different_day_never_conflicts() {
        let eid = Ulid::new();
        let loc = Ulid::new();
        let mut emp = employee(eid);
        emp.insert_entry(task(Ulid::new(), d(2026, 1, 14), loc, 540, 660));
        let hit = find_time_conflict(&emp, &candidate(eid, loc, d(2026, 1, 15), 540, 660));
        assert!(hit.is_none());
    }

    #[test]
    fn excluded_task_is_ignored() {
        let eid = Ulid::new();
        let loc = Ulid::new();
        let mut emp = employee(eid);
        let editing = Ulid::new();
        emp.insert_entry(task(editing, d(2026, 1, 15), loc, 540, 660));
        let mut cand = candidate(eid, loc, d(2026, 1, 15), 600, 720);
        cand.exclude_task = Some(editing);
        assert!(find_time_conflict(&emp, &cand).is_none());
    }

    #[test]
    fn first_match_in_calendar_order_is_reported() {
        let eid = Ulid::new();
        let loc = Ulid::new();
        let mut emp = employee(eid);
        let first = Ulid::new();
        let second = Ulid::new();
        emp.insert_entry(task(first, d(2026, 1, 15), loc, 540, 720));
        emp.insert_entry(task(second, d(2026, 1, 15), loc, 600, 780));
        // Candidate overlaps both; the one inserted first wins
        let hit = find_time_conflict(&emp, &candidate(eid, loc, d(2026, 1, 15), 630, 690));
        assert_eq!(hit.map(|e| e.id), Some(first));
    }

    #[test]
    fn vacation_block_is_not_a_time_conflict() {
        let eid = Ulid::new();
        let loc = Ulid::new();
        let mut emp = employee(eid);
        emp.insert_entry(Entry {
            id: Ulid::new(),
            start_date: d(2026, 1, 15),
            end_date: Some(d(2026, 1, 15)),
            kind: EntryKind::VacationBlock { kind: VacationKind::DayOff },
        });
        assert!(find_time_conflict(&emp, &candidate(eid, loc, d(2026, 1, 15), 540, 660)).is_none());
    }

    #[test]
    fn location_conflict_flags_other_employee() {
        let me = Ulid::new();
        let other = Ulid::new();
        let loc = Ulid::new();
        let mut other_emp = employee(other);
        let existing = Ulid::new();
        other_emp.insert_entry(task(existing, d(2026, 1, 15), loc, 540, 660));
        let hit = find_location_conflict(&other_emp, &candidate(me, loc, d(2026, 1, 15), 600, 720));
        assert_eq!(hit.map(|e| e.id), Some(existing));
    }

    #[test]
    fn location_conflict_ignores_same_employee() {
        let me = Ulid::new();
        let loc = Ulid::new();
        let mut my_state = employee(me);
        my_state.insert_entry(task(Ulid::new(), d(2026, 1, 15), loc, 540, 660));
        // Same employee, same location, overlapping time — not a location conflict
        assert!(find_location_conflict(&my_state, &candidate(me, loc, d(2026, 1, 15), 600, 720)).is_none());
    }

    #[test]
    fn location_conflict_ignores_other_locations() {
        let me = Ulid::new();
        let other = Ulid::new();
        let mut other_emp = employee(other);
        other_emp.insert_entry(task(Ulid::new(), d(2026, 1, 15), Ulid::new(), 540, 660));
        let hit = find_location_conflict(&other_emp, &candidate(me, Ulid::new(), d(2026, 1, 15), 600, 720));
        assert!(hit.is_none());
    }

    #[test]
    fn window_validation() {
        assert!(validate_window(&TimeWindow { start: 540, end: 600 }).is_ok());
        assert!(matches!(
            validate_window(&TimeWindow { start: 600, end: 600 }),
            Err(EngineError::InvalidTimeRange { .. })
        ));
        assert!(matches!(
            validate_window(&TimeWindow { start: 660, end: 600 }),
            Err(EngineError::InvalidTimeRange { .. })
        ));
        assert!(validate_window(&TimeWindow { start: 0, end: MINUTES_PER_DAY }).is_ok());
        assert!(validate_window(&TimeWindow { start: -10, end: 60 }).is_err());
    }

    #[test]
    fn date_validation() {
        let start = d(2026, 1, 20);
        assert!(validate_dates(start, None, MAX_TASK_SPAN_DAYS).is_ok());
        assert!(matches!(
            validate_dates(start, Some(d(2026, 1, 15)), MAX_VACATION_SPAN_DAYS),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(validate_dates(start, Some(d(2026, 1, 20)), MAX_VACATION_SPAN_DAYS).is_ok());
        assert!(matches!(
            validate_dates(d(1901, 1, 1), None, MAX_TASK_SPAN_DAYS),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_dates(start, Some(d(2028, 1, 20)), MAX_VACATION_SPAN_DAYS),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
