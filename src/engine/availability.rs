use chrono::NaiveDate;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Scan an employee's calendar for a vacation block covering `date`.
/// Blocks exist only for approved requests, so this IS the approved-request
/// scan: inclusive on both ends, calendar-date granularity, no time-of-day
/// component.
pub fn vacation_info_on(employee: &EmployeeState, date: NaiveDate) -> Option<VacationKind> {
    employee.entries_on(date).find_map(|e| match &e.kind {
        EntryKind::VacationBlock { kind } => Some(*kind),
        _ => None,
    })
}

pub fn is_available_on(employee: &EmployeeState, date: NaiveDate) -> bool {
    vacation_info_on(employee, date).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn employee_with(entries: Vec<Entry>) -> EmployeeState {
        let mut rs = EmployeeState::new(
            Ulid::new(),
            "Luis Pérez".into(),
            "luis@example.com".into(),
            None,
            Role::Staff,
            true,
        );
        for e in entries {
            rs.insert_entry(e);
        }
        rs
    }

    fn block(start: NaiveDate, end: NaiveDate, kind: VacationKind) -> Entry {
        Entry {
            id: Ulid::new(),
            start_date: start,
            end_date: Some(end),
            kind: EntryKind::VacationBlock { kind },
        }
    }

    fn task(date: NaiveDate) -> Entry {
        Entry {
            id: Ulid::new(),
            start_date: date,
            end_date: None,
            kind: EntryKind::Task {
                title: "t".into(),
                location_id: Ulid::new(),
                window: TimeWindow::new(540, 600),
            },
        }
    }

    #[test]
    fn empty_calendar_is_available() {
        let emp = employee_with(vec![]);
        assert!(is_available_on(&emp, d(2026, 1, 15)));
        assert_eq!(vacation_info_on(&emp, d(2026, 1, 15)), None);
    }

    #[test]
    fn block_covers_inclusive_bounds() {
        let emp = employee_with(vec![block(d(2026, 1, 20), d(2026, 1, 24), VacationKind::Vacation)]);
        assert!(!is_available_on(&emp, d(2026, 1, 20)));
        assert!(!is_available_on(&emp, d(2026, 1, 22)));
        assert!(!is_available_on(&emp, d(2026, 1, 24)));
        assert!(is_available_on(&emp, d(2026, 1, 19)));
        assert!(is_available_on(&emp, d(2026, 1, 25)));
    }

    #[test]
    fn single_day_off_block() {
        let emp = employee_with(vec![block(d(2026, 1, 18), d(2026, 1, 18), VacationKind::DayOff)]);
        assert_eq!(
            vacation_info_on(&emp, d(2026, 1, 18)),
            Some(VacationKind::DayOff)
        );
        assert_eq!(vacation_info_on(&emp, d(2026, 1, 17)), None);
    }

    #[test]
    fn tasks_never_make_employee_unavailable() {
        let emp = employee_with(vec![task(d(2026, 1, 15))]);
        assert!(is_available_on(&emp, d(2026, 1, 15)));
    }

    #[test]
    fn first_matching_block_kind_wins() {
        let emp = employee_with(vec![
            block(d(2026, 1, 10), d(2026, 1, 12), VacationKind::Vacation),
            block(d(2026, 1, 12), d(2026, 1, 14), VacationKind::DayOff),
        ]);
        // Both cover the 12th; calendar order decides which kind is reported
        assert_eq!(
            vacation_info_on(&emp, d(2026, 1, 12)),
            Some(VacationKind::Vacation)
        );
    }
}
