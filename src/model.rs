use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — used for decision timestamps only.
pub type Ms = i64;

/// Minute of day, 0..1440. Times of day are compared in minutes;
/// seconds in the wire format are truncated.
pub type Minutes = i32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Parse `HH:MM` or `HH:MM:SS` into minutes since midnight.
/// Seconds, if present, are truncated.
pub fn parse_hhmm(s: &str) -> Option<Minutes> {
    let mut parts = s.splitn(3, ':');
    let h: Minutes = parts.next()?.parse().ok()?;
    let m: Minutes = parts.next()?.parse().ok()?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    Some(h * 60 + m)
}

/// Format minutes since midnight back to `HH:MM`.
pub fn format_minutes(min: Minutes) -> String {
    format!("{:02}:{:02}", min / 60, min % 60)
}

/// Half-open `[start, end)` minute-of-day window within a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Minutes,
    pub end: Minutes,
}

impl TimeWindow {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "TimeWindow start must be before end");
        Self { start, end }
    }

    /// Overlap test for half-open intervals: back-to-back windows
    /// (`09:00-10:00` vs `10:00-11:00`) never overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }
}

/// Inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Inclusive-range overlap: `newStart <= existingEnd && newEnd >= existingStart`.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Weekday as 0=Sunday..6=Saturday. Source data sometimes carries 7 for
/// Sunday; both forms are accepted and normalized to 0.
pub fn normalize_weekday(day: u8) -> Option<u8> {
    match day {
        0..=6 => Some(day),
        7 => Some(0),
        _ => None,
    }
}

pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VacationKind {
    Vacation,
    DayOff,
}

impl VacationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VacationKind::Vacation => "vacation",
            VacationKind::DayOff => "day-off",
        }
    }

    pub fn parse(s: &str) -> Option<VacationKind> {
        match s.to_lowercase().as_str() {
            "vacation" => Some(VacationKind::Vacation),
            "day-off" | "dayoff" => Some(VacationKind::DayOff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<RequestStatus> {
        match s.to_lowercase().as_str() {
            "pending" => Some(RequestStatus::Pending),
            "approved" => Some(RequestStatus::Approved),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub name: String,
    pub address: String,
    pub city: String,
}

/// One rule per (location, weekday): that location must be staffed on that
/// weekday. Rules keep their definition order for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRule {
    pub id: Ulid,
    pub location_id: Ulid,
    pub weekday: u8,
}

/// What a calendar entry represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A work assignment at a location with a time window.
    Task {
        title: String,
        location_id: Ulid,
        window: TimeWindow,
    },
    /// Materialized from an approved vacation request. Read-only through
    /// the task commands; removed only when its request is deleted.
    VacationBlock { kind: VacationKind },
}

/// A single entry on an employee's calendar — tasks and vacation blocks
/// are both just entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Ulid,
    pub start_date: NaiveDate,
    /// Multi-day span. For tasks a stored end strictly after the start is
    /// exclusive-by-one (calendar-export convention); for vacation blocks
    /// the end is inclusive.
    pub end_date: Option<NaiveDate>,
    pub kind: EntryKind,
}

impl Entry {
    pub fn is_task(&self) -> bool {
        matches!(self.kind, EntryKind::Task { .. })
    }

    /// Last calendar date the entry occupies, after the exclusive-by-one
    /// adjustment for multi-day tasks.
    pub fn effective_end(&self) -> NaiveDate {
        match self.end_date {
            None => self.start_date,
            Some(end) => match &self.kind {
                EntryKind::Task { .. } if end > self.start_date => {
                    end.pred_opt().unwrap_or(end)
                }
                _ => end,
            },
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.effective_end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationRequest {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub range: DateRange,
    pub kind: VacationKind,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub decided_by: Option<Ulid>,
    pub decided_at: Option<Ms>,
    pub comment: Option<String>,
}

impl VacationRequest {
    /// "Completed" is a derived view, never stored: an approved request
    /// whose range ended strictly before `today`.
    pub fn is_completed(&self, today: NaiveDate) -> bool {
        self.status == RequestStatus::Approved && self.range.end < today
    }
}

#[derive(Debug, Clone)]
pub struct EmployeeState {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub color: Option<String>,
    pub role: Role,
    pub active: bool,
    /// Calendar entries (tasks + vacation blocks), sorted by start_date.
    pub entries: Vec<Entry>,
    /// Vacation requests in submission order.
    pub requests: Vec<VacationRequest>,
}

impl EmployeeState {
    pub fn new(id: Ulid, name: String, email: String, color: Option<String>, role: Role, active: bool) -> Self {
        Self {
            id,
            name,
            email,
            color,
            role,
            active,
            entries: Vec::new(),
            requests: Vec::new(),
        }
    }

    /// Insert entry maintaining sort order by start_date. Entries sharing a
    /// start_date keep insertion order, which makes conflict reporting
    /// deterministic.
    pub fn insert_entry(&mut self, entry: Entry) {
        let pos = self
            .entries
            .partition_point(|e| e.start_date <= entry.start_date);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    pub fn entry(&self, id: Ulid) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries covering `date`, in calendar order. Binary search skips
    /// everything starting after `date`; earlier multi-day entries are
    /// filtered by their effective end.
    pub fn entries_on(&self, date: NaiveDate) -> impl Iterator<Item = &Entry> {
        let right_bound = self.entries.partition_point(|e| e.start_date <= date);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.covers(date))
    }

    pub fn request(&self, id: Ulid) -> Option<&VacationRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn request_mut(&mut self, id: Ulid) -> Option<&mut VacationRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }

    pub fn remove_request(&mut self, id: Ulid) -> Option<VacationRequest> {
        if let Some(pos) = self.requests.iter().position(|r| r.id == id) {
            Some(self.requests.remove(pos))
        } else {
            None
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EmployeeCreated {
        id: Ulid,
        name: String,
        email: String,
        color: Option<String>,
        role: Role,
        active: bool,
    },
    EmployeeUpdated {
        id: Ulid,
        name: String,
        email: String,
        color: Option<String>,
        role: Role,
        active: bool,
    },
    EmployeeDeleted {
        id: Ulid,
    },
    LocationCreated {
        id: Ulid,
        name: String,
        address: String,
        city: String,
    },
    LocationUpdated {
        id: Ulid,
        name: String,
        address: String,
        city: String,
    },
    LocationDeleted {
        id: Ulid,
    },
    CoverageRuleAdded {
        id: Ulid,
        location_id: Ulid,
        weekday: u8,
    },
    CoverageRuleRemoved {
        id: Ulid,
    },
    TaskCreated {
        id: Ulid,
        employee_id: Ulid,
        location_id: Ulid,
        title: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        window: TimeWindow,
    },
    TaskUpdated {
        id: Ulid,
        /// Owner before the update — differs from employee_id on reassignment.
        prev_employee_id: Ulid,
        employee_id: Ulid,
        location_id: Ulid,
        title: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        window: TimeWindow,
    },
    TaskDeleted {
        id: Ulid,
        employee_id: Ulid,
    },
    VacationSubmitted {
        id: Ulid,
        employee_id: Ulid,
        range: DateRange,
        kind: VacationKind,
        reason: Option<String>,
    },
    VacationApproved {
        id: Ulid,
        employee_id: Ulid,
        decided_by: Ulid,
        decided_at: Ms,
        comment: Option<String>,
    },
    VacationRejected {
        id: Ulid,
        employee_id: Ulid,
        decided_by: Ulid,
        decided_at: Ms,
        comment: Option<String>,
    },
    VacationDeleted {
        id: Ulid,
        employee_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeInfo {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub color: Option<String>,
    pub role: Role,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub location_id: Ulid,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationRequestInfo {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub range: DateRange,
    pub kind: VacationKind,
    pub reason: Option<String>,
    pub status: RequestStatus,
    pub decided_by: Option<Ulid>,
    pub decided_at: Option<Ms>,
    pub comment: Option<String>,
    pub completed: bool,
}

/// A location left unstaffed on a day its coverage rule requires staffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRef {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityInfo {
    pub available: bool,
    pub vacation_kind: Option<VacationKind>,
}
