use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::Minutes;

/// Hard validation/business-rule errors. These abort the write entirely.
/// Advisory conditions (time/location conflicts, coverage gaps) are never
/// errors — they come back as query rows.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Task input without an employee. A task may float unassigned in a
    /// form, but never in the store.
    MissingEmployee,
    MissingLocation,
    /// Hard gate: the employee has an approved vacation block on the
    /// task's start date.
    EmployeeOnVacation {
        employee_id: Ulid,
        date: NaiveDate,
    },
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    InvalidTimeRange {
        start: Minutes,
        end: Minutes,
    },
    InvalidWeekday(u8),
    /// The new request overlaps an already-approved one; carries the
    /// blocking request's id.
    OverlapsApprovedVacation(Ulid),
    /// Idempotency guard: deciding a request twice is an error, not a
    /// silent success.
    AlreadyDecided(Ulid),
    /// Employee or location still referenced by tasks.
    HasTasks(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::MissingEmployee => write!(f, "task requires an employee"),
            EngineError::MissingLocation => write!(f, "task requires a location"),
            EngineError::EmployeeOnVacation { employee_id, date } => {
                write!(f, "employee {employee_id} is on vacation on {date}")
            }
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid date range: {start} > {end}")
            }
            EngineError::InvalidTimeRange { start, end } => {
                write!(f, "invalid time range: start {start} must be before end {end}")
            }
            EngineError::InvalidWeekday(d) => write!(f, "invalid weekday: {d}"),
            EngineError::OverlapsApprovedVacation(id) => {
                write!(f, "overlaps approved vacation request: {id}")
            }
            EngineError::AlreadyDecided(id) => {
                write!(f, "vacation request already decided: {id}")
            }
            EngineError::HasTasks(id) => {
                write!(f, "cannot delete {id}: still referenced by tasks")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
