//! Per-tenant bounds. Everything a client can grow is capped.

use chrono::NaiveDate;

pub const MAX_EMPLOYEES_PER_TENANT: usize = 4_096;
pub const MAX_LOCATIONS_PER_TENANT: usize = 1_024;
pub const MAX_COVERAGE_RULES: usize = MAX_LOCATIONS_PER_TENANT * 7;
pub const MAX_ENTRIES_PER_EMPLOYEE: usize = 65_536;
pub const MAX_REQUESTS_PER_EMPLOYEE: usize = 4_096;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_REASON_LEN: usize = 2_048;
pub const MAX_COMMENT_LEN: usize = 2_048;

/// Longest accepted vacation/day-off span, inclusive days.
pub const MAX_VACATION_SPAN_DAYS: i64 = 366;
/// Longest accepted multi-day task span, inclusive days.
pub const MAX_TASK_SPAN_DAYS: i64 = 92;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Accepted calendar window for any stored date.
pub fn min_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid constant date")
}

pub fn max_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 12, 31).expect("valid constant date")
}
