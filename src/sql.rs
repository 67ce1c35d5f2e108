use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertEmployee {
        id: Ulid,
        name: String,
        email: String,
        color: Option<String>,
        role: Role,
        active: bool,
    },
    UpdateEmployee {
        id: Ulid,
        name: String,
        email: String,
        color: Option<String>,
        role: Role,
        active: bool,
    },
    DeleteEmployee {
        id: Ulid,
    },
    InsertLocation {
        id: Ulid,
        name: String,
        address: String,
        city: String,
    },
    UpdateLocation {
        id: Ulid,
        name: String,
        address: String,
        city: String,
    },
    DeleteLocation {
        id: Ulid,
    },
    InsertCoverageRule {
        id: Ulid,
        location_id: Ulid,
        weekday: u8,
    },
    DeleteCoverageRule {
        id: Ulid,
    },
    InsertTask {
        id: Ulid,
        title: String,
        employee_id: Option<Ulid>,
        location_id: Option<Ulid>,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: Minutes,
        end_time: Minutes,
    },
    UpdateTask {
        id: Ulid,
        title: String,
        employee_id: Option<Ulid>,
        location_id: Option<Ulid>,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: Minutes,
        end_time: Minutes,
    },
    DeleteTask {
        id: Ulid,
    },
    InsertVacationRequest {
        id: Ulid,
        employee_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        kind: VacationKind,
        reason: Option<String>,
    },
    DecideVacationRequest {
        id: Ulid,
        approve: bool,
        decided_by: Ulid,
        comment: Option<String>,
    },
    DeleteVacationRequest {
        id: Ulid,
    },
    SelectEmployees,
    SelectLocations,
    SelectCoverageRules {
        location_id: Option<Ulid>,
    },
    SelectTasks {
        employee_id: Option<Ulid>,
        date: Option<NaiveDate>,
    },
    SelectVacationRequests {
        employee_id: Option<Ulid>,
        status: Option<RequestStatus>,
    },
    SelectAvailability {
        employee_id: Ulid,
        date: NaiveDate,
    },
    SelectTimeConflict {
        employee_id: Ulid,
        date: NaiveDate,
        start_time: Minutes,
        end_time: Minutes,
        exclude_task: Option<Ulid>,
    },
    SelectLocationConflict {
        location_id: Ulid,
        employee_id: Ulid,
        date: NaiveDate,
        start_time: Minutes,
        end_time: Minutes,
        exclude_task: Option<Ulid>,
    },
    SelectMissingCoverage {
        date: NaiveDate,
    },
    Listen {
        channel: String,
    },
    /// `UNLISTEN *` clears every subscription.
    Unlisten {
        channel: Option<String>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN") {
        let rest = trimmed[8..].trim().trim_matches(';').trim();
        let channel = match rest {
            "" | "*" => None,
            c => Some(c.to_string()),
        };
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "employees" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("employees", 3, values.len()));
            }
            let color = if values.len() >= 4 {
                parse_string_or_null(&values[3])?
            } else {
                None
            };
            let role = if values.len() >= 5 {
                parse_role(&values[4])?
            } else {
                Role::Staff
            };
            let active = if values.len() >= 6 {
                parse_bool(&values[5])?
            } else {
                true
            };
            Ok(Command::InsertEmployee {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                email: parse_string(&values[2])?,
                color,
                role,
                active,
            })
        }
        "locations" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("locations", 2, values.len()));
            }
            let address = if values.len() >= 3 {
                parse_string(&values[2])?
            } else {
                String::new()
            };
            let city = if values.len() >= 4 {
                parse_string(&values[3])?
            } else {
                String::new()
            };
            Ok(Command::InsertLocation {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                address,
                city,
            })
        }
        "coverage_rules" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("coverage_rules", 3, values.len()));
            }
            Ok(Command::InsertCoverageRule {
                id: parse_ulid(&values[0])?,
                location_id: parse_ulid(&values[1])?,
                weekday: parse_weekday(&values[2])?,
            })
        }
        "tasks" => {
            if values.len() < 8 {
                return Err(SqlError::WrongArity("tasks", 8, values.len()));
            }
            Ok(Command::InsertTask {
                id: parse_ulid(&values[0])?,
                title: parse_string(&values[1])?,
                employee_id: parse_ulid_or_null(&values[2])?,
                location_id: parse_ulid_or_null(&values[3])?,
                start_date: parse_date(&values[4])?,
                end_date: parse_date_or_null(&values[5])?,
                start_time: parse_time(&values[6])?,
                end_time: parse_time(&values[7])?,
            })
        }
        "vacation_requests" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("vacation_requests", 5, values.len()));
            }
            let reason = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertVacationRequest {
                id: parse_ulid(&values[0])?,
                employee_id: parse_ulid(&values[1])?,
                start_date: parse_date(&values[2])?,
                end_date: parse_date(&values[3])?,
                kind: parse_kind(&values[4])?,
                reason,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set: Vec<(String, &Expr)> = Vec::new();
    for a in assignments {
        let col = match &a.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty assignment column".into()))?,
            _ => return Err(SqlError::Parse("unsupported assignment target".into())),
        };
        set.push((col, &a.value));
    }
    let get = |col: &str| set.iter().find(|(c, _)| c == col).map(|(_, e)| *e);
    let require = |col: &'static str| get(col).ok_or(SqlError::MissingColumn(col));

    match table.as_str() {
        "employees" => Ok(Command::UpdateEmployee {
            id,
            name: parse_string(require("name")?)?,
            email: parse_string(require("email")?)?,
            color: match get("color") {
                Some(e) => parse_string_or_null(e)?,
                None => None,
            },
            role: match get("role") {
                Some(e) => parse_role(e)?,
                None => Role::Staff,
            },
            active: match get("active") {
                Some(e) => parse_bool(e)?,
                None => true,
            },
        }),
        "locations" => Ok(Command::UpdateLocation {
            id,
            name: parse_string(require("name")?)?,
            address: match get("address") {
                Some(e) => parse_string(e)?,
                None => String::new(),
            },
            city: match get("city") {
                Some(e) => parse_string(e)?,
                None => String::new(),
            },
        }),
        "tasks" => Ok(Command::UpdateTask {
            id,
            title: parse_string(require("title")?)?,
            employee_id: match get("employee_id") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
            location_id: match get("location_id") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
            start_date: parse_date(require("start_date")?)?,
            end_date: match get("end_date") {
                Some(e) => parse_date_or_null(e)?,
                None => None,
            },
            start_time: parse_time(require("start_time")?)?,
            end_time: parse_time(require("end_time")?)?,
        }),
        "vacation_requests" => {
            let status = parse_string(require("status")?)?;
            let approve = match status.to_lowercase().as_str() {
                "approved" => true,
                "rejected" => false,
                other => {
                    return Err(SqlError::Parse(format!(
                        "status must be 'approved' or 'rejected', got '{other}'"
                    )));
                }
            };
            Ok(Command::DecideVacationRequest {
                id,
                approve,
                decided_by: parse_ulid(require("decided_by")?)?,
                comment: match get("comment") {
                    Some(e) => parse_string_or_null(e)?,
                    None => None,
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "employees" => Ok(Command::DeleteEmployee { id }),
        "locations" => Ok(Command::DeleteLocation { id }),
        "coverage_rules" => Ok(Command::DeleteCoverageRule { id }),
        "tasks" => Ok(Command::DeleteTask { id }),
        "vacation_requests" => Ok(Command::DeleteVacationRequest { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters: Vec<(String, &Expr)> = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let get = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);
    let require = |col: &'static str| get(col).ok_or(SqlError::MissingFilter(col));

    match table.as_str() {
        "employees" => Ok(Command::SelectEmployees),
        "locations" => Ok(Command::SelectLocations),
        "coverage_rules" => Ok(Command::SelectCoverageRules {
            location_id: match get("location_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            },
        }),
        "tasks" => Ok(Command::SelectTasks {
            employee_id: match get("employee_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            },
            date: match get("date") {
                Some(e) => Some(parse_date(e)?),
                None => None,
            },
        }),
        "vacation_requests" => Ok(Command::SelectVacationRequests {
            employee_id: match get("employee_id") {
                Some(e) => Some(parse_ulid(e)?),
                None => None,
            },
            status: match get("status") {
                Some(e) => {
                    let s = parse_string(e)?;
                    Some(
                        RequestStatus::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad status: {s}")))?,
                    )
                }
                None => None,
            },
        }),
        "availability" => Ok(Command::SelectAvailability {
            employee_id: parse_ulid(require("employee_id")?)?,
            date: parse_date(require("date")?)?,
        }),
        "time_conflicts" => Ok(Command::SelectTimeConflict {
            employee_id: parse_ulid(require("employee_id")?)?,
            date: parse_date(require("date")?)?,
            start_time: parse_time(require("start_time")?)?,
            end_time: parse_time(require("end_time")?)?,
            exclude_task: match get("exclude_task") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
        }),
        "location_conflicts" => Ok(Command::SelectLocationConflict {
            location_id: parse_ulid(require("location_id")?)?,
            employee_id: parse_ulid(require("employee_id")?)?,
            date: parse_date(require("date")?)?,
            start_time: parse_time(require("start_time")?)?,
            end_time: parse_time(require("end_time")?)?,
            exclude_task: match get("exclude_task") {
                Some(e) => parse_ulid_or_null(e)?,
                None => None,
            },
        }),
        "missing_coverage" => Ok(Command::SelectMissingCoverage {
            date: parse_date(require("date")?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `col = value` terms joined by AND. Anything else in the WHERE
/// clause is rejected — the virtual tables only support equality filters.
fn collect_eq_filters<'a>(
    expr: &'a Expr,
    filters: &mut Vec<(String, &'a Expr)>,
) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, filters)?;
                collect_eq_filters(right, filters)?;
                Ok(())
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                filters.push((col, right));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(None);
    }
    parse_date(expr).map(Some)
}

fn parse_time(expr: &Expr) -> Result<Minutes, SqlError> {
    let s = parse_string(expr)?;
    parse_hhmm(&s).ok_or_else(|| SqlError::Parse(format!("bad time '{s}': expected HH:MM")))
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    let s = parse_string(expr)?;
    Role::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad role: {s}")))
}

fn parse_kind(expr: &Expr) -> Result<VacationKind, SqlError> {
    let s = parse_string(expr)?;
    VacationKind::parse(&s).ok_or_else(|| SqlError::Parse(format!("bad vacation type: {s}")))
}

fn parse_weekday(expr: &Expr) -> Result<u8, SqlError> {
    if let Some(Value::Number(s, _)) = extract_value(expr) {
        s.parse()
            .map_err(|e| SqlError::Parse(format!("bad weekday: {e}")))
    } else {
        Err(SqlError::Parse(format!("expected weekday number, got {expr:?}")))
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    MissingColumn(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingColumn(col) => write!(f, "missing SET column: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
