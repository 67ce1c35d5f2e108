use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::RosterdAuthSource;
use crate::engine::{Engine, TaskCandidate, TaskInput, TaskUpdateOutcome, VacationDecision};
use crate::mailer::{MailMessage, Mailer};
use crate::model::*;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct RosterdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<RosterdQueryParser>,
    mailer: Arc<dyn Mailer>,
}

impl RosterdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(RosterdQueryParser),
            mailer,
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.dispatch(engine, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn dispatch(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertEmployee { id, name, email, color, role, active } => {
                engine
                    .create_employee(id, name, email, color, role, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateEmployee { id, name, email, color, role, active } => {
                engine
                    .update_employee(id, name, email, color, role, active)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteEmployee { id } => {
                engine.delete_employee(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertLocation { id, name, address, city } => {
                engine
                    .create_location(id, name, address, city)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateLocation { id, name, address, city } => {
                engine
                    .update_location(id, name, address, city)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteLocation { id } => {
                engine.delete_location(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertCoverageRule { id, location_id, weekday } => {
                engine
                    .add_coverage_rule(id, location_id, weekday)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteCoverageRule { id } => {
                engine.remove_coverage_rule(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertTask {
                id,
                title,
                employee_id,
                location_id,
                start_date,
                end_date,
                start_time,
                end_time,
            } => {
                let input = TaskInput {
                    title,
                    employee_id,
                    location_id,
                    start_date,
                    end_date,
                    window: TimeWindow { start: start_time, end: end_time },
                };
                let task = engine.create_task(id, input).await.map_err(engine_err)?;
                self.mail_task_assigned(engine, &task).await;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateTask {
                id,
                title,
                employee_id,
                location_id,
                start_date,
                end_date,
                start_time,
                end_time,
            } => {
                let input = TaskInput {
                    title,
                    employee_id,
                    location_id,
                    start_date,
                    end_date,
                    window: TimeWindow { start: start_time, end: end_time },
                };
                let outcome = engine.update_task(id, input).await.map_err(engine_err)?;
                self.mail_task_updated(engine, &outcome).await;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteTask { id } => {
                engine.delete_task(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertVacationRequest { id, employee_id, start_date, end_date, kind, reason } => {
                if start_date > end_date {
                    // Reject before DateRange::new's debug assertion can trip.
                    return Err(engine_err(crate::engine::EngineError::InvalidRange {
                        start: start_date,
                        end: end_date,
                    }));
                }
                engine
                    .submit_vacation(id, employee_id, DateRange::new(start_date, end_date), kind, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DecideVacationRequest { id, approve, decided_by, comment } => {
                let decision = if approve {
                    VacationDecision::Approve
                } else {
                    VacationDecision::Reject
                };
                let request = engine
                    .decide_vacation(id, decision, decided_by, comment)
                    .await
                    .map_err(engine_err)?;
                self.mail_vacation_decided(engine, &request).await;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteVacationRequest { id } => {
                let removed = engine.delete_vacation(id).await.map_err(engine_err)?;
                let rows = if removed { 1 } else { 0 };
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(rows))])
            }
            Command::SelectEmployees => {
                let schema = Arc::new(employees_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_employees()
                    .into_iter()
                    .map(|e| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&e.id.to_string())?;
                        encoder.encode_field(&e.name)?;
                        encoder.encode_field(&e.email)?;
                        encoder.encode_field(&e.color)?;
                        encoder.encode_field(&e.role.as_str())?;
                        encoder.encode_field(&e.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectLocations => {
                let schema = Arc::new(locations_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_locations()
                    .into_iter()
                    .map(|l| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&l.id.to_string())?;
                        encoder.encode_field(&l.name)?;
                        encoder.encode_field(&l.address)?;
                        encoder.encode_field(&l.city)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectCoverageRules { location_id } => {
                let schema = Arc::new(coverage_rules_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_coverage_rules(location_id)
                    .await
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.location_id.to_string())?;
                        encoder.encode_field(&(r.weekday as i16))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectTasks { employee_id, date } => {
                let tasks = engine.list_tasks(employee_id, date).await;
                Ok(vec![task_rows(tasks)])
            }
            Command::SelectVacationRequests { employee_id, status } => {
                let today = today();
                let schema = Arc::new(vacation_requests_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_vacation_requests(employee_id, status, today)
                    .await
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.employee_id.to_string())?;
                        encoder.encode_field(&r.range.start.to_string())?;
                        encoder.encode_field(&r.range.end.to_string())?;
                        encoder.encode_field(&r.kind.as_str())?;
                        encoder.encode_field(&r.reason)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&r.decided_by.map(|d| d.to_string()))?;
                        encoder.encode_field(&r.decided_at)?;
                        encoder.encode_field(&r.comment)?;
                        encoder.encode_field(&r.completed)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { employee_id, date } => {
                let info = engine.availability(employee_id, date).await.map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&employee_id.to_string())?;
                encoder.encode_field(&date.to_string())?;
                encoder.encode_field(&info.available)?;
                encoder.encode_field(&info.vacation_kind.map(|k| k.as_str()))?;
                let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectTimeConflict { employee_id, date, start_time, end_time, exclude_task } => {
                let candidate = TaskCandidate {
                    employee_id,
                    // The time detector never looks at the location.
                    location_id: Ulid::nil(),
                    date,
                    window: TimeWindow { start: start_time, end: end_time },
                    exclude_task,
                };
                let hit = engine.check_time_conflict(&candidate).await;
                Ok(vec![task_rows(hit.into_iter().collect())])
            }
            Command::SelectLocationConflict {
                location_id,
                employee_id,
                date,
                start_time,
                end_time,
                exclude_task,
            } => {
                let candidate = TaskCandidate {
                    employee_id,
                    location_id,
                    date,
                    window: TimeWindow { start: start_time, end: end_time },
                    exclude_task,
                };
                let hit = engine.check_location_conflict(&candidate).await;
                Ok(vec![task_rows(hit.into_iter().collect())])
            }
            Command::SelectMissingCoverage { date } => {
                let schema = Arc::new(missing_coverage_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .missing_coverage(date)
                    .await
                    .into_iter()
                    .map(|l| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&l.id.to_string())?;
                        encoder.encode_field(&l.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::Listen { channel } => {
                parse_employee_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                if let Some(channel) = channel {
                    parse_employee_channel(&channel)?;
                }
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
        }
    }

    // ── Mail dispatch (fire-and-forget, after commit) ────────

    async fn mail_task_assigned(&self, engine: &Engine, task: &TaskInfo) {
        let Some(employee) = engine.get_employee_info(task.employee_id).await else {
            return;
        };
        let location = engine
            .get_location(&task.location_id)
            .map(|l| l.name)
            .unwrap_or_default();
        let message = MailMessage::TaskAssigned {
            employee_name: employee.name,
            title: task.title.clone(),
            location,
            start_date: task.start_date,
            end_date: task.end_date,
            start_time: format_minutes(task.window.start),
            end_time: format_minutes(task.window.end),
        };
        self.deliver(&employee.email, &message);
    }

    async fn mail_task_updated(&self, engine: &Engine, outcome: &TaskUpdateOutcome) {
        let before = &outcome.before;
        let after = &outcome.after;
        let location = engine
            .get_location(&after.location_id)
            .map(|l| l.name)
            .unwrap_or_default();
        let old_location = engine
            .get_location(&before.location_id)
            .map(|l| l.name)
            .unwrap_or_default();

        if before.employee_id != after.employee_id {
            if let Some(prev) = engine.get_employee_info(before.employee_id).await {
                let message = MailMessage::TaskWithdrawn {
                    employee_name: prev.name.clone(),
                    title: before.title.clone(),
                    start_date: before.start_date,
                };
                self.deliver(&prev.email, &message);
                if let Some(next) = engine.get_employee_info(after.employee_id).await {
                    let message = MailMessage::TaskReassigned {
                        employee_name: next.name,
                        previous_employee_name: prev.name,
                        title: after.title.clone(),
                        location,
                        start_date: after.start_date,
                        start_time: format_minutes(after.window.start),
                        end_time: format_minutes(after.window.end),
                    };
                    self.deliver(&next.email, &message);
                }
            }
            return;
        }

        if let Some(employee) = engine.get_employee_info(after.employee_id).await {
            let message = MailMessage::TaskRescheduled {
                employee_name: employee.name,
                title: after.title.clone(),
                location,
                start_date: after.start_date,
                end_date: after.end_date,
                start_time: format_minutes(after.window.start),
                end_time: format_minutes(after.window.end),
                old_location,
                old_start_date: before.start_date,
                old_start_time: format_minutes(before.window.start),
                old_end_time: format_minutes(before.window.end),
            };
            self.deliver(&employee.email, &message);
        }
    }

    async fn mail_vacation_decided(&self, engine: &Engine, request: &VacationRequest) {
        let Some(employee) = engine.get_employee_info(request.employee_id).await else {
            return;
        };
        let decided_by_name = match request.decided_by {
            Some(id) => engine.get_employee_info(id).await.map(|e| e.name),
            None => None,
        };
        let message = MailMessage::VacationDecided {
            employee_name: employee.name,
            approved: request.status == RequestStatus::Approved,
            kind: request.kind.as_str().to_string(),
            start_date: request.range.start,
            end_date: request.range.end,
            comment: request.comment.clone(),
            decided_by_name,
        };
        self.deliver(&employee.email, &message);
    }

    /// Delivery failure is logged and swallowed: the write already
    /// committed and must not be rolled back or reported as failed.
    fn deliver(&self, to: &str, message: &MailMessage) {
        if let Err(e) = self.mailer.deliver(to, message) {
            tracing::warn!("mail delivery failed for {to}: {e}");
        }
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn parse_employee_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel.strip_prefix("employee_").ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("invalid channel: {channel} (expected employee_{{id}})"),
        )))
    })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn bool_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn employees_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("email"),
        text_field("color"),
        text_field("role"),
        bool_field("active"),
    ]
}

fn locations_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("address"),
        text_field("city"),
    ]
}

fn coverage_rules_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("location_id"),
        FieldInfo::new("weekday".into(), None, None, Type::INT2, FieldFormat::Text),
    ]
}

fn tasks_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("employee_id"),
        text_field("location_id"),
        text_field("title"),
        text_field("start_date"),
        text_field("end_date"),
        text_field("start_time"),
        text_field("end_time"),
    ]
}

fn vacation_requests_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("employee_id"),
        text_field("start_date"),
        text_field("end_date"),
        text_field("kind"),
        text_field("reason"),
        text_field("status"),
        text_field("decided_by"),
        FieldInfo::new("decided_at".into(), None, None, Type::INT8, FieldFormat::Text),
        text_field("comment"),
        bool_field("completed"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("employee_id"),
        text_field("date"),
        bool_field("available"),
        text_field("vacation_kind"),
    ]
}

fn missing_coverage_schema() -> Vec<FieldInfo> {
    vec![text_field("location_id"), text_field("name")]
}

fn task_rows(tasks: Vec<TaskInfo>) -> Response {
    let schema = Arc::new(tasks_schema());
    let rows: Vec<PgWireResult<_>> = tasks
        .into_iter()
        .map(|t| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&t.id.to_string())?;
            encoder.encode_field(&t.employee_id.to_string())?;
            encoder.encode_field(&t.location_id.to_string())?;
            encoder.encode_field(&t.title)?;
            encoder.encode_field(&t.start_date.to_string())?;
            encoder.encode_field(&t.end_date.map(|d| d.to_string()))?;
            encoder.encode_field(&format_minutes(t.window.start))?;
            encoder.encode_field(&format_minutes(t.window.end))?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// Result schema for the describe paths, sniffed from the statement text.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("MISSING_COVERAGE") {
        missing_coverage_schema()
    } else if upper.contains("TIME_CONFLICTS") || upper.contains("LOCATION_CONFLICTS") || upper.contains("TASKS") {
        tasks_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("VACATION_REQUESTS") {
        vacation_requests_schema()
    } else if upper.contains("COVERAGE_RULES") {
        coverage_rules_schema()
    } else if upper.contains("EMPLOYEES") {
        employees_schema()
    } else if upper.contains("LOCATIONS") {
        locations_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RosterdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute_command(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RosterdQueryParser;

#[async_trait]
impl QueryParser for RosterdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RosterdHandler {
    type Statement = String;
    type QueryParser = RosterdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RosterdFactory {
    handler: Arc<RosterdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RosterdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RosterdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, mailer: Arc<dyn Mailer>) -> Self {
        let auth_source = RosterdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RosterdHandler::new(tenant_manager, mailer)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RosterdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one accepted TCP connection until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<pgwire::tokio::TlsAcceptor>,
    mailer: Arc<dyn Mailer>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(RosterdFactory::new(tenant_manager, password, mailer));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
