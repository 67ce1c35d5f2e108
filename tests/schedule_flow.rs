use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use rosterd::mailer::LogMailer;
use rosterd::tenant::TenantManager;
use rosterd::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("rosterd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let mailer: Arc<dyn rosterd::mailer::Mailer> = Arc::new(LogMailer);
                let _ = wire::process_connection(socket, tm, "rosterd".to_string(), None, mailer)
                    .await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(format!("test_{}", Ulid::new()))
        .user("rosterd")
        .password("rosterd");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn data_rows(messages: &[SimpleQueryMessage]) -> Vec<&tokio_postgres::SimpleQueryRow> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

struct Roster {
    client: tokio_postgres::Client,
    ana: Ulid,
    luis: Ulid,
    central: Ulid,
    norte: Ulid,
}

/// Two employees, two locations — the smallest roster worth scheduling.
async fn seed_roster(addr: SocketAddr) -> Roster {
    let client = connect(addr).await;
    let ana = Ulid::new();
    let luis = Ulid::new();
    let central = Ulid::new();
    let norte = Ulid::new();

    client
        .batch_execute(&format!(
            "INSERT INTO employees (id, name, email, color, role, active) VALUES ('{ana}', 'Ana García', 'ana@example.com', '#10b981', 'admin', true)"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO employees (id, name, email) VALUES ('{luis}', 'Luis Pérez', 'luis@example.com')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO locations (id, name, address, city) VALUES ('{central}', 'Sede Central', 'Av. Principal 123', 'Madrid')"
        ))
        .await
        .unwrap();
    client
        .batch_execute(&format!(
            "INSERT INTO locations (id, name, address, city) VALUES ('{norte}', 'Oficina Norte', 'Calle Norte 45', 'Bilbao')"
        ))
        .await
        .unwrap();

    Roster { client, ana, luis, central, norte }
}

fn insert_task_sql(id: Ulid, employee: Ulid, location: Ulid, date: &str, start: &str, end: &str) -> String {
    format!(
        "INSERT INTO tasks (id, title, employee_id, location_id, start_date, end_date, start_time, end_time) VALUES ('{id}', 'Turno', '{employee}', '{location}', '{date}', NULL, '{start}', '{end}')"
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn connect_and_crud_roundtrip() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;

    let rows = roster.client.simple_query("SELECT * FROM employees").await.unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows.len(), 2);

    let rows = roster.client.simple_query("SELECT * FROM locations").await.unwrap();
    assert_eq!(data_rows(&rows).len(), 2);
}

#[tokio::test]
async fn task_assignment_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let task = Ulid::new();

    roster
        .client
        .batch_execute(&insert_task_sql(task, roster.ana, roster.central, "2026-01-15", "09:00", "11:00"))
        .await
        .unwrap();

    let rows = roster
        .client
        .simple_query(&format!("SELECT * FROM tasks WHERE employee_id = '{}'", roster.ana))
        .await
        .unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("start_date"), Some("2026-01-15"));
    assert_eq!(rows[0].get("start_time"), Some("09:00"));
    assert_eq!(rows[0].get("end_date"), None);
}

#[tokio::test]
async fn missing_employee_is_a_typed_wire_error() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let task = Ulid::new();

    let err = roster
        .client
        .batch_execute(&format!(
            "INSERT INTO tasks (id, title, employee_id, location_id, start_date, end_date, start_time, end_time) VALUES ('{task}', 'Turno', NULL, '{}', '2026-01-15', NULL, '09:00', '11:00')",
            roster.central
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("requires an employee"));
}

#[tokio::test]
async fn time_conflict_query_returns_the_conflicting_task() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let existing = Ulid::new();

    roster
        .client
        .batch_execute(&insert_task_sql(existing, roster.ana, roster.central, "2026-01-15", "09:00", "11:00"))
        .await
        .unwrap();

    // Overlapping candidate → one row, the existing task
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM time_conflicts WHERE employee_id = '{}' AND date = '2026-01-15' AND start_time = '10:00' AND end_time = '12:00'",
            roster.ana
        ))
        .await
        .unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(existing.to_string().as_str()));

    // Back-to-back candidate → no rows
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM time_conflicts WHERE employee_id = '{}' AND date = '2026-01-15' AND start_time = '11:00' AND end_time = '12:00'",
            roster.ana
        ))
        .await
        .unwrap();
    assert!(data_rows(&rows).is_empty());
}

#[tokio::test]
async fn location_conflict_query_ignores_same_employee() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let existing = Ulid::new();

    roster
        .client
        .batch_execute(&insert_task_sql(existing, roster.luis, roster.central, "2026-01-15", "09:00", "11:00"))
        .await
        .unwrap();

    // Ana proposing the same slot at the same location → Luis's task reported
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM location_conflicts WHERE location_id = '{}' AND employee_id = '{}' AND date = '2026-01-15' AND start_time = '10:00' AND end_time = '12:00'",
            roster.central, roster.ana
        ))
        .await
        .unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("employee_id"), Some(roster.luis.to_string().as_str()));

    // Luis himself at his own location → nothing
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM location_conflicts WHERE location_id = '{}' AND employee_id = '{}' AND date = '2026-01-15' AND start_time = '10:00' AND end_time = '12:00'",
            roster.central, roster.luis
        ))
        .await
        .unwrap();
    assert!(data_rows(&rows).is_empty());
}

#[tokio::test]
async fn vacation_workflow_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let req = Ulid::new();

    roster
        .client
        .batch_execute(&format!(
            "INSERT INTO vacation_requests (id, employee_id, start_date, end_date, kind, reason) VALUES ('{req}', '{}', '2026-01-20', '2026-01-24', 'vacation', 'viaje')",
            roster.luis
        ))
        .await
        .unwrap();

    // Availability before approval: free
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE employee_id = '{}' AND date = '2026-01-22'",
            roster.luis
        ))
        .await
        .unwrap();
    assert_eq!(data_rows(&rows)[0].get("available"), Some("t"));

    // Approve
    roster
        .client
        .batch_execute(&format!(
            "UPDATE vacation_requests SET status = 'approved', decided_by = '{}' WHERE id = '{req}'",
            roster.ana
        ))
        .await
        .unwrap();

    // Availability after approval: blocked, with the kind reported
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE employee_id = '{}' AND date = '2026-01-22'",
            roster.luis
        ))
        .await
        .unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows[0].get("available"), Some("f"));
    assert_eq!(rows[0].get("vacation_kind"), Some("vacation"));

    // Task creation inside the range is a hard error
    let err = roster
        .client
        .batch_execute(&insert_task_sql(Ulid::new(), roster.luis, roster.central, "2026-01-22", "09:00", "11:00"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("on vacation"));

    // Second decision attempt fails loudly
    let err = roster
        .client
        .batch_execute(&format!(
            "UPDATE vacation_requests SET status = 'rejected', decided_by = '{}' WHERE id = '{req}'",
            roster.ana
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already decided"));

    // Deleting the approved request removes the block
    roster
        .client
        .batch_execute(&format!("DELETE FROM vacation_requests WHERE id = '{req}'"))
        .await
        .unwrap();
    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM availability WHERE employee_id = '{}' AND date = '2026-01-22'",
            roster.luis
        ))
        .await
        .unwrap();
    assert_eq!(data_rows(&rows)[0].get("available"), Some("t"));
}

#[tokio::test]
async fn invalid_range_rejected_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;

    let err = roster
        .client
        .batch_execute(&format!(
            "INSERT INTO vacation_requests (id, employee_id, start_date, end_date, kind) VALUES ('{}', '{}', '2026-01-20', '2026-01-15', 'vacation')",
            Ulid::new(),
            roster.luis
        ))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid date range"));
}

#[tokio::test]
async fn missing_coverage_report_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;

    // Monday rules for both locations (2026-01-19 is a Monday)
    for loc in [roster.central, roster.norte] {
        roster
            .client
            .batch_execute(&format!(
                "INSERT INTO coverage_rules (id, location_id, weekday) VALUES ('{}', '{loc}', 1)",
                Ulid::new()
            ))
            .await
            .unwrap();
    }
    // Only Sede Central is staffed that Monday
    roster
        .client
        .batch_execute(&insert_task_sql(Ulid::new(), roster.ana, roster.central, "2026-01-19", "09:00", "17:00"))
        .await
        .unwrap();

    let rows = roster
        .client
        .simple_query("SELECT * FROM missing_coverage WHERE date = '2026-01-19'")
        .await
        .unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some("Oficina Norte"));

    // Tuesday has no rules → empty report regardless of tasks
    let rows = roster
        .client
        .simple_query("SELECT * FROM missing_coverage WHERE date = '2026-01-20'")
        .await
        .unwrap();
    assert!(data_rows(&rows).is_empty());
}

#[tokio::test]
async fn derived_completed_column() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let req = Ulid::new();

    // A range far in the past, approved → completed at read time
    roster
        .client
        .batch_execute(&format!(
            "INSERT INTO vacation_requests (id, employee_id, start_date, end_date, kind) VALUES ('{req}', '{}', '2020-03-02', '2020-03-06', 'vacation')",
            roster.luis
        ))
        .await
        .unwrap();
    roster
        .client
        .batch_execute(&format!(
            "UPDATE vacation_requests SET status = 'approved', decided_by = '{}' WHERE id = '{req}'",
            roster.ana
        ))
        .await
        .unwrap();

    let rows = roster
        .client
        .simple_query(&format!(
            "SELECT * FROM vacation_requests WHERE employee_id = '{}'",
            roster.luis
        ))
        .await
        .unwrap();
    let rows = data_rows(&rows);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("status"), Some("approved"));
    assert_eq!(rows[0].get("completed"), Some("t"));
}

#[tokio::test]
async fn tenants_are_isolated() {
    let (addr, _tm) = start_test_server().await;
    let roster_a = seed_roster(addr).await;
    // Second connection gets its own dbname → its own tenant
    let other = connect(addr).await;

    let rows = other.simple_query("SELECT * FROM employees").await.unwrap();
    assert!(data_rows(&rows).is_empty());

    let rows = roster_a.client.simple_query("SELECT * FROM employees").await.unwrap();
    assert_eq!(data_rows(&rows).len(), 2);
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let (addr, _tm) = start_test_server().await;
    let roster = seed_roster(addr).await;
    let task = Ulid::new();

    roster
        .client
        .batch_execute(&insert_task_sql(task, roster.ana, roster.central, "2026-01-15", "09:00", "11:00"))
        .await
        .unwrap();

    // Prepared statement with a bound parameter through the extended protocol
    let rows = roster
        .client
        .query("SELECT * FROM tasks WHERE employee_id = $1", &[&roster.ana.to_string()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let id: &str = rows[0].get("id");
    assert_eq!(id, task.to_string());
}
