use chrono::NaiveDate;
use serde::Serialize;

/// Typed mail payloads, one per scenario. Rendering (subject lines, HTML)
/// belongs to the delivery collaborator; the engine side only guarantees
/// the fields are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MailMessage {
    TaskAssigned {
        employee_name: String,
        title: String,
        location: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: String,
        end_time: String,
    },
    /// Edit of an existing assignment; carries the before values so the
    /// template can show a diff.
    TaskRescheduled {
        employee_name: String,
        title: String,
        location: String,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
        start_time: String,
        end_time: String,
        old_location: String,
        old_start_date: NaiveDate,
        old_start_time: String,
        old_end_time: String,
    },
    /// The task was taken away from this employee.
    TaskWithdrawn {
        employee_name: String,
        title: String,
        start_date: NaiveDate,
    },
    /// The task previously belonged to someone else.
    TaskReassigned {
        employee_name: String,
        previous_employee_name: String,
        title: String,
        location: String,
        start_date: NaiveDate,
        start_time: String,
        end_time: String,
    },
    VacationDecided {
        employee_name: String,
        approved: bool,
        kind: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        comment: Option<String>,
        decided_by_name: Option<String>,
    },
}

#[derive(Debug)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Outbound mail seam. Callers fire after a committed write and log
/// failures; a delivery error must never roll back or fail the write.
pub trait Mailer: Send + Sync {
    fn deliver(&self, to: &str, message: &MailMessage) -> Result<(), MailError>;
}

/// Default mailer: logs the payload instead of sending. Useful for
/// development and as the fallback when no SMTP bridge is configured.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn deliver(&self, to: &str, message: &MailMessage) -> Result<(), MailError> {
        let payload = serde_json::to_string(message).map_err(|e| MailError(e.to_string()))?;
        tracing::info!(to, %payload, "mail");
        Ok(())
    }
}
