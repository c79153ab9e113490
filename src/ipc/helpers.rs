use crate::eligibility;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{Actor, AppState, Request, Role};
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

/// Maps a failed write. Constraint violations become `conflict` so callers
/// get a stable code for duplicate names/codes.
pub fn write_err(code: &'static str, table: &str, e: rusqlite::Error) -> HandlerErr {
    let is_unique = e
        .sqlite_error()
        .map(|f| f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        .unwrap_or(false);
    let base = if is_unique {
        HandlerErr::conflict(format!("{} already exists", singular(table)))
    } else {
        HandlerErr::new(code, e.to_string())
    };
    base.with_details(json!({ "table": table }))
}

fn singular(table: &str) -> &str {
    match table {
        "faculties" => "faculty",
        "departments" => "department",
        "courses" => "course",
        "students" => "student",
        "lecturers" => "lecturer",
        other => other,
    }
}

/// Runs `f` against the open workspace and wraps the outcome in the response
/// envelope.
pub fn with_conn<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Request) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, req) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, message = %error.message, "request failed");
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

/// Missing, null and blank all read as `None`.
pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?;
            let t = s.trim();
            Ok(if t.is_empty() { None } else { Some(t.to_string()) })
        }
    }
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer", key))),
    }
}

pub fn get_optional_f64(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

/// Accepts JSON booleans and the 0/1 integers older clients send.
pub fn get_optional_bool(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
        Some(v) => match v.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
        },
    }
}

pub fn get_optional_level(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<i64>, HandlerErr> {
    match get_optional_i64(params, key)? {
        None => Ok(None),
        Some(raw) => eligibility::normalize_level(raw).map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "{} must be 1..=8 or a multiple of 100 up to 800",
                key
            ))
        }),
    }
}

pub fn get_required_level(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    get_optional_level(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn parse_semester(raw: &str) -> Result<String, HandlerErr> {
    let s = raw.trim().to_ascii_lowercase();
    match s.as_str() {
        "first" | "second" => Ok(s),
        _ => Err(HandlerErr::bad_params("semester must be first or second")),
    }
}

/// Session years look like `2024/2025`: consecutive calendar years, four
/// digits each. The returned string is the canonical form stored and compared.
pub fn parse_session_year(raw: &str) -> Result<String, HandlerErr> {
    let bad = || HandlerErr::bad_params("sessionYear must look like 2024/2025");
    let four_digits = |s: &str| s.len() == 4 && s.bytes().all(|c| c.is_ascii_digit());
    let (a, b) = raw.trim().split_once('/').ok_or_else(bad)?;
    if !four_digits(a) || !four_digits(b) {
        return Err(bad());
    }
    let start: i32 = a.parse().map_err(|_| bad())?;
    let end: i32 = b.parse().map_err(|_| bad())?;
    if end != start + 1 {
        return Err(bad());
    }
    Ok(format!("{:04}/{:04}", start, end))
}

pub fn parse_date(key: &str, raw: &str) -> Result<chrono::NaiveDate, HandlerErr> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(key: &str, raw: &str) -> Result<chrono::NaiveTime, HandlerErr> {
    let t = raw.trim();
    chrono::NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| chrono::NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be HH:MM or HH:MM:SS", key)))
}

pub fn format_time(t: chrono::NaiveTime) -> String {
    t.format("%H:%M:%S").to_string()
}

/// `dateFrom`/`dateTo` filter, defaulting to the current month so far.
pub fn get_date_range(params: &serde_json::Value) -> Result<(String, String), HandlerErr> {
    let today = chrono::Local::now().date_naive();
    let from = match get_optional_str(params, "dateFrom")? {
        Some(s) => parse_date("dateFrom", &s)?,
        None => today.with_day(1).unwrap_or(today),
    };
    let to = match get_optional_str(params, "dateTo")? {
        Some(s) => parse_date("dateTo", &s)?,
        None => today,
    };
    if from > to {
        return Err(HandlerErr::bad_params("dateFrom must not be after dateTo"));
    }
    Ok((from.to_string(), to.to_string()))
}

pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `table` must be one of the fixed schema tables, never user input.
pub fn row_exists(conn: &Connection, table: &'static str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn require_row(
    conn: &Connection,
    table: &'static str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(HandlerErr::not_found(format!("{} not found", what)))
    }
}

/// Students may only look at their own records.
pub fn ensure_student_scope(actor: Option<&Actor>, student_id: &str) -> Result<(), HandlerErr> {
    match actor {
        Some(a) if a.role == Role::Student => {
            if a.user_id.as_deref() == Some(student_id) {
                Ok(())
            } else {
                Err(HandlerErr::forbidden("students may only access their own records"))
            }
        }
        _ => Ok(()),
    }
}

/// Lecturers may only drive sessions they own.
pub fn ensure_lecturer_scope(actor: Option<&Actor>, lecturer_id: &str) -> Result<(), HandlerErr> {
    match actor {
        Some(a) if a.role == Role::Lecturer && a.user_id.as_deref() != Some(lecturer_id) => Err(
            HandlerErr::forbidden("lecturers may only manage their own sessions"),
        ),
        _ => Ok(()),
    }
}

pub fn attendance_rate(present: i64, total: i64) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    let pct = present as f64 * 100.0 / total as f64;
    Some((pct * 100.0).round() / 100.0)
}
