use crate::db;
use crate::ipc::helpers::{parse_semester, parse_session_year, with_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Academic,
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "academic" => Some(Self::Academic),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Academic => "setup.academic",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Academic => json!({
            "currentSession": "2024/2025",
            "currentSemester": "second"
        }),
        SetupSection::Attendance => json!({
            "windowMinutes": 15,
            "lateAfterMinutes": 10,
            "defaulterThresholdPercent": 75
        }),
    }
}

/// Current academic period used when a request does not name one.
#[derive(Debug, Clone)]
pub struct AcademicPeriod {
    pub session_year: String,
    pub semester: String,
}

#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    pub window_minutes: i64,
    pub late_after_minutes: i64,
    pub defaulter_threshold_percent: i64,
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_str(v: &Value, key: &str) -> Result<String, String> {
    v.as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| format!("{} must be string", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Academic => match k.as_str() {
                "currentSession" => {
                    let s = parse_session_year(&parse_str(v, k)?).map_err(|e| e.message)?;
                    obj.insert(k.clone(), Value::String(s));
                }
                "currentSemester" => {
                    let s = parse_semester(&parse_str(v, k)?).map_err(|e| e.message)?;
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown academic field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "windowMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 240)?));
                }
                "lateAfterMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 240)?));
                }
                "defaulterThresholdPercent" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    if let SetupSection::Attendance = section {
        let window = obj.get("windowMinutes").and_then(|v| v.as_i64()).unwrap_or(15);
        let late = obj.get("lateAfterMinutes").and_then(|v| v.as_i64()).unwrap_or(10);
        if late > window {
            return Err("lateAfterMinutes must not exceed windowMinutes".into());
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults instead of failing reads.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            } else {
                tracing::warn!(key = section.key(), "ignoring invalid saved setup section");
            }
        }
    }
    Ok(current)
}

pub fn academic_period(conn: &Connection) -> Result<AcademicPeriod, HandlerErr> {
    let v = load_section(conn, SetupSection::Academic)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(AcademicPeriod {
        session_year: v
            .get("currentSession")
            .and_then(|s| s.as_str())
            .unwrap_or("2024/2025")
            .to_string(),
        semester: v
            .get("currentSemester")
            .and_then(|s| s.as_str())
            .unwrap_or("second")
            .to_string(),
    })
}

pub fn attendance_policy(conn: &Connection) -> Result<AttendancePolicy, HandlerErr> {
    let v = load_section(conn, SetupSection::Attendance)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let get = |k: &str, d: i64| v.get(k).and_then(|n| n.as_i64()).unwrap_or(d);
    Ok(AttendancePolicy {
        window_minutes: get("windowMinutes", 15),
        late_after_minutes: get("lateAfterMinutes", 10),
        defaulter_threshold_percent: get("defaulterThresholdPercent", 75),
    })
}

fn setup_get(conn: &Connection, _req: &Request) -> Result<Value, HandlerErr> {
    let academic = load_section(conn, SetupSection::Academic)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let attendance = load_section(conn, SetupSection::Attendance)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({
        "academic": academic,
        "attendance": attendance
    }))
}

fn setup_update(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let section_raw = req
        .params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing section"))?;
    let section =
        SetupSection::parse(section_raw).ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch_obj = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    let mut current = load_section(conn, section)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(section = section.key(), "setup updated");
    Ok(json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(with_conn(state, req, setup_get)),
        "setup.update" => Some(with_conn(state, req, setup_update)),
        _ => None,
    }
}
