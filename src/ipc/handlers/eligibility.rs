use crate::eligibility::{self, Course, Decision, EligibilityRule, Student};
use crate::ipc::helpers::{
    ensure_student_scope, get_optional_bool, get_optional_level, get_optional_str,
    get_required_str, require_row, with_conn, write_err, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub fn load_student(conn: &Connection, student_id: &str) -> Result<Option<Student>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT s.level, s.department_id, d.faculty_id
             FROM students s
             JOIN departments d ON d.id = s.department_id
             WHERE s.id = ?",
            [student_id],
            |r| {
                Ok(Student {
                    level: r.get(0)?,
                    department_id: r.get(1)?,
                    faculty_id: r.get(2)?,
                })
            },
        )
        .optional()?)
}

/// Inactive courses read as missing.
pub fn load_active_course(conn: &Connection, course_id: &str) -> Result<Option<Course>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT c.department_id, d.faculty_id
             FROM courses c
             JOIN departments d ON d.id = c.department_id
             WHERE c.id = ? AND c.is_active = 1",
            [course_id],
            |r| {
                Ok(Course {
                    department_id: r.get(0)?,
                    faculty_id: r.get(1)?,
                })
            },
        )
        .optional()?)
}

pub fn load_rule(conn: &Connection, course_id: &str) -> Result<Option<EligibilityRule>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT is_general, department_id, faculty_id, level, min_level, max_level,
                    is_carryover_allowed
             FROM course_eligibility
             WHERE course_id = ?",
            [course_id],
            |r| {
                let blank_to_none =
                    |v: Option<String>| v.filter(|s| !s.trim().is_empty());
                Ok(EligibilityRule {
                    is_general: r.get::<_, i64>(0)? != 0,
                    department_id: blank_to_none(r.get(1)?),
                    faculty_id: blank_to_none(r.get(2)?),
                    level: r.get::<_, Option<i64>>(3)?.filter(|l| *l != 0),
                    min_level: r.get(4)?,
                    max_level: r.get(5)?,
                    is_carryover_allowed: r.get::<_, i64>(6)? != 0,
                })
            },
        )
        .optional()?)
}

pub fn rule_json(rule: &EligibilityRule) -> serde_json::Value {
    json!({
        "kind": rule.kind().as_str(),
        "isGeneral": rule.is_general,
        "departmentId": rule.department_id,
        "facultyId": rule.faculty_id,
        "level": rule.level,
        "minLevel": rule.min_level,
        "maxLevel": rule.max_level,
        "isCarryoverAllowed": rule.is_carryover_allowed
    })
}

pub fn decision_json(decision: &Decision) -> serde_json::Value {
    json!({
        "eligible": decision.eligible,
        "reasonCode": decision.reason.code(),
        "reason": decision.reason.to_string()
    })
}

fn eligibility_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(&req.params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;
    let rule = load_rule(conn, &course_id)?;
    Ok(json!({
        "courseId": course_id,
        "rule": rule.as_ref().map(rule_json)
    }))
}

fn eligibility_set(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let course_id = get_required_str(p, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let rule = EligibilityRule {
        is_general: get_optional_bool(p, "isGeneral")?.unwrap_or(false),
        department_id: get_optional_str(p, "departmentId")?,
        faculty_id: get_optional_str(p, "facultyId")?,
        level: get_optional_level(p, "level")?,
        min_level: get_optional_level(p, "minLevel")?,
        max_level: get_optional_level(p, "maxLevel")?,
        is_carryover_allowed: get_optional_bool(p, "isCarryoverAllowed")?.unwrap_or(false),
    };
    if let (Some(min), Some(max)) = (rule.min_level, rule.max_level) {
        if min > max {
            return Err(HandlerErr::bad_params("minLevel must not exceed maxLevel"));
        }
    }
    if let Some(department_id) = rule.department_id.as_deref() {
        require_row(conn, "departments", department_id, "department")?;
    }
    if let Some(faculty_id) = rule.faculty_id.as_deref() {
        require_row(conn, "faculties", faculty_id, "faculty")?;
    }

    conn.execute(
        "INSERT INTO course_eligibility(
            course_id, is_general, department_id, faculty_id, level, min_level, max_level,
            is_carryover_allowed
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id) DO UPDATE SET
           is_general = excluded.is_general,
           department_id = excluded.department_id,
           faculty_id = excluded.faculty_id,
           level = excluded.level,
           min_level = excluded.min_level,
           max_level = excluded.max_level,
           is_carryover_allowed = excluded.is_carryover_allowed",
        (
            &course_id,
            rule.is_general as i64,
            &rule.department_id,
            &rule.faculty_id,
            rule.level,
            rule.min_level,
            rule.max_level,
            rule.is_carryover_allowed as i64,
        ),
    )
    .map_err(|e| write_err("db_update_failed", "course_eligibility", e))?;
    tracing::info!(course_id = %course_id, kind = rule.kind().as_str(), "eligibility rule saved");

    Ok(json!({ "courseId": course_id, "rule": rule_json(&rule) }))
}

fn eligibility_clear(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(&req.params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;
    let removed = conn
        .execute(
            "DELETE FROM course_eligibility WHERE course_id = ?",
            [&course_id],
        )
        .map_err(|e| write_err("db_delete_failed", "course_eligibility", e))?;
    Ok(json!({ "ok": true, "removed": removed > 0 }))
}

/// Dry run of the registration decision, without the session-year checks.
fn eligibility_check(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    let course_id = get_required_str(&req.params, "courseId")?;
    ensure_student_scope(req.actor.as_ref(), &student_id)?;

    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let course = load_active_course(conn, &course_id)?
        .ok_or_else(|| HandlerErr::not_found("course not found or inactive"))?;
    let rule = load_rule(conn, &course_id)?;
    let decision = eligibility::resolve(&student, &course, rule.as_ref());

    Ok(json!({
        "studentId": student_id,
        "courseId": course_id,
        "rule": rule.as_ref().map(rule_json),
        "decision": decision_json(&decision)
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "eligibility.get" => Some(with_conn(state, req, eligibility_get)),
        "eligibility.set" => Some(with_conn(state, req, eligibility_set)),
        "eligibility.clear" => Some(with_conn(state, req, eligibility_clear)),
        "eligibility.check" => Some(with_conn(state, req, eligibility_check)),
        _ => None,
    }
}
