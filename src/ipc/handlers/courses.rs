use crate::ipc::helpers::{
    get_optional_bool, get_optional_i64, get_optional_level, get_optional_str, get_required_level,
    get_required_str, new_id, now_ts, parse_semester, parse_session_year, require_row, with_conn,
    write_err, HandlerErr,
};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

const COURSE_TYPES: &[&str] = &["core", "elective", "general"];

const COURSE_SELECT: &str = "SELECT
       c.id, c.code, c.name, c.credit_units, c.semester, c.level, c.description,
       c.course_type, c.is_active, c.department_id, d.name, d.faculty_id, f.name,
       (SELECT COUNT(*) FROM student_courses sc WHERE sc.course_id = c.id) AS enrolled
     FROM courses c
     JOIN departments d ON d.id = c.department_id
     JOIN faculties f ON f.id = d.faculty_id";

fn course_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "code": row.get::<_, String>(1)?,
        "name": row.get::<_, String>(2)?,
        "creditUnits": row.get::<_, i64>(3)?,
        "semester": row.get::<_, String>(4)?,
        "level": row.get::<_, i64>(5)?,
        "description": row.get::<_, Option<String>>(6)?,
        "courseType": row.get::<_, String>(7)?,
        "isActive": row.get::<_, i64>(8)? != 0,
        "departmentId": row.get::<_, String>(9)?,
        "departmentName": row.get::<_, String>(10)?,
        "facultyId": row.get::<_, String>(11)?,
        "facultyName": row.get::<_, String>(12)?,
        "enrolledStudents": row.get::<_, i64>(13)?
    }))
}

fn parse_course_type(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim().to_ascii_lowercase();
    if COURSE_TYPES.contains(&t.as_str()) {
        Ok(t)
    } else {
        Err(HandlerErr::bad_params(
            "courseType must be one of: core, elective, general",
        ))
    }
}

fn courses_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let department_id = get_optional_str(p, "departmentId")?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let level = get_optional_level(p, "level")?;
    let semester = get_optional_str(p, "semester")?
        .map(|s| parse_semester(&s))
        .transpose()?;
    let active_only = get_optional_bool(p, "activeOnly")?.unwrap_or(false);
    let search = get_optional_str(p, "search")?
        .map(|s| format!("%{}%", s))
        .unwrap_or_else(|| "%".to_string());

    let sql = format!(
        "{COURSE_SELECT}
         WHERE (?1 IS NULL OR c.department_id = ?1)
           AND (?2 IS NULL OR d.faculty_id = ?2)
           AND (?3 IS NULL OR c.level = ?3)
           AND (?4 IS NULL OR c.semester = ?4)
           AND (?5 = 0 OR c.is_active = 1)
           AND (c.code LIKE ?6 OR c.name LIKE ?6)
         ORDER BY c.code"
    );
    let mut stmt = conn.prepare(&sql)?;
    let courses = stmt
        .query_map(
            (
                &department_id,
                &faculty_id,
                &level,
                &semester,
                active_only as i64,
                &search,
            ),
            course_json,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn courses_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(&req.params, "courseId")?;
    let sql = format!("{COURSE_SELECT} WHERE c.id = ?");
    let course = conn
        .query_row(&sql, [&course_id], course_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("course not found"))?;

    let mut stmt = conn.prepare(
        "SELECT lc.id, l.id, l.title, l.firstname, l.surname, lc.session_year, lc.semester
         FROM lecturer_courses lc
         JOIN lecturers l ON l.id = lc.lecturer_id
         WHERE lc.course_id = ?
         ORDER BY lc.session_year DESC, lc.semester, l.surname",
    )?;
    let lecturers = stmt
        .query_map([&course_id], |r| {
            let title: Option<String> = r.get(2)?;
            let first: String = r.get(3)?;
            let last: String = r.get(4)?;
            let display = match title {
                Some(t) => format!("{} {} {}", t, first, last),
                None => format!("{} {}", first, last),
            };
            Ok(json!({
                "assignmentId": r.get::<_, String>(0)?,
                "lecturerId": r.get::<_, String>(1)?,
                "displayName": display,
                "sessionYear": r.get::<_, String>(5)?,
                "semester": r.get::<_, String>(6)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({ "course": course, "lecturers": lecturers }))
}

fn courses_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let department_id = get_required_str(p, "departmentId")?;
    let name = get_required_str(p, "name")?;
    let code = get_required_str(p, "code")?.to_ascii_uppercase();
    let semester = parse_semester(&get_required_str(p, "semester")?)?;
    let level = get_required_level(p, "level")?;
    let credit_units = get_optional_i64(p, "creditUnits")?.unwrap_or(0);
    if !(0..=12).contains(&credit_units) {
        return Err(HandlerErr::bad_params("creditUnits must be in 0..=12"));
    }
    let description = get_optional_str(p, "description")?;
    let course_type = match get_optional_str(p, "courseType")? {
        Some(t) => parse_course_type(&t)?,
        None => "core".to_string(),
    };
    require_row(conn, "departments", &department_id, "department")?;

    let course_id = new_id();
    conn.execute(
        "INSERT INTO courses(
            id, department_id, name, code, credit_units, semester, level,
            description, course_type, is_active, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &course_id,
            &department_id,
            &name,
            &code,
            credit_units,
            &semester,
            level,
            &description,
            &course_type,
            now_ts(),
        ),
    )
    .map_err(|e| write_err("db_insert_failed", "courses", e))?;
    tracing::info!(course_id = %course_id, code = %code, "course created");

    Ok(json!({ "courseId": course_id, "code": code }))
}

fn courses_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let course_id = get_required_str(p, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let set = |column: &str, value: &dyn rusqlite::ToSql| -> Result<(), HandlerErr> {
        let sql = format!("UPDATE courses SET {} = ? WHERE id = ?", column);
        tx.execute(&sql, rusqlite::params![value, &course_id])
            .map(|_| ())
            .map_err(|e| write_err("db_update_failed", "courses", e))
    };

    if let Some(department_id) = get_optional_str(p, "departmentId")? {
        require_row(conn, "departments", &department_id, "department")?;
        set("department_id", &department_id)?;
    }
    if let Some(name) = get_optional_str(p, "name")? {
        set("name", &name)?;
    }
    if let Some(code) = get_optional_str(p, "code")? {
        set("code", &code.to_ascii_uppercase())?;
    }
    if let Some(semester) = get_optional_str(p, "semester")? {
        set("semester", &parse_semester(&semester)?)?;
    }
    if let Some(level) = get_optional_level(p, "level")? {
        set("level", &level)?;
    }
    if let Some(units) = get_optional_i64(p, "creditUnits")? {
        if !(0..=12).contains(&units) {
            return Err(HandlerErr::bad_params("creditUnits must be in 0..=12"));
        }
        set("credit_units", &units)?;
    }
    if p.get("description").is_some() {
        set("description", &get_optional_str(p, "description")?)?;
    }
    if let Some(course_type) = get_optional_str(p, "courseType")? {
        set("course_type", &parse_course_type(&course_type)?)?;
    }
    if let Some(active) = get_optional_bool(p, "isActive")? {
        set("is_active", &(active as i64))?;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn courses_set_active(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(&req.params, "courseId")?;
    let active = get_optional_bool(&req.params, "isActive")?
        .ok_or_else(|| HandlerErr::bad_params("missing isActive"))?;
    require_row(conn, "courses", &course_id, "course")?;
    conn.execute(
        "UPDATE courses SET is_active = ? WHERE id = ?",
        (active as i64, &course_id),
    )
    .map_err(|e| write_err("db_update_failed", "courses", e))?;
    tracing::info!(course_id = %course_id, active, "course status changed");
    Ok(json!({ "ok": true, "isActive": active }))
}

fn courses_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(&req.params, "courseId")?;
    require_row(conn, "courses", &course_id, "course")?;

    let enrolled: i64 = conn.query_row(
        "SELECT COUNT(*) FROM student_courses WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    )?;
    if enrolled > 0 {
        return Err(HandlerErr::conflict(format!(
            "cannot delete course: it has {} students enrolled",
            enrolled
        ))
        .with_details(json!({ "enrollmentCount": enrolled })));
    }
    let sessions: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance_sessions WHERE course_id = ?",
        [&course_id],
        |r| r.get(0),
    )?;
    if sessions > 0 {
        return Err(HandlerErr::conflict(format!(
            "cannot delete course: it has {} attendance sessions",
            sessions
        ))
        .with_details(json!({ "sessionCount": sessions })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // Dependency order; nothing cascades.
    for (table, sql) in [
        ("lecturer_courses", "DELETE FROM lecturer_courses WHERE course_id = ?"),
        ("course_eligibility", "DELETE FROM course_eligibility WHERE course_id = ?"),
        ("registration_audit", "DELETE FROM registration_audit WHERE course_id = ?"),
        ("courses", "DELETE FROM courses WHERE id = ?"),
    ] {
        tx.execute(sql, [&course_id])
            .map_err(|e| write_err("db_delete_failed", table, e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(course_id = %course_id, "course deleted");
    Ok(json!({ "ok": true }))
}

fn courses_assign_lecturer(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let course_id = get_required_str(p, "courseId")?;
    let lecturer_id = get_required_str(p, "lecturerId")?;
    let period = setup::academic_period(conn)?;
    let session_year = match get_optional_str(p, "sessionYear")? {
        Some(s) => parse_session_year(&s)?,
        None => period.session_year,
    };
    let semester = match get_optional_str(p, "semester")? {
        Some(s) => parse_semester(&s)?,
        None => period.semester,
    };
    require_row(conn, "courses", &course_id, "course")?;
    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM lecturer_courses
             WHERE course_id = ? AND lecturer_id = ? AND session_year = ? AND semester = ?",
            (&course_id, &lecturer_id, &session_year, &semester),
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Err(HandlerErr::conflict(
            "lecturer is already assigned to this course for the selected session and semester",
        ));
    }

    let assignment_id = new_id();
    conn.execute(
        "INSERT INTO lecturer_courses(id, course_id, lecturer_id, session_year, semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &course_id,
            &lecturer_id,
            &session_year,
            &semester,
            now_ts(),
        ),
    )
    .map_err(|e| write_err("db_insert_failed", "lecturer_courses", e))?;
    Ok(json!({
        "assignmentId": assignment_id,
        "sessionYear": session_year,
        "semester": semester
    }))
}

fn courses_unassign_lecturer(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(&req.params, "assignmentId")?;
    let removed = conn
        .execute("DELETE FROM lecturer_courses WHERE id = ?", [&assignment_id])
        .map_err(|e| write_err("db_delete_failed", "lecturer_courses", e))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("assignment not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_conn(state, req, courses_list)),
        "courses.get" => Some(with_conn(state, req, courses_get)),
        "courses.create" => Some(with_conn(state, req, courses_create)),
        "courses.update" => Some(with_conn(state, req, courses_update)),
        "courses.setActive" => Some(with_conn(state, req, courses_set_active)),
        "courses.delete" => Some(with_conn(state, req, courses_delete)),
        "courses.assignLecturer" => Some(with_conn(state, req, courses_assign_lecturer)),
        "courses.unassignLecturer" => Some(with_conn(state, req, courses_unassign_lecturer)),
        _ => None,
    }
}
