use crate::ipc::helpers::{
    get_optional_bool, get_optional_str, get_required_str, new_id, now_ts, require_row, with_conn,
    write_err, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

const LECTURER_SELECT: &str = "SELECT
       l.id, l.staff_id, l.title, l.firstname, l.surname, l.email, l.phone,
       l.qualification, l.specialization, l.is_active, l.department_id, d.name, d.faculty_id,
       f.name
     FROM lecturers l
     JOIN departments d ON d.id = l.department_id
     JOIN faculties f ON f.id = d.faculty_id";

fn lecturer_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let title: Option<String> = row.get(2)?;
    let first: String = row.get(3)?;
    let last: String = row.get(4)?;
    let display = match title.as_deref() {
        Some(t) => format!("{} {} {}", t, first, last),
        None => format!("{} {}", first, last),
    };
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "staffId": row.get::<_, String>(1)?,
        "title": title,
        "firstName": first,
        "surname": last,
        "displayName": display,
        "email": row.get::<_, Option<String>>(5)?,
        "phone": row.get::<_, Option<String>>(6)?,
        "qualification": row.get::<_, Option<String>>(7)?,
        "specialization": row.get::<_, Option<String>>(8)?,
        "isActive": row.get::<_, i64>(9)? != 0,
        "departmentId": row.get::<_, String>(10)?,
        "departmentName": row.get::<_, String>(11)?,
        "facultyId": row.get::<_, String>(12)?,
        "facultyName": row.get::<_, String>(13)?
    }))
}

fn lecturers_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let department_id = get_optional_str(p, "departmentId")?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let active_only = get_optional_bool(p, "activeOnly")?.unwrap_or(false);
    let search = get_optional_str(p, "search")?
        .map(|s| format!("%{}%", s))
        .unwrap_or_else(|| "%".to_string());

    let sql = format!(
        "{LECTURER_SELECT}
         WHERE (?1 IS NULL OR l.department_id = ?1)
           AND (?2 IS NULL OR d.faculty_id = ?2)
           AND (?3 = 0 OR l.is_active = 1)
           AND (l.staff_id LIKE ?4 OR l.firstname LIKE ?4 OR l.surname LIKE ?4)
         ORDER BY l.surname, l.firstname"
    );
    let mut stmt = conn.prepare(&sql)?;
    let lecturers = stmt
        .query_map(
            (&department_id, &faculty_id, active_only as i64, &search),
            lecturer_json,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "lecturers": lecturers }))
}

fn lecturers_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = get_required_str(&req.params, "lecturerId")?;
    let sql = format!("{LECTURER_SELECT} WHERE l.id = ?");
    let lecturer = conn
        .query_row(&sql, [&lecturer_id], lecturer_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("lecturer not found"))?;
    Ok(json!({ "lecturer": lecturer }))
}

fn lecturers_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let staff_id = get_required_str(p, "staffId")?.to_ascii_uppercase();
    let first = get_required_str(p, "firstName")?;
    let last = get_required_str(p, "surname")?;
    let department_id = get_required_str(p, "departmentId")?;
    let title = get_optional_str(p, "title")?;
    let email = get_optional_str(p, "email")?;
    let phone = get_optional_str(p, "phone")?;
    let qualification = get_optional_str(p, "qualification")?;
    let specialization = get_optional_str(p, "specialization")?;
    require_row(conn, "departments", &department_id, "department")?;

    let lecturer_id = new_id();
    conn.execute(
        "INSERT INTO lecturers(
            id, staff_id, title, firstname, surname, email, phone, department_id,
            qualification, specialization, is_active, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &lecturer_id,
            &staff_id,
            &title,
            &first,
            &last,
            &email,
            &phone,
            &department_id,
            &qualification,
            &specialization,
            now_ts(),
        ),
    )
    .map_err(|e| write_err("db_insert_failed", "lecturers", e))?;
    tracing::info!(lecturer_id = %lecturer_id, staff_id = %staff_id, "lecturer created");

    Ok(json!({ "lecturerId": lecturer_id, "staffId": staff_id }))
}

fn lecturers_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let lecturer_id = get_required_str(p, "lecturerId")?;
    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let set = |column: &str, value: &dyn rusqlite::ToSql| -> Result<(), HandlerErr> {
        let sql = format!("UPDATE lecturers SET {} = ? WHERE id = ?", column);
        tx.execute(&sql, rusqlite::params![value, &lecturer_id])
            .map(|_| ())
            .map_err(|e| write_err("db_update_failed", "lecturers", e))
    };

    if let Some(first) = get_optional_str(p, "firstName")? {
        set("firstname", &first)?;
    }
    if let Some(last) = get_optional_str(p, "surname")? {
        set("surname", &last)?;
    }
    if let Some(department_id) = get_optional_str(p, "departmentId")? {
        require_row(conn, "departments", &department_id, "department")?;
        set("department_id", &department_id)?;
    }
    for (key, column) in [
        ("title", "title"),
        ("email", "email"),
        ("phone", "phone"),
        ("qualification", "qualification"),
        ("specialization", "specialization"),
    ] {
        if p.get(key).is_some() {
            set(column, &get_optional_str(p, key)?)?;
        }
    }
    set("updated_at", &now_ts())?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn lecturers_toggle_active(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = get_required_str(&req.params, "lecturerId")?;
    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;
    conn.execute(
        "UPDATE lecturers SET is_active = 1 - is_active, updated_at = ? WHERE id = ?",
        (now_ts(), &lecturer_id),
    )
    .map_err(|e| write_err("db_update_failed", "lecturers", e))?;
    let active: i64 = conn.query_row(
        "SELECT is_active FROM lecturers WHERE id = ?",
        [&lecturer_id],
        |r| r.get(0),
    )?;
    Ok(json!({ "ok": true, "isActive": active != 0 }))
}

fn lecturers_courses(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let lecturer_id = get_required_str(&req.params, "lecturerId")?;
    let session_year = get_optional_str(&req.params, "sessionYear")?;
    let semester = get_optional_str(&req.params, "semester")?;
    require_row(conn, "lecturers", &lecturer_id, "lecturer")?;

    let mut stmt = conn.prepare(
        "SELECT lc.id, c.id, c.code, c.name, c.credit_units, lc.session_year, lc.semester,
                (SELECT COUNT(*) FROM student_courses sc
                  WHERE sc.course_id = c.id
                    AND sc.session_year = lc.session_year
                    AND sc.semester = lc.semester) AS enrolled
         FROM lecturer_courses lc
         JOIN courses c ON c.id = lc.course_id
         WHERE lc.lecturer_id = ?1
           AND (?2 IS NULL OR lc.session_year = ?2)
           AND (?3 IS NULL OR lc.semester = ?3)
         ORDER BY lc.session_year DESC, c.code",
    )?;
    let courses = stmt
        .query_map((&lecturer_id, &session_year, &semester), |r| {
            Ok(json!({
                "assignmentId": r.get::<_, String>(0)?,
                "courseId": r.get::<_, String>(1)?,
                "code": r.get::<_, String>(2)?,
                "name": r.get::<_, String>(3)?,
                "creditUnits": r.get::<_, i64>(4)?,
                "sessionYear": r.get::<_, String>(5)?,
                "semester": r.get::<_, String>(6)?,
                "enrolledStudents": r.get::<_, i64>(7)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lecturers.list" => Some(with_conn(state, req, lecturers_list)),
        "lecturers.get" => Some(with_conn(state, req, lecturers_get)),
        "lecturers.create" => Some(with_conn(state, req, lecturers_create)),
        "lecturers.update" => Some(with_conn(state, req, lecturers_update)),
        "lecturers.toggleActive" => Some(with_conn(state, req, lecturers_toggle_active)),
        "lecturers.courses" => Some(with_conn(state, req, lecturers_courses)),
        _ => None,
    }
}
