use crate::ipc::helpers::{
    get_optional_str, get_required_str, new_id, now_ts, require_row, with_conn, write_err,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn departments_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let faculty_id = get_optional_str(&req.params, "facultyId")?;
    let search = get_optional_str(&req.params, "search")?
        .map(|s| format!("%{}%", s))
        .unwrap_or_else(|| "%".to_string());

    let mut stmt = conn.prepare(
        "SELECT
           d.id,
           d.name,
           d.code,
           d.faculty_id,
           f.name,
           (SELECT COUNT(*) FROM students s WHERE s.department_id = d.id) AS student_count,
           (SELECT COUNT(*) FROM courses c WHERE c.department_id = d.id) AS course_count,
           (SELECT COUNT(*) FROM lecturers l WHERE l.department_id = d.id) AS lecturer_count
         FROM departments d
         JOIN faculties f ON f.id = d.faculty_id
         WHERE (?1 IS NULL OR d.faculty_id = ?1)
           AND (d.name LIKE ?2 OR d.code LIKE ?2)
         ORDER BY f.name, d.name",
    )?;
    let departments = stmt
        .query_map((&faculty_id, &search), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "code": row.get::<_, String>(2)?,
                "facultyId": row.get::<_, String>(3)?,
                "facultyName": row.get::<_, String>(4)?,
                "studentCount": row.get::<_, i64>(5)?,
                "courseCount": row.get::<_, i64>(6)?,
                "lecturerCount": row.get::<_, i64>(7)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "departments": departments }))
}

fn departments_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let name = get_required_str(&req.params, "name")?;
    let code = get_required_str(&req.params, "code")?.to_ascii_uppercase();
    require_row(conn, "faculties", &faculty_id, "faculty")?;

    let department_id = new_id();
    conn.execute(
        "INSERT INTO departments(id, faculty_id, name, code, created_at) VALUES(?, ?, ?, ?, ?)",
        (&department_id, &faculty_id, &name, &code, now_ts()),
    )
    .map_err(|e| write_err("db_insert_failed", "departments", e))?;
    tracing::info!(department_id = %department_id, code = %code, "department created");

    Ok(json!({
        "departmentId": department_id,
        "facultyId": faculty_id,
        "name": name,
        "code": code
    }))
}

fn departments_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(&req.params, "departmentId")?;
    require_row(conn, "departments", &department_id, "department")?;

    if let Some(faculty_id) = get_optional_str(&req.params, "facultyId")? {
        require_row(conn, "faculties", &faculty_id, "faculty")?;
        conn.execute(
            "UPDATE departments SET faculty_id = ? WHERE id = ?",
            (&faculty_id, &department_id),
        )
        .map_err(|e| write_err("db_update_failed", "departments", e))?;
    }
    if let Some(name) = get_optional_str(&req.params, "name")? {
        conn.execute(
            "UPDATE departments SET name = ? WHERE id = ?",
            (&name, &department_id),
        )
        .map_err(|e| write_err("db_update_failed", "departments", e))?;
    }
    if let Some(code) = get_optional_str(&req.params, "code")? {
        conn.execute(
            "UPDATE departments SET code = ? WHERE id = ?",
            (code.to_ascii_uppercase(), &department_id),
        )
        .map_err(|e| write_err("db_update_failed", "departments", e))?;
    }
    Ok(json!({ "ok": true }))
}

fn departments_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let department_id = get_required_str(&req.params, "departmentId")?;
    require_row(conn, "departments", &department_id, "department")?;

    let (students, courses, lecturers): (i64, i64, i64) = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM students WHERE department_id = ?1),
           (SELECT COUNT(*) FROM courses WHERE department_id = ?1),
           (SELECT COUNT(*) FROM lecturers WHERE department_id = ?1)",
        [&department_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    if students > 0 {
        return Err(HandlerErr::conflict(format!(
            "cannot delete department: it has {} students assigned to it",
            students
        ))
        .with_details(json!({ "studentCount": students })));
    }
    if courses > 0 || lecturers > 0 {
        return Err(HandlerErr::conflict(
            "cannot delete department: courses or lecturers still reference it",
        )
        .with_details(json!({ "courseCount": courses, "lecturerCount": lecturers })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE course_eligibility SET department_id = NULL WHERE department_id = ?",
        [&department_id],
    )
    .map_err(|e| write_err("db_update_failed", "course_eligibility", e))?;
    tx.execute("DELETE FROM departments WHERE id = ?", [&department_id])
        .map_err(|e| write_err("db_delete_failed", "departments", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(department_id = %department_id, "department deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.list" => Some(with_conn(state, req, departments_list)),
        "departments.create" => Some(with_conn(state, req, departments_create)),
        "departments.update" => Some(with_conn(state, req, departments_update)),
        "departments.delete" => Some(with_conn(state, req, departments_delete)),
        _ => None,
    }
}
