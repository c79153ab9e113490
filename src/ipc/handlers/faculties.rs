use crate::ipc::helpers::{
    get_optional_str, get_required_str, new_id, now_ts, require_row, with_conn, write_err,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

fn faculties_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let search = get_optional_str(&req.params, "search")?
        .map(|s| format!("%{}%", s))
        .unwrap_or_else(|| "%".to_string());

    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = conn.prepare(
        "SELECT
           f.id,
           f.name,
           f.code,
           (SELECT COUNT(*) FROM departments d WHERE d.faculty_id = f.id) AS department_count,
           (SELECT COUNT(*) FROM students s
              JOIN departments d ON d.id = s.department_id
             WHERE d.faculty_id = f.id) AS student_count,
           (SELECT COUNT(*) FROM courses c
              JOIN departments d ON d.id = c.department_id
             WHERE d.faculty_id = f.id) AS course_count
         FROM faculties f
         WHERE f.name LIKE ?1 OR f.code LIKE ?1
         ORDER BY f.name",
    )?;
    let faculties = stmt
        .query_map([&search], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "code": row.get::<_, String>(2)?,
                "departmentCount": row.get::<_, i64>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
                "courseCount": row.get::<_, i64>(5)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "faculties": faculties }))
}

fn faculties_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(&req.params, "name")?;
    let code = get_required_str(&req.params, "code")?.to_ascii_uppercase();

    let faculty_id = new_id();
    conn.execute(
        "INSERT INTO faculties(id, name, code, created_at) VALUES(?, ?, ?, ?)",
        (&faculty_id, &name, &code, now_ts()),
    )
    .map_err(|e| write_err("db_insert_failed", "faculties", e))?;
    tracing::info!(faculty_id = %faculty_id, code = %code, "faculty created");

    Ok(json!({ "facultyId": faculty_id, "name": name, "code": code }))
}

fn faculties_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    require_row(conn, "faculties", &faculty_id, "faculty")?;

    if let Some(name) = get_optional_str(&req.params, "name")? {
        conn.execute(
            "UPDATE faculties SET name = ? WHERE id = ?",
            (&name, &faculty_id),
        )
        .map_err(|e| write_err("db_update_failed", "faculties", e))?;
    }
    if let Some(code) = get_optional_str(&req.params, "code")? {
        conn.execute(
            "UPDATE faculties SET code = ? WHERE id = ?",
            (code.to_ascii_uppercase(), &faculty_id),
        )
        .map_err(|e| write_err("db_update_failed", "faculties", e))?;
    }
    Ok(json!({ "ok": true }))
}

fn faculties_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    require_row(conn, "faculties", &faculty_id, "faculty")?;

    let dept_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM departments WHERE faculty_id = ?",
        [&faculty_id],
        |r| r.get(0),
    )?;
    if dept_count > 0 {
        return Err(HandlerErr::conflict(format!(
            "cannot delete faculty: it has {} departments assigned to it",
            dept_count
        ))
        .with_details(json!({ "departmentCount": dept_count })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE course_eligibility SET faculty_id = NULL WHERE faculty_id = ?",
        [&faculty_id],
    )
    .map_err(|e| write_err("db_update_failed", "course_eligibility", e))?;
    tx.execute("DELETE FROM faculties WHERE id = ?", [&faculty_id])
        .map_err(|e| write_err("db_delete_failed", "faculties", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(faculty_id = %faculty_id, "faculty deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculties.list" => Some(with_conn(state, req, faculties_list)),
        "faculties.create" => Some(with_conn(state, req, faculties_create)),
        "faculties.update" => Some(with_conn(state, req, faculties_update)),
        "faculties.delete" => Some(with_conn(state, req, faculties_delete)),
        _ => None,
    }
}
