use crate::ipc::helpers::{
    ensure_student_scope, get_optional_bool, get_optional_i64, get_optional_level,
    get_optional_str, get_required_level, get_required_str, new_id, now_ts, require_row,
    with_conn, write_err, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

const STUDENT_SELECT: &str = "SELECT
       s.id, s.reg_number, s.firstname, s.surname, s.email, s.phone, s.level,
       s.admission_year, s.gender, s.is_active, s.department_id, d.name, d.faculty_id, f.name
     FROM students s
     JOIN departments d ON d.id = s.department_id
     JOIN faculties f ON f.id = d.faculty_id";

fn student_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let first: String = row.get(2)?;
    let last: String = row.get(3)?;
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "regNumber": row.get::<_, String>(1)?,
        "firstName": first,
        "surname": last,
        "displayName": format!("{} {}", first, last),
        "email": row.get::<_, Option<String>>(4)?,
        "phone": row.get::<_, Option<String>>(5)?,
        "level": row.get::<_, i64>(6)?,
        "admissionYear": row.get::<_, Option<i64>>(7)?,
        "gender": row.get::<_, Option<String>>(8)?,
        "isActive": row.get::<_, i64>(9)? != 0,
        "departmentId": row.get::<_, String>(10)?,
        "departmentName": row.get::<_, String>(11)?,
        "facultyId": row.get::<_, String>(12)?,
        "facultyName": row.get::<_, String>(13)?
    }))
}

fn parse_gender(raw: &str) -> Result<String, HandlerErr> {
    let g = raw.trim().to_ascii_lowercase();
    match g.as_str() {
        "male" | "female" | "other" => Ok(g),
        _ => Err(HandlerErr::bad_params("gender must be male, female or other")),
    }
}

fn students_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let department_id = get_optional_str(p, "departmentId")?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let level = get_optional_level(p, "level")?;
    let active_only = get_optional_bool(p, "activeOnly")?.unwrap_or(false);
    let search = get_optional_str(p, "search")?
        .map(|s| format!("%{}%", s))
        .unwrap_or_else(|| "%".to_string());

    let sql = format!(
        "{STUDENT_SELECT}
         WHERE (?1 IS NULL OR s.department_id = ?1)
           AND (?2 IS NULL OR d.faculty_id = ?2)
           AND (?3 IS NULL OR s.level = ?3)
           AND (?4 = 0 OR s.is_active = 1)
           AND (s.reg_number LIKE ?5 OR s.firstname LIKE ?5 OR s.surname LIKE ?5)
         ORDER BY s.firstname, s.surname"
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(
            (&department_id, &faculty_id, &level, active_only as i64, &search),
            student_json,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    ensure_student_scope(req.actor.as_ref(), &student_id)?;
    let sql = format!("{STUDENT_SELECT} WHERE s.id = ?");
    let student = conn
        .query_row(&sql, [&student_id], student_json)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student }))
}

fn students_create(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let reg_number = get_required_str(p, "regNumber")?.to_ascii_uppercase();
    let first = get_required_str(p, "firstName")?;
    let last = get_required_str(p, "surname")?;
    let department_id = get_required_str(p, "departmentId")?;
    let level = get_required_level(p, "level")?;
    let email = get_optional_str(p, "email")?;
    let phone = get_optional_str(p, "phone")?;
    let admission_year = get_optional_i64(p, "admissionYear")?;
    let gender = get_optional_str(p, "gender")?
        .map(|g| parse_gender(&g))
        .transpose()?;
    require_row(conn, "departments", &department_id, "department")?;

    let student_id = new_id();
    conn.execute(
        "INSERT INTO students(
            id, reg_number, firstname, surname, email, phone, department_id, level,
            admission_year, gender, is_active, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &student_id,
            &reg_number,
            &first,
            &last,
            &email,
            &phone,
            &department_id,
            level,
            admission_year,
            &gender,
            now_ts(),
        ),
    )
    .map_err(|e| write_err("db_insert_failed", "students", e))?;
    tracing::info!(student_id = %student_id, reg_number = %reg_number, "student created");

    Ok(json!({ "studentId": student_id, "regNumber": reg_number, "level": level }))
}

fn students_update(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let student_id = get_required_str(p, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let set = |column: &str, value: &dyn rusqlite::ToSql| -> Result<(), HandlerErr> {
        let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
        tx.execute(&sql, rusqlite::params![value, &student_id])
            .map(|_| ())
            .map_err(|e| write_err("db_update_failed", "students", e))
    };

    if let Some(first) = get_optional_str(p, "firstName")? {
        set("firstname", &first)?;
    }
    if let Some(last) = get_optional_str(p, "surname")? {
        set("surname", &last)?;
    }
    if p.get("email").is_some() {
        set("email", &get_optional_str(p, "email")?)?;
    }
    if p.get("phone").is_some() {
        set("phone", &get_optional_str(p, "phone")?)?;
    }
    if let Some(department_id) = get_optional_str(p, "departmentId")? {
        require_row(conn, "departments", &department_id, "department")?;
        set("department_id", &department_id)?;
    }
    if let Some(level) = get_optional_level(p, "level")? {
        set("level", &level)?;
    }
    if let Some(gender) = get_optional_str(p, "gender")? {
        set("gender", &parse_gender(&gender)?)?;
    }
    set("updated_at", &now_ts())?;

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({ "ok": true }))
}

fn students_toggle_active(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(&req.params, "studentId")?;
    require_row(conn, "students", &student_id, "student")?;
    conn.execute(
        "UPDATE students SET is_active = 1 - is_active, updated_at = ? WHERE id = ?",
        (now_ts(), &student_id),
    )
    .map_err(|e| write_err("db_update_failed", "students", e))?;
    let active: i64 = conn.query_row(
        "SELECT is_active FROM students WHERE id = ?",
        [&student_id],
        |r| r.get(0),
    )?;
    Ok(json!({ "ok": true, "isActive": active != 0 }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_conn(state, req, students_list)),
        "students.get" => Some(with_conn(state, req, students_get)),
        "students.create" => Some(with_conn(state, req, students_create)),
        "students.update" => Some(with_conn(state, req, students_update)),
        "students.toggleActive" => Some(with_conn(state, req, students_toggle_active)),
        _ => None,
    }
}
