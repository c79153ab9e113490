use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    attendance_rate, ensure_lecturer_scope, format_time, get_optional_bool, get_optional_str,
    get_required_str, new_id, now_ts, parse_date, parse_time, with_conn, write_err, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const SESSION_TYPES: &[&str] = &["lecture", "tutorial", "practical", "seminar", "exam"];

pub struct SessionRow {
    pub id: String,
    pub lecturer_id: String,
    pub course_id: String,
    pub session_date: String,
    pub start_time: String,
    pub status: String,
    pub session_year: String,
    pub semester: String,
}

pub fn load_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    conn.query_row(
        "SELECT id, lecturer_id, course_id, session_date, start_time, status, session_year, semester
         FROM attendance_sessions WHERE id = ?",
        [session_id],
        |r| {
            Ok(SessionRow {
                id: r.get(0)?,
                lecturer_id: r.get(1)?,
                course_id: r.get(2)?,
                session_date: r.get(3)?,
                start_time: r.get(4)?,
                status: r.get(5)?,
                session_year: r.get(6)?,
                semester: r.get(7)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("session not found"))
}

/// Inserts `absent`/`auto` rows for registered students that have no mark yet.
pub fn fill_absent(
    conn: &Connection,
    session: &SessionRow,
    marked_at: &str,
) -> Result<usize, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT sc.student_id
         FROM student_courses sc
         WHERE sc.course_id = ?1 AND sc.session_year = ?2 AND sc.semester = ?3
           AND NOT EXISTS (
             SELECT 1 FROM attendance a
             WHERE a.student_id = sc.student_id AND a.attendance_session_id = ?4
           )",
    )?;
    let missing = stmt
        .query_map(
            (
                &session.course_id,
                &session.session_year,
                &session.semester,
                &session.id,
            ),
            |r| r.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for student_id in &missing {
        conn.execute(
            "INSERT INTO attendance(
                id, student_id, attendance_session_id, course_id, status, method, marked_at
             ) VALUES(?, ?, ?, ?, 'absent', 'auto', ?)",
            (new_id(), student_id, &session.id, &session.course_id, marked_at),
        )
        .map_err(|e| write_err("db_insert_failed", "attendance", e))?;
    }
    Ok(missing.len())
}

pub fn session_counts(conn: &Connection, session_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let (total, present, late, absent, excused): (i64, i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'present' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'late' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'absent' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'excused' THEN 1 ELSE 0 END), 0)
         FROM attendance WHERE attendance_session_id = ?",
        [session_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
    )?;
    Ok(json!({
        "total": total,
        "present": present,
        "late": late,
        "absent": absent,
        "excused": excused,
        "attendanceRate": attendance_rate(present, total)
    }))
}

/// Lecturers act as themselves; admins name the lecturer explicitly.
fn resolve_lecturer(req: &Request) -> Result<String, HandlerErr> {
    let requested = get_optional_str(&req.params, "lecturerId")?;
    match req.actor.as_ref() {
        Some(a) if a.role == Role::Lecturer => {
            let own = a
                .user_id
                .clone()
                .ok_or_else(|| HandlerErr::new("unauthorized", "actor.userId is required"))?;
            if let Some(other) = requested {
                ensure_lecturer_scope(Some(a), &other)?;
            }
            Ok(own)
        }
        _ => requested.ok_or_else(|| HandlerErr::bad_params("missing lecturerId")),
    }
}

fn sessions_start(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let course_id = get_required_str(p, "courseId")?;
    let lecturer_id = resolve_lecturer(req)?;
    let session_type = get_required_str(p, "sessionType")?.to_ascii_lowercase();
    if !SESSION_TYPES.contains(&session_type.as_str()) {
        return Err(HandlerErr::bad_params(format!(
            "sessionType must be one of {}",
            SESSION_TYPES.join(", ")
        )));
    }
    let location = get_optional_str(p, "location")?;
    let now = chrono::Local::now();
    let session_date = match get_optional_str(p, "sessionDate")? {
        Some(s) => parse_date("sessionDate", &s)?,
        None => now.date_naive(),
    }
    .to_string();
    let start_time = match get_optional_str(p, "startTime")? {
        Some(s) => parse_time("startTime", &s)?,
        None => now.time(),
    };
    let start_time = format_time(start_time);
    let auto_enroll = get_optional_bool(p, "autoEnroll")?.unwrap_or(false);

    let course_active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM courses WHERE id = ?",
            [&course_id],
            |r| r.get(0),
        )
        .optional()?;
    if course_active != Some(1) {
        return Err(HandlerErr::not_found("course not found or inactive"));
    }
    let lecturer_active: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM lecturers WHERE id = ?",
            [&lecturer_id],
            |r| r.get(0),
        )
        .optional()?;
    match lecturer_active {
        None => return Err(HandlerErr::not_found("lecturer not found")),
        Some(0) => return Err(HandlerErr::conflict("lecturer is inactive")),
        Some(_) => {}
    }

    let period = setup::academic_period(conn)?;
    if req.actor.as_ref().map(|a| a.role) == Some(Role::Lecturer) {
        let assigned: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM lecturer_courses
                 WHERE lecturer_id = ? AND course_id = ? AND session_year = ? AND semester = ?",
                (&lecturer_id, &course_id, &period.session_year, &period.semester),
                |r| r.get(0),
            )
            .optional()?;
        if assigned.is_none() {
            return Err(HandlerErr::forbidden(
                "lecturer is not assigned to this course for the current semester",
            ));
        }
    }

    let active: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_sessions
             WHERE lecturer_id = ? AND course_id = ? AND session_date = ? AND status = 'active'",
            (&lecturer_id, &course_id, &session_date),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = active {
        return Err(HandlerErr::conflict(
            "there is already an active attendance session for this course today",
        )
        .with_details(json!({ "sessionId": existing })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let session = SessionRow {
        id: new_id(),
        lecturer_id,
        course_id,
        session_date,
        start_time,
        status: "active".to_string(),
        session_year: period.session_year,
        semester: period.semester,
    };
    tx.execute(
        "INSERT INTO attendance_sessions(
            id, lecturer_id, course_id, session_date, start_time, session_type, location,
            status, session_year, semester, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?)",
        (
            &session.id,
            &session.lecturer_id,
            &session.course_id,
            &session.session_date,
            &session.start_time,
            &session_type,
            &location,
            &session.session_year,
            &session.semester,
            now_ts(),
        ),
    )
    .map_err(|e| write_err("db_insert_failed", "attendance_sessions", e))?;
    let auto_enrolled = if auto_enroll {
        fill_absent(&tx, &session, &now_ts())?
    } else {
        0
    };
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        session_id = %session.id,
        course_id = %session.course_id,
        lecturer_id = %session.lecturer_id,
        auto_enrolled,
        "attendance session started"
    );
    Ok(json!({
        "sessionId": session.id,
        "sessionDate": session.session_date,
        "startTime": session.start_time,
        "sessionYear": session.session_year,
        "semester": session.semester,
        "autoEnrolled": auto_enrolled
    }))
}

fn sessions_end(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(&req.params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    ensure_lecturer_scope(req.actor.as_ref(), &session.lecturer_id)?;
    if session.status != "active" {
        return Err(HandlerErr::conflict("session is not active"));
    }
    let end_time = match get_optional_str(&req.params, "endTime")? {
        Some(s) => parse_time("endTime", &s)?,
        None => chrono::Local::now().time(),
    };
    let start_time = parse_time("startTime", &session.start_time)?;
    let duration_minutes = (end_time - start_time).num_minutes().max(0);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let auto_absent = fill_absent(&tx, &session, &now_ts())?;
    tx.execute(
        "UPDATE attendance_sessions SET status = 'completed', end_time = ? WHERE id = ?",
        (format_time(end_time), &session.id),
    )
    .map_err(|e| write_err("db_update_failed", "attendance_sessions", e))?;
    let statistics = session_counts(&tx, &session.id)?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(
        session_id = %session.id,
        duration_minutes,
        auto_absent,
        "attendance session ended"
    );
    Ok(json!({
        "sessionId": session.id,
        "endTime": format_time(end_time),
        "durationMinutes": duration_minutes,
        "autoAbsentCount": auto_absent,
        "statistics": statistics
    }))
}

fn sessions_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let course_id = get_optional_str(p, "courseId")?;
    let mut lecturer_id = get_optional_str(p, "lecturerId")?;
    if let Some(actor) = req.actor.as_ref().filter(|a| a.role == Role::Lecturer) {
        lecturer_id = match lecturer_id {
            Some(lid) => {
                ensure_lecturer_scope(Some(actor), &lid)?;
                Some(lid)
            }
            None => actor.user_id.clone(),
        };
    }
    let status = get_optional_str(p, "status")?;
    let date_from = get_optional_str(p, "dateFrom")?
        .map(|s| parse_date("dateFrom", &s).map(|d| d.to_string()))
        .transpose()?;
    let date_to = get_optional_str(p, "dateTo")?
        .map(|s| parse_date("dateTo", &s).map(|d| d.to_string()))
        .transpose()?;

    let mut stmt = conn.prepare(
        "SELECT ats.id, ats.course_id, c.code, c.name, ats.lecturer_id,
                l.firstname || ' ' || l.surname, ats.session_date, ats.start_time, ats.end_time,
                ats.session_type, ats.location, ats.status, ats.session_year, ats.semester,
                (SELECT COUNT(*) FROM attendance a
                  WHERE a.attendance_session_id = ats.id AND a.status = 'present'),
                (SELECT COUNT(*) FROM attendance a
                  WHERE a.attendance_session_id = ats.id AND a.status = 'late'),
                (SELECT COUNT(*) FROM attendance a WHERE a.attendance_session_id = ats.id)
         FROM attendance_sessions ats
         JOIN courses c ON c.id = ats.course_id
         JOIN lecturers l ON l.id = ats.lecturer_id
         WHERE (?1 IS NULL OR ats.course_id = ?1)
           AND (?2 IS NULL OR ats.lecturer_id = ?2)
           AND (?3 IS NULL OR ats.status = ?3)
           AND (?4 IS NULL OR ats.session_date >= ?4)
           AND (?5 IS NULL OR ats.session_date <= ?5)
         ORDER BY ats.session_date DESC, ats.start_time DESC",
    )?;
    let sessions = stmt
        .query_map(
            (&course_id, &lecturer_id, &status, &date_from, &date_to),
            |r| {
                let present: i64 = r.get(14)?;
                let total: i64 = r.get(16)?;
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "courseId": r.get::<_, String>(1)?,
                    "courseCode": r.get::<_, String>(2)?,
                    "courseName": r.get::<_, String>(3)?,
                    "lecturerId": r.get::<_, String>(4)?,
                    "lecturerName": r.get::<_, String>(5)?,
                    "sessionDate": r.get::<_, String>(6)?,
                    "startTime": r.get::<_, String>(7)?,
                    "endTime": r.get::<_, Option<String>>(8)?,
                    "sessionType": r.get::<_, String>(9)?,
                    "location": r.get::<_, Option<String>>(10)?,
                    "status": r.get::<_, String>(11)?,
                    "sessionYear": r.get::<_, String>(12)?,
                    "semester": r.get::<_, String>(13)?,
                    "presentCount": present,
                    "lateCount": r.get::<_, i64>(15)?,
                    "markedCount": total,
                    "attendanceRate": attendance_rate(present, total)
                }))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "sessions": sessions }))
}

fn sessions_open(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(&req.params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    ensure_lecturer_scope(req.actor.as_ref(), &session.lecturer_id)?;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.reg_number, s.firstname, s.surname,
                a.id, a.status, a.method, a.recognition_confidence, a.marked_at
         FROM student_courses sc
         JOIN students s ON s.id = sc.student_id
         LEFT JOIN attendance a
           ON a.student_id = s.id AND a.attendance_session_id = ?1
         WHERE sc.course_id = ?2 AND sc.session_year = ?3 AND sc.semester = ?4
         ORDER BY s.surname, s.firstname",
    )?;
    let roster = stmt
        .query_map(
            (
                &session.id,
                &session.course_id,
                &session.session_year,
                &session.semester,
            ),
            |r| {
                let first: String = r.get(2)?;
                let last: String = r.get(3)?;
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "regNumber": r.get::<_, String>(1)?,
                    "displayName": format!("{} {}", first, last),
                    "attendanceId": r.get::<_, Option<String>>(4)?,
                    "status": r.get::<_, Option<String>>(5)?,
                    "method": r.get::<_, Option<String>>(6)?,
                    "confidence": r.get::<_, Option<f64>>(7)?,
                    "markedAt": r.get::<_, Option<String>>(8)?
                }))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "session": {
            "id": session.id,
            "lecturerId": session.lecturer_id,
            "courseId": session.course_id,
            "sessionDate": session.session_date,
            "startTime": session.start_time,
            "status": session.status,
            "sessionYear": session.session_year,
            "semester": session.semester
        },
        "roster": roster,
        "statistics": session_counts(conn, &session_id)?
    }))
}

fn sessions_delete(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(&req.params, "sessionId")?;
    load_session(conn, &session_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let marks = tx
        .execute(
            "DELETE FROM attendance WHERE attendance_session_id = ?",
            [&session_id],
        )
        .map_err(|e| write_err("db_delete_failed", "attendance", e))?;
    tx.execute(
        "DELETE FROM attendance_sessions WHERE id = ?",
        [&session_id],
    )
    .map_err(|e| write_err("db_delete_failed", "attendance_sessions", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(session_id = %session_id, marks, "attendance session deleted");
    Ok(json!({ "ok": true, "deletedMarks": marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.start" => Some(with_conn(state, req, sessions_start)),
        "sessions.end" => Some(with_conn(state, req, sessions_end)),
        "sessions.list" => Some(with_conn(state, req, sessions_list)),
        "sessions.open" => Some(with_conn(state, req, sessions_open)),
        "sessions.delete" => Some(with_conn(state, req, sessions_delete)),
        _ => None,
    }
}
