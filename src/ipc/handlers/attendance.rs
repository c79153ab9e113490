use crate::ipc::handlers::sessions::{load_session, SessionRow};
use crate::ipc::handlers::setup::{self, AttendancePolicy};
use crate::ipc::helpers::{
    attendance_rate, ensure_lecturer_scope, ensure_student_scope, get_optional_f64,
    get_optional_str, get_required_str, new_id, now_ts, parse_date, parse_time, with_conn,
    write_err, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const STATUSES: &[&str] = &["present", "late", "absent", "excused"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Manual,
    Face,
}

impl Method {
    fn parse(raw: &str) -> Result<Self, HandlerErr> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Method::Manual),
            "face" => Ok(Method::Face),
            _ => Err(HandlerErr::bad_params("method must be manual or face")),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Method::Manual => "manual",
            Method::Face => "face",
        }
    }
}

fn parse_status(raw: &str) -> Result<String, HandlerErr> {
    let s = raw.trim().to_ascii_lowercase();
    if STATUSES.contains(&s.as_str()) {
        Ok(s)
    } else {
        Err(HandlerErr::bad_params(
            "status must be present, late, absent or excused",
        ))
    }
}

/// Minutes since the session started decide the status. Marks before the
/// start count as on time.
fn status_for_elapsed(
    policy: &AttendancePolicy,
    elapsed_minutes: i64,
    method: Method,
) -> Result<&'static str, HandlerErr> {
    if elapsed_minutes <= policy.late_after_minutes {
        Ok("present")
    } else if elapsed_minutes <= policy.window_minutes {
        Ok("late")
    } else if method == Method::Face {
        Err(HandlerErr::conflict("attendance window has closed for this session")
            .with_details(json!({
                "elapsedMinutes": elapsed_minutes,
                "windowMinutes": policy.window_minutes
            })))
    } else {
        Ok("late")
    }
}

fn ensure_registered(
    conn: &Connection,
    session: &SessionRow,
    student_id: &str,
) -> Result<(), HandlerErr> {
    let registered: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM student_courses
             WHERE student_id = ? AND course_id = ? AND session_year = ? AND semester = ?",
            (
                student_id,
                &session.course_id,
                &session.session_year,
                &session.semester,
            ),
            |r| r.get(0),
        )
        .optional()?;
    if registered.is_none() {
        return Err(HandlerErr::conflict(
            "student is not registered for this course; register first before marking attendance",
        )
        .with_details(json!({ "studentId": student_id })));
    }
    Ok(())
}

fn attendance_mark(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let session_id = get_required_str(p, "sessionId")?;
    let student_id = get_required_str(p, "studentId")?;
    let method = match get_optional_str(p, "method")? {
        Some(m) => Method::parse(&m)?,
        None => Method::Manual,
    };
    let confidence = get_optional_f64(p, "confidence")?;
    if let Some(c) = confidence {
        if !(0.0..=1.0).contains(&c) {
            return Err(HandlerErr::bad_params("confidence must be between 0 and 1"));
        }
    }
    if method == Method::Face && confidence.is_none() {
        return Err(HandlerErr::bad_params("face marks require a confidence"));
    }

    let session = load_session(conn, &session_id)?;
    ensure_lecturer_scope(req.actor.as_ref(), &session.lecturer_id)?;
    if session.status != "active" {
        return Err(HandlerErr::conflict("session is not active"));
    }
    ensure_registered(conn, &session, &student_id)?;

    let status = match get_optional_str(p, "status")? {
        Some(s) => parse_status(&s)?,
        None => {
            let policy = setup::attendance_policy(conn)?;
            // Full date-times: evening sessions may run past midnight.
            let session_date = parse_date("sessionDate", &session.session_date)?;
            let started = session_date.and_time(parse_time("startTime", &session.start_time)?);
            let now = chrono::Local::now().naive_local();
            let marked_time = get_optional_str(p, "markedTime")?;
            let marked_date = match get_optional_str(p, "markedDate")? {
                Some(d) => parse_date("markedDate", &d)?,
                None if marked_time.is_some() => session_date,
                None => now.date(),
            };
            let marked = match marked_time {
                Some(t) => marked_date.and_time(parse_time("markedTime", &t)?),
                None => marked_date.and_time(now.time()),
            };
            let elapsed = (marked - started).num_minutes().max(0);
            status_for_elapsed(&policy, elapsed, method)?.to_string()
        }
    };

    // Pre-filled absences from auto-enrolment may be overwritten; real marks may not.
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, method FROM attendance
             WHERE student_id = ? AND attendance_session_id = ?",
            (&student_id, &session.id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let marked_at = now_ts();
    let attendance_id = match existing {
        Some((_, prior)) if prior != "auto" => {
            return Err(HandlerErr::conflict(
                "attendance already marked for this student in this session",
            ));
        }
        Some((id, _)) => {
            conn.execute(
                "UPDATE attendance
                 SET status = ?, method = ?, recognition_confidence = ?, marked_at = ?, updated_at = ?
                 WHERE id = ?",
                (&status, method.as_str(), confidence, &marked_at, &marked_at, &id),
            )
            .map_err(|e| write_err("db_update_failed", "attendance", e))?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO attendance(
                    id, student_id, attendance_session_id, course_id, status, method,
                    recognition_confidence, marked_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    &session.id,
                    &session.course_id,
                    &status,
                    method.as_str(),
                    confidence,
                    &marked_at,
                ),
            )
            .map_err(|e| write_err("db_insert_failed", "attendance", e))?;
            id
        }
    };

    tracing::info!(
        session_id = %session.id,
        student_id = %student_id,
        status = %status,
        method = method.as_str(),
        "attendance marked"
    );
    Ok(json!({
        "attendanceId": attendance_id,
        "status": status,
        "method": method.as_str(),
        "confidence": confidence,
        "markedAt": marked_at
    }))
}

fn attendance_mark_bulk(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(&req.params, "sessionId")?;
    let marks = req
        .params
        .get("marks")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing marks"))?;

    let session = load_session(conn, &session_id)?;
    ensure_lecturer_scope(req.actor.as_ref(), &session.lecturer_id)?;
    if session.status == "cancelled" {
        return Err(HandlerErr::conflict("session is cancelled"));
    }

    let mut parsed = Vec::with_capacity(marks.len());
    for (i, mark) in marks.iter().enumerate() {
        let student_id = get_required_str(mark, "studentId")
            .map_err(|e| HandlerErr::bad_params(format!("marks[{}]: {}", i, e.message)))?;
        let status = get_required_str(mark, "status")
            .and_then(|s| parse_status(&s))
            .map_err(|e| HandlerErr::bad_params(format!("marks[{}]: {}", i, e.message)))?;
        parsed.push((student_id, status));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let ts = now_ts();
    for (student_id, status) in &parsed {
        ensure_registered(&tx, &session, student_id)?;
        tx.execute(
            "INSERT INTO attendance(
                id, student_id, attendance_session_id, course_id, status, method, marked_at
             ) VALUES(?, ?, ?, ?, ?, 'manual', ?)
             ON CONFLICT(student_id, attendance_session_id) DO UPDATE SET
               status = excluded.status,
               method = 'manual',
               recognition_confidence = NULL,
               updated_at = excluded.marked_at",
            (
                new_id(),
                student_id,
                &session.id,
                &session.course_id,
                status,
                &ts,
            ),
        )
        .map_err(|e| write_err("db_update_failed", "attendance", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(session_id = %session.id, count = parsed.len(), "bulk attendance saved");
    Ok(json!({ "ok": true, "updated": parsed.len() }))
}

fn attendance_for_student(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let student_id = get_required_str(p, "studentId")?;
    ensure_student_scope(req.actor.as_ref(), &student_id)?;
    let course_id = get_optional_str(p, "courseId")?;
    let session_year = get_optional_str(p, "sessionYear")?;
    let semester = get_optional_str(p, "semester")?;

    let mut stmt = conn.prepare(
        "SELECT a.id, ats.id, c.id, c.code, c.name, ats.session_date, ats.start_time,
                ats.session_type, a.status, a.method, a.recognition_confidence, a.marked_at
         FROM attendance a
         JOIN attendance_sessions ats ON ats.id = a.attendance_session_id
         JOIN courses c ON c.id = ats.course_id
         WHERE a.student_id = ?1
           AND (?2 IS NULL OR ats.course_id = ?2)
           AND (?3 IS NULL OR ats.session_year = ?3)
           AND (?4 IS NULL OR ats.semester = ?4)
         ORDER BY ats.session_date DESC, ats.start_time DESC",
    )?;
    let records = stmt
        .query_map((&student_id, &course_id, &session_year, &semester), |r| {
            Ok(json!({
                "attendanceId": r.get::<_, String>(0)?,
                "sessionId": r.get::<_, String>(1)?,
                "courseId": r.get::<_, String>(2)?,
                "courseCode": r.get::<_, String>(3)?,
                "courseName": r.get::<_, String>(4)?,
                "sessionDate": r.get::<_, String>(5)?,
                "startTime": r.get::<_, String>(6)?,
                "sessionType": r.get::<_, String>(7)?,
                "status": r.get::<_, String>(8)?,
                "method": r.get::<_, String>(9)?,
                "confidence": r.get::<_, Option<f64>>(10)?,
                "markedAt": r.get::<_, Option<String>>(11)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT c.id, c.code, c.name, COUNT(a.id),
                COALESCE(SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END), 0)
         FROM attendance a
         JOIN attendance_sessions ats ON ats.id = a.attendance_session_id
         JOIN courses c ON c.id = ats.course_id
         WHERE a.student_id = ?1
           AND (?2 IS NULL OR ats.course_id = ?2)
           AND (?3 IS NULL OR ats.session_year = ?3)
           AND (?4 IS NULL OR ats.semester = ?4)
         GROUP BY c.id, c.code, c.name
         ORDER BY c.code",
    )?;
    let courses = stmt
        .query_map((&student_id, &course_id, &session_year, &semester), |r| {
            let total: i64 = r.get(3)?;
            let present: i64 = r.get(4)?;
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "courseCode": r.get::<_, String>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "total": total,
                "present": present,
                "late": r.get::<_, i64>(5)?,
                "absent": r.get::<_, i64>(6)?,
                "attendanceRate": attendance_rate(present, total)
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({ "studentId": student_id, "records": records, "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.markBulk" => Some(with_conn(state, req, attendance_mark_bulk)),
        "attendance.forStudent" => Some(with_conn(state, req, attendance_for_student)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AttendancePolicy {
        AttendancePolicy {
            window_minutes: 15,
            late_after_minutes: 10,
            defaulter_threshold_percent: 75,
        }
    }

    #[test]
    fn marks_inside_grace_period_are_present() {
        let p = policy();
        assert_eq!(status_for_elapsed(&p, 0, Method::Face).ok(), Some("present"));
        assert_eq!(status_for_elapsed(&p, 10, Method::Manual).ok(), Some("present"));
    }

    #[test]
    fn marks_after_grace_period_are_late() {
        let p = policy();
        assert_eq!(status_for_elapsed(&p, 11, Method::Face).ok(), Some("late"));
        assert_eq!(status_for_elapsed(&p, 15, Method::Face).ok(), Some("late"));
    }

    #[test]
    fn face_marks_after_window_are_rejected() {
        let p = policy();
        let e = status_for_elapsed(&p, 16, Method::Face).err().map(|e| e.code);
        assert_eq!(e, Some("conflict"));
        assert_eq!(status_for_elapsed(&p, 90, Method::Manual).ok(), Some("late"));
    }
}
