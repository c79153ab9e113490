use crate::eligibility;
use crate::ipc::handlers::eligibility::{decision_json, load_active_course, load_rule, load_student};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    ensure_student_scope, get_optional_str, get_required_str, new_id, now_ts, parse_semester,
    parse_session_year, with_conn, write_err, HandlerErr,
};
use crate::ipc::types::{AppState, Request, Role};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn registrations_register(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let student_id = get_required_str(p, "studentId")?;
    let course_id = get_required_str(p, "courseId")?;
    let period = setup::academic_period(conn)?;
    let session_year = match get_optional_str(p, "sessionYear")? {
        Some(s) => parse_session_year(&s)?,
        None => period.session_year,
    };
    let semester = match get_optional_str(p, "semester")? {
        Some(s) => parse_semester(&s)?,
        None => period.semester,
    };

    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let course = load_active_course(conn, &course_id)?
        .ok_or_else(|| HandlerErr::not_found("course not found or inactive"))?;

    let already: Option<String> = conn
        .query_row(
            "SELECT id FROM student_courses
             WHERE student_id = ? AND course_id = ? AND session_year = ?",
            (&student_id, &course_id, &session_year),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing_id) = already {
        return Err(HandlerErr::conflict(
            "student is already registered for this course in the selected session",
        )
        .with_details(json!({ "registrationId": existing_id })));
    }

    let rule = load_rule(conn, &course_id)?;
    let decision = eligibility::resolve(&student, &course, rule.as_ref());
    let reason = decision.reason.to_string();
    if !decision.eligible {
        tracing::info!(
            student_id = %student_id,
            course_id = %course_id,
            reason = decision.reason.code(),
            "registration rejected"
        );
        return Err(HandlerErr::new(
            "not_eligible",
            format!("Student is not eligible for this course: {}", reason),
        )
        .with_details(decision_json(&decision)));
    }

    let registration_id = new_id();
    let created_at = now_ts();
    conn.execute(
        "INSERT INTO student_courses(id, student_id, course_id, session_year, semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &registration_id,
            &student_id,
            &course_id,
            &session_year,
            &semester,
            &created_at,
        ),
    )
    .map_err(|e| write_err("db_insert_failed", "student_courses", e))?;

    // The audit trail must not undo a registration that already succeeded.
    if let Err(e) = conn.execute(
        "INSERT INTO registration_audit(id, student_id, course_id, session_year, eligibility_reason, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (new_id(), &student_id, &course_id, &session_year, &reason, &created_at),
    ) {
        tracing::warn!(error = %e, registration_id = %registration_id, "audit logging failed");
    }
    tracing::info!(
        registration_id = %registration_id,
        student_id = %student_id,
        course_id = %course_id,
        reason = decision.reason.code(),
        "student registered"
    );

    Ok(json!({
        "registrationId": registration_id,
        "sessionYear": session_year,
        "semester": semester,
        "decision": decision_json(&decision),
        "message": format!("Student successfully registered for the course! {}", reason)
    }))
}

fn registrations_list(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let mut student_id = get_optional_str(p, "studentId")?;
    if let Some(actor) = req.actor.as_ref().filter(|a| a.role == Role::Student) {
        student_id = match student_id {
            Some(sid) => {
                ensure_student_scope(Some(actor), &sid)?;
                Some(sid)
            }
            None => actor.user_id.clone(),
        };
    }
    let course_id = get_optional_str(p, "courseId")?;
    let session_year = get_optional_str(p, "sessionYear")?;
    let semester = get_optional_str(p, "semester")?;

    let mut stmt = conn.prepare(
        "SELECT sc.id, sc.student_id, s.reg_number, s.firstname, s.surname, s.level,
                sc.course_id, c.code, c.name, c.credit_units, sc.session_year, sc.semester,
                sc.created_at
         FROM student_courses sc
         JOIN students s ON s.id = sc.student_id
         JOIN courses c ON c.id = sc.course_id
         WHERE (?1 IS NULL OR sc.student_id = ?1)
           AND (?2 IS NULL OR sc.course_id = ?2)
           AND (?3 IS NULL OR sc.session_year = ?3)
           AND (?4 IS NULL OR sc.semester = ?4)
         ORDER BY sc.session_year DESC, c.code, s.surname",
    )?;
    let registrations = stmt
        .query_map((&student_id, &course_id, &session_year, &semester), |r| {
            let first: String = r.get(3)?;
            let last: String = r.get(4)?;
            Ok(json!({
                "registrationId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "regNumber": r.get::<_, String>(2)?,
                "studentName": format!("{} {}", first, last),
                "level": r.get::<_, i64>(5)?,
                "courseId": r.get::<_, String>(6)?,
                "courseCode": r.get::<_, String>(7)?,
                "courseName": r.get::<_, String>(8)?,
                "creditUnits": r.get::<_, i64>(9)?,
                "sessionYear": r.get::<_, String>(10)?,
                "semester": r.get::<_, String>(11)?,
                "registeredAt": r.get::<_, String>(12)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let total_units: i64 = registrations
        .iter()
        .filter_map(|r| r.get("creditUnits").and_then(|v| v.as_i64()))
        .sum();
    Ok(json!({ "registrations": registrations, "totalCreditUnits": total_units }))
}

fn registrations_drop(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let registration_id = get_required_str(&req.params, "registrationId")?;
    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT student_id, course_id, session_year, semester
             FROM student_courses WHERE id = ?",
            [&registration_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((student_id, course_id, session_year, semester)) = row else {
        return Err(HandlerErr::not_found("registration not found"));
    };

    let marks: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM attendance a
         JOIN attendance_sessions ats ON ats.id = a.attendance_session_id
         WHERE a.student_id = ? AND ats.course_id = ?
           AND ats.session_year = ? AND ats.semester = ?",
        (&student_id, &course_id, &session_year, &semester),
        |r| r.get(0),
    )?;
    if marks > 0 {
        return Err(HandlerErr::conflict(format!(
            "cannot drop registration: {} attendance records exist",
            marks
        ))
        .with_details(json!({ "attendanceCount": marks })));
    }

    conn.execute("DELETE FROM student_courses WHERE id = ?", [&registration_id])
        .map_err(|e| write_err("db_delete_failed", "student_courses", e))?;
    tracing::info!(registration_id = %registration_id, "registration dropped");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "registrations.register" => Some(with_conn(state, req, registrations_register)),
        "registrations.list" => Some(with_conn(state, req, registrations_list)),
        "registrations.drop" => Some(with_conn(state, req, registrations_drop)),
        _ => None,
    }
}
