use std::collections::HashMap;

use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    attendance_rate, get_date_range, get_optional_f64, get_optional_str, with_conn, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

struct SessionRate {
    course_id: String,
    lecturer_id: String,
    rate: Option<f64>,
}

/// Per-session present rate for sessions held inside `[from, to]`.
fn session_rates(conn: &Connection, from: &str, to: &str) -> Result<Vec<SessionRate>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT ats.course_id, ats.lecturer_id,
                COALESCE(SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END), 0),
                COUNT(a.id)
         FROM attendance_sessions ats
         LEFT JOIN attendance a ON a.attendance_session_id = ats.id
         WHERE ats.session_date BETWEEN ?1 AND ?2
         GROUP BY ats.id",
    )?;
    let rates = stmt
        .query_map((from, to), |r| {
            Ok(SessionRate {
                course_id: r.get(0)?,
                lecturer_id: r.get(1)?,
                rate: attendance_rate(r.get(2)?, r.get(3)?),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rates)
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean * 100.0).round() / 100.0)
}

fn average_by<F>(rates: &[SessionRate], key: F) -> HashMap<String, Option<f64>>
where
    F: Fn(&SessionRate) -> &str,
{
    let mut grouped: HashMap<String, Vec<f64>> = HashMap::new();
    for r in rates {
        let entry = grouped.entry(key(r).to_string()).or_default();
        if let Some(rate) = r.rate {
            entry.push(rate);
        }
    }
    grouped
        .into_iter()
        .map(|(k, v)| (k, average(&v)))
        .collect()
}

fn reports_overview(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (from, to) = get_date_range(&req.params)?;
    let count = |sql: &str| -> Result<i64, HandlerErr> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    let totals = json!({
        "students": count("SELECT COUNT(*) FROM students WHERE is_active = 1")?,
        "lecturers": count("SELECT COUNT(*) FROM lecturers WHERE is_active = 1")?,
        "courses": count("SELECT COUNT(*) FROM courses WHERE is_active = 1")?,
        "faculties": count("SELECT COUNT(*) FROM faculties")?,
        "departments": count("SELECT COUNT(*) FROM departments")?
    });

    let (records, present, late, absent): (i64, i64, i64, i64) = conn.query_row(
        "SELECT COUNT(a.id),
                COALESCE(SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END), 0)
         FROM attendance a
         JOIN attendance_sessions ats ON ats.id = a.attendance_session_id
         WHERE ats.session_date BETWEEN ?1 AND ?2",
        (&from, &to),
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT f.id, f.name,
                (SELECT COUNT(*) FROM departments d WHERE d.faculty_id = f.id),
                (SELECT COUNT(*) FROM students s JOIN departments d ON d.id = s.department_id
                  WHERE d.faculty_id = f.id AND s.is_active = 1),
                (SELECT COUNT(*) FROM lecturers l JOIN departments d ON d.id = l.department_id
                  WHERE d.faculty_id = f.id AND l.is_active = 1),
                (SELECT COUNT(*) FROM courses c JOIN departments d ON d.id = c.department_id
                  WHERE d.faculty_id = f.id AND c.is_active = 1)
         FROM faculties f
         ORDER BY 4 DESC, f.name",
    )?;
    let faculties = stmt
        .query_map([], |r| {
            Ok(json!({
                "facultyId": r.get::<_, String>(0)?,
                "facultyName": r.get::<_, String>(1)?,
                "departmentCount": r.get::<_, i64>(2)?,
                "studentCount": r.get::<_, i64>(3)?,
                "lecturerCount": r.get::<_, i64>(4)?,
                "courseCount": r.get::<_, i64>(5)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "dateFrom": from,
        "dateTo": to,
        "totals": totals,
        "attendance": {
            "totalRecords": records,
            "present": present,
            "late": late,
            "absent": absent,
            "attendanceRate": attendance_rate(present, records)
        },
        "facultyBreakdown": faculties
    }))
}

fn reports_course_statistics(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let (from, to) = get_date_range(p)?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let department_id = get_optional_str(p, "departmentId")?;
    let averages = average_by(&session_rates(conn, &from, &to)?, |r| r.course_id.as_str());

    let mut stmt = conn.prepare(
        "SELECT c.id, c.code, c.name, d.name, f.name,
                (SELECT COUNT(DISTINCT sc.student_id) FROM student_courses sc
                  WHERE sc.course_id = c.id),
                (SELECT COUNT(*) FROM attendance_sessions ats
                  WHERE ats.course_id = c.id AND ats.session_date BETWEEN ?1 AND ?2)
         FROM courses c
         JOIN departments d ON d.id = c.department_id
         JOIN faculties f ON f.id = d.faculty_id
         WHERE c.is_active = 1
           AND (?3 IS NULL OR d.faculty_id = ?3)
           AND (?4 IS NULL OR c.department_id = ?4)
         ORDER BY 6 DESC, c.code",
    )?;
    let courses = stmt
        .query_map((&from, &to, &faculty_id, &department_id), |r| {
            let course_id: String = r.get(0)?;
            let avg = averages.get(&course_id).copied().flatten();
            Ok(json!({
                "courseId": course_id,
                "courseCode": r.get::<_, String>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "departmentName": r.get::<_, String>(3)?,
                "facultyName": r.get::<_, String>(4)?,
                "enrolledStudents": r.get::<_, i64>(5)?,
                "totalSessions": r.get::<_, i64>(6)?,
                "avgAttendanceRate": avg
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "dateFrom": from, "dateTo": to, "courses": courses }))
}

fn reports_student_attendance(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let (from, to) = get_date_range(p)?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let department_id = get_optional_str(p, "departmentId")?;
    let course_id = get_optional_str(p, "courseId")?;

    let mut stmt = conn.prepare(
        "SELECT s.id, s.reg_number, s.firstname || ' ' || s.surname, d.name, f.name,
                COUNT(a.id),
                SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.status = 'late' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END)
         FROM students s
         JOIN departments d ON d.id = s.department_id
         JOIN faculties f ON f.id = d.faculty_id
         JOIN attendance a ON a.student_id = s.id
         JOIN attendance_sessions ats ON ats.id = a.attendance_session_id
         WHERE s.is_active = 1
           AND ats.session_date BETWEEN ?1 AND ?2
           AND (?3 IS NULL OR d.faculty_id = ?3)
           AND (?4 IS NULL OR s.department_id = ?4)
           AND (?5 IS NULL OR ats.course_id = ?5)
         GROUP BY s.id
         ORDER BY SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) * 1.0 / COUNT(a.id),
                  s.reg_number",
    )?;
    let students = stmt
        .query_map(
            (&from, &to, &faculty_id, &department_id, &course_id),
            |r| {
                let total: i64 = r.get(5)?;
                let present: i64 = r.get(6)?;
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "regNumber": r.get::<_, String>(1)?,
                    "studentName": r.get::<_, String>(2)?,
                    "departmentName": r.get::<_, String>(3)?,
                    "facultyName": r.get::<_, String>(4)?,
                    "totalRecords": total,
                    "present": present,
                    "late": r.get::<_, i64>(7)?,
                    "absent": r.get::<_, i64>(8)?,
                    "attendanceRate": attendance_rate(present, total)
                }))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "dateFrom": from, "dateTo": to, "students": students }))
}

fn reports_lecturer_performance(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let (from, to) = get_date_range(p)?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let department_id = get_optional_str(p, "departmentId")?;
    let averages = average_by(&session_rates(conn, &from, &to)?, |r| r.lecturer_id.as_str());

    let mut stmt = conn.prepare(
        "SELECT l.id, l.firstname || ' ' || l.surname, d.name, f.name,
                COUNT(DISTINCT ats.course_id),
                COUNT(DISTINCT ats.id),
                (SELECT COUNT(DISTINCT sc.student_id) FROM student_courses sc
                  WHERE sc.course_id IN (
                    SELECT x.course_id FROM attendance_sessions x
                    WHERE x.lecturer_id = l.id AND x.session_date BETWEEN ?1 AND ?2))
         FROM lecturers l
         JOIN departments d ON d.id = l.department_id
         JOIN faculties f ON f.id = d.faculty_id
         JOIN attendance_sessions ats
           ON ats.lecturer_id = l.id AND ats.session_date BETWEEN ?1 AND ?2
         WHERE l.is_active = 1
           AND (?3 IS NULL OR d.faculty_id = ?3)
           AND (?4 IS NULL OR l.department_id = ?4)
         GROUP BY l.id",
    )?;
    let mut lecturers = stmt
        .query_map((&from, &to, &faculty_id, &department_id), |r| {
            let lecturer_id: String = r.get(0)?;
            let avg = averages.get(&lecturer_id).copied().flatten();
            Ok((
                avg,
                json!({
                    "lecturerId": lecturer_id,
                    "lecturerName": r.get::<_, String>(1)?,
                    "departmentName": r.get::<_, String>(2)?,
                    "facultyName": r.get::<_, String>(3)?,
                    "coursesTaught": r.get::<_, i64>(4)?,
                    "sessionsConducted": r.get::<_, i64>(5)?,
                    "totalStudentsTaught": r.get::<_, i64>(6)?,
                    "avgAttendanceRate": avg
                }),
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    lecturers.sort_by(|a, b| {
        b.0.unwrap_or(0.0)
            .partial_cmp(&a.0.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let lecturers: Vec<_> = lecturers.into_iter().map(|(_, v)| v).collect();
    Ok(json!({ "dateFrom": from, "dateTo": to, "lecturers": lecturers }))
}

fn reports_registration_trends(
    conn: &Connection,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let (from, to) = get_date_range(p)?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let department_id = get_optional_str(p, "departmentId")?;

    let mut stmt = conn.prepare(
        "SELECT substr(sc.created_at, 1, 10) AS day,
                COUNT(*),
                COUNT(DISTINCT sc.student_id),
                COUNT(DISTINCT sc.course_id)
         FROM student_courses sc
         JOIN courses c ON c.id = sc.course_id
         JOIN departments d ON d.id = c.department_id
         WHERE substr(sc.created_at, 1, 10) BETWEEN ?1 AND ?2
           AND (?3 IS NULL OR d.faculty_id = ?3)
           AND (?4 IS NULL OR c.department_id = ?4)
         GROUP BY day
         ORDER BY day DESC",
    )?;
    let days = stmt
        .query_map((&from, &to, &faculty_id, &department_id), |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "registrations": r.get::<_, i64>(1)?,
                "uniqueStudents": r.get::<_, i64>(2)?,
                "coursesRegistered": r.get::<_, i64>(3)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "dateFrom": from, "dateTo": to, "days": days }))
}

fn reports_defaulters(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let p = &req.params;
    let (from, to) = get_date_range(p)?;
    let faculty_id = get_optional_str(p, "facultyId")?;
    let department_id = get_optional_str(p, "departmentId")?;
    let course_id = get_optional_str(p, "courseId")?;
    let threshold = match get_optional_f64(p, "thresholdPercent")? {
        Some(t) if (0.0..=100.0).contains(&t) => t,
        Some(_) => {
            return Err(HandlerErr::bad_params(
                "thresholdPercent must be between 0 and 100",
            ))
        }
        None => setup::attendance_policy(conn)?.defaulter_threshold_percent as f64,
    };

    let mut stmt = conn.prepare(
        "SELECT s.id, s.reg_number, s.firstname || ' ' || s.surname, d.name, f.name,
                c.id, c.code, c.name,
                COUNT(a.id),
                SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END),
                SUM(CASE WHEN a.status = 'absent' THEN 1 ELSE 0 END)
         FROM students s
         JOIN departments d ON d.id = s.department_id
         JOIN faculties f ON f.id = d.faculty_id
         JOIN attendance a ON a.student_id = s.id
         JOIN attendance_sessions ats ON ats.id = a.attendance_session_id
         JOIN courses c ON c.id = ats.course_id
         WHERE s.is_active = 1
           AND ats.session_date BETWEEN ?1 AND ?2
           AND (?3 IS NULL OR d.faculty_id = ?3)
           AND (?4 IS NULL OR s.department_id = ?4)
           AND (?5 IS NULL OR c.id = ?5)
         GROUP BY s.id, c.id
         ORDER BY SUM(CASE WHEN a.status = 'present' THEN 1 ELSE 0 END) * 1.0 / COUNT(a.id),
                  s.reg_number",
    )?;
    let rows = stmt
        .query_map(
            (&from, &to, &faculty_id, &department_id, &course_id),
            |r| {
                let total: i64 = r.get(8)?;
                let attended: i64 = r.get(9)?;
                let rate = attendance_rate(attended, total);
                Ok((
                    rate,
                    json!({
                        "studentId": r.get::<_, String>(0)?,
                        "regNumber": r.get::<_, String>(1)?,
                        "studentName": r.get::<_, String>(2)?,
                        "departmentName": r.get::<_, String>(3)?,
                        "facultyName": r.get::<_, String>(4)?,
                        "courseId": r.get::<_, String>(5)?,
                        "courseCode": r.get::<_, String>(6)?,
                        "courseName": r.get::<_, String>(7)?,
                        "totalClasses": total,
                        "classesAttended": attended,
                        "classesMissed": r.get::<_, i64>(10)?,
                        "attendanceRate": rate
                    }),
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let defaulters: Vec<_> = rows
        .into_iter()
        .filter(|(rate, _)| rate.map(|r| r < threshold).unwrap_or(false))
        .map(|(_, v)| v)
        .collect();

    Ok(json!({
        "dateFrom": from,
        "dateTo": to,
        "thresholdPercent": threshold,
        "defaulters": defaulters
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.overview" => Some(with_conn(state, req, reports_overview)),
        "reports.courseStatistics" => Some(with_conn(state, req, reports_course_statistics)),
        "reports.studentAttendance" => Some(with_conn(state, req, reports_student_attendance)),
        "reports.lecturerPerformance" => Some(with_conn(state, req, reports_lecturer_performance)),
        "reports.registrationTrends" => Some(with_conn(state, req, reports_registration_trends)),
        "reports.defaulters" => Some(with_conn(state, req, reports_defaulters)),
        _ => None,
    }
}
