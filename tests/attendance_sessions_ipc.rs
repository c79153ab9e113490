use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    actor: &serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
        "actor": actor,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result_of(method: &str, value: serde_json::Value) -> serde_json::Value {
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    actor: &serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params, actor);
    result_of(method, value)
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .pointer("/error/code")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

struct Class {
    course_id: String,
    lecturer_id: String,
    other_lecturer_id: String,
    students: Vec<String>,
    outsider: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Class {
    let admin = json!({ "role": "admin" });
    let faculty = str_field(
        &request_ok(
            stdin,
            reader,
            "s1",
            "faculties.create",
            json!({ "name": "Engineering", "code": "eng" }),
            &admin,
        ),
        "facultyId",
    );
    let dept = str_field(
        &request_ok(
            stdin,
            reader,
            "s2",
            "departments.create",
            json!({ "facultyId": faculty, "name": "Electrical", "code": "eee" }),
            &admin,
        ),
        "departmentId",
    );
    let course_id = str_field(
        &request_ok(
            stdin,
            reader,
            "s3",
            "courses.create",
            json!({
                "departmentId": dept,
                "name": "Circuit Theory",
                "code": "eee211",
                "creditUnits": 2,
                "semester": "first",
                "level": 2
            }),
            &admin,
        ),
        "courseId",
    );
    let mut lecturers = Vec::new();
    for (i, staff) in ["st-01", "st-02"].iter().enumerate() {
        let id = format!("l{}", i);
        lecturers.push(str_field(
            &request_ok(
                stdin,
                reader,
                &id,
                "lecturers.create",
                json!({
                    "staffId": staff,
                    "title": "Dr.",
                    "firstName": "Grace",
                    "surname": staff,
                    "departmentId": dept
                }),
                &admin,
            ),
            "lecturerId",
        ));
    }
    request_ok(
        stdin,
        reader,
        "s4",
        "courses.assignLecturer",
        json!({ "courseId": course_id, "lecturerId": lecturers[0] }),
        &admin,
    );

    let mut students = Vec::new();
    for i in 0..4 {
        let id = format!("st{}", i);
        let student_id = str_field(
            &request_ok(
                stdin,
                reader,
                &id,
                "students.create",
                json!({
                    "regNumber": format!("eng/{}", i),
                    "firstName": "Student",
                    "surname": format!("N{}", i),
                    "departmentId": dept,
                    "level": 200
                }),
                &admin,
            ),
            "studentId",
        );
        students.push(student_id);
    }
    let outsider = students.pop().expect("four students");
    for (i, student_id) in students.iter().enumerate() {
        let id = format!("r{}", i);
        request_ok(
            stdin,
            reader,
            &id,
            "registrations.register",
            json!({ "studentId": student_id, "courseId": course_id }),
            &admin,
        );
    }

    Class {
        course_id,
        lecturer_id: lecturers[0].clone(),
        other_lecturer_id: lecturers[1].clone(),
        students,
        outsider,
    }
}

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
        &serde_json::Value::Null,
    );
}

#[test]
fn marks_follow_the_attendance_window_and_end_fills_absences() {
    let workspace = temp_dir("attendance-session-window");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let c = seed(&mut stdin, &mut reader);
    let lecturer = json!({ "role": "lecturer", "userId": c.lecturer_id });
    let other = json!({ "role": "lecturer", "userId": c.other_lecturer_id });

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.start",
        json!({
            "courseId": c.course_id,
            "sessionType": "Lecture",
            "location": "Hall B",
            "sessionDate": "2026-03-02",
            "startTime": "09:00"
        }),
        &lecturer,
    );
    let session_id = str_field(&started, "sessionId");
    assert_eq!(started.get("startTime").and_then(|v| v.as_str()), Some("09:00:00"));
    assert_eq!(started.get("autoEnrolled").and_then(|v| v.as_i64()), Some(0));

    let again = request(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.start",
        json!({
            "courseId": c.course_id,
            "sessionType": "lecture",
            "sessionDate": "2026-03-02",
            "startTime": "11:00"
        }),
        &lecturer,
    );
    assert_eq!(error_code(&again), "conflict");

    let unassigned = request(
        &mut stdin,
        &mut reader,
        "3",
        "sessions.start",
        json!({ "courseId": c.course_id, "sessionType": "lecture" }),
        &other,
    );
    assert_eq!(error_code(&unassigned), "forbidden");

    let on_time = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "studentId": c.students[0],
            "method": "face",
            "confidence": 0.93,
            "markedTime": "09:05"
        }),
        &lecturer,
    );
    assert_eq!(on_time.get("status").and_then(|v| v.as_str()), Some("present"));

    let late = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[1], "markedTime": "09:12" }),
        &lecturer,
    );
    assert_eq!(late.get("status").and_then(|v| v.as_str()), Some("late"));

    let closed = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "studentId": c.students[2],
            "method": "face",
            "confidence": 0.88,
            "markedTime": "09:30"
        }),
        &lecturer,
    );
    assert_eq!(error_code(&closed), "conflict");

    let twice = request(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[0], "status": "late" }),
        &lecturer,
    );
    assert_eq!(error_code(&twice), "conflict");

    let stranger = request(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.outsider, "status": "present" }),
        &lecturer,
    );
    assert_eq!(error_code(&stranger), "conflict");

    let not_mine = request(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[2], "status": "present" }),
        &other,
    );
    assert_eq!(error_code(&not_mine), "forbidden");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "sessions.open",
        json!({ "sessionId": session_id }),
        &lecturer,
    );
    let roster = opened
        .get("roster")
        .and_then(|v| v.as_array())
        .expect("roster");
    assert_eq!(roster.len(), 3);
    assert_eq!(
        roster.iter().filter(|r| r.get("status").map(|s| s.is_null()).unwrap_or(true)).count(),
        1
    );

    let ended = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "sessions.end",
        json!({ "sessionId": session_id, "endTime": "10:30" }),
        &lecturer,
    );
    assert_eq!(ended.get("durationMinutes").and_then(|v| v.as_i64()), Some(90));
    assert_eq!(ended.get("autoAbsentCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(ended.pointer("/statistics/present").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(ended.pointer("/statistics/late").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(ended.pointer("/statistics/absent").and_then(|v| v.as_i64()), Some(1));

    let after = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[2], "status": "present" }),
        &lecturer,
    );
    assert_eq!(error_code(&after), "conflict");

    let corrected = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.markBulk",
        json!({
            "sessionId": session_id,
            "marks": [{ "studentId": c.students[2], "status": "excused" }]
        }),
        &lecturer,
    );
    assert_eq!(corrected.get("updated").and_then(|v| v.as_i64()), Some(1));

    let me = json!({ "role": "student", "userId": c.students[2] });
    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "attendance.forStudent",
        json!({ "studentId": c.students[2] }),
        &me,
    );
    let records = mine.get("records").and_then(|v| v.as_array()).expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("status").and_then(|v| v.as_str()), Some("excused"));
    assert_eq!(records[0].get("method").and_then(|v| v.as_str()), Some("manual"));

    let snooping = request(
        &mut stdin,
        &mut reader,
        "15",
        "attendance.forStudent",
        json!({ "studentId": c.students[0] }),
        &me,
    );
    assert_eq!(error_code(&snooping), "forbidden");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "sessions.list",
        json!({ "courseId": c.course_id }),
        &lecturer,
    );
    let sessions = listed.get("sessions").and_then(|v| v.as_array()).expect("sessions");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].get("status").and_then(|v| v.as_str()), Some("completed"));
    assert_eq!(sessions[0].get("markedCount").and_then(|v| v.as_i64()), Some(3));

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn auto_enrolled_absences_can_be_overwritten_and_bulk_marks_are_atomic() {
    let workspace = temp_dir("attendance-session-autoenroll");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let c = seed(&mut stdin, &mut reader);
    let admin = json!({ "role": "admin" });
    let lecturer = json!({ "role": "lecturer", "userId": c.lecturer_id });

    let admin_start = request(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.start",
        json!({ "courseId": c.course_id, "sessionType": "tutorial" }),
        &admin,
    );
    assert_eq!(error_code(&admin_start), "bad_params");

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "sessions.start",
        json!({
            "courseId": c.course_id,
            "lecturerId": c.lecturer_id,
            "sessionType": "tutorial",
            "sessionDate": "2026-03-03",
            "startTime": "14:00",
            "autoEnroll": true
        }),
        &admin,
    );
    let session_id = str_field(&started, "sessionId");
    assert_eq!(started.get("autoEnrolled").and_then(|v| v.as_i64()), Some(3));

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[0], "status": "present" }),
        &lecturer,
    );
    assert_eq!(marked.get("method").and_then(|v| v.as_str()), Some("manual"));

    let bad_bulk = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.markBulk",
        json!({
            "sessionId": session_id,
            "marks": [
                { "studentId": c.students[1], "status": "late" },
                { "studentId": c.outsider, "status": "present" }
            ]
        }),
        &lecturer,
    );
    assert_eq!(error_code(&bad_bulk), "conflict");

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.open",
        json!({ "sessionId": session_id }),
        &admin,
    );
    assert_eq!(opened.pointer("/statistics/present").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(opened.pointer("/statistics/absent").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(opened.pointer("/statistics/late").and_then(|v| v.as_i64()), Some(0));

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.markBulk",
        json!({
            "sessionId": session_id,
            "marks": [{ "studentId": c.students[1], "status": "asleep" }]
        }),
        &lecturer,
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    let denied = request(
        &mut stdin,
        &mut reader,
        "7",
        "sessions.delete",
        json!({ "sessionId": session_id }),
        &lecturer,
    );
    assert_eq!(error_code(&denied), "forbidden");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.delete",
        json!({ "sessionId": session_id }),
        &admin,
    );
    assert_eq!(deleted.get("deletedMarks").and_then(|v| v.as_i64()), Some(3));

    let missing = request(
        &mut stdin,
        &mut reader,
        "9",
        "sessions.open",
        json!({ "sessionId": session_id }),
        &admin,
    );
    assert_eq!(error_code(&missing), "not_found");

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn evening_sessions_keep_counting_past_midnight() {
    let workspace = temp_dir("attendance-session-midnight");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let c = seed(&mut stdin, &mut reader);
    let lecturer = json!({ "role": "lecturer", "userId": c.lecturer_id });

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "sessions.start",
        json!({
            "courseId": c.course_id,
            "sessionType": "practical",
            "sessionDate": "2026-03-04",
            "startTime": "23:50"
        }),
        &lecturer,
    );
    let session_id = str_field(&started, "sessionId");

    let before_midnight = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[0], "markedTime": "23:55" }),
        &lecturer,
    );
    assert_eq!(before_midnight.get("status").and_then(|v| v.as_str()), Some("present"));

    let after_midnight = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "studentId": c.students[1],
            "markedDate": "2026-03-05",
            "markedTime": "00:02"
        }),
        &lecturer,
    );
    assert_eq!(after_midnight.get("status").and_then(|v| v.as_str()), Some("late"));

    let closed = request(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({
            "sessionId": session_id,
            "studentId": c.students[2],
            "method": "face",
            "confidence": 0.91,
            "markedDate": "2026-03-05",
            "markedTime": "00:20"
        }),
        &lecturer,
    );
    assert_eq!(error_code(&closed), "conflict");

    let bad_date = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({ "sessionId": session_id, "studentId": c.students[2], "markedDate": "05/03/2026" }),
        &lecturer,
    );
    assert_eq!(error_code(&bad_date), "bad_params");

    let _ = child.kill();
    let _ = std::fs::remove_dir_all(workspace);
}
