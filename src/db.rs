use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculties(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(faculty_id) REFERENCES faculties(id),
            UNIQUE(faculty_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_departments_faculty ON departments(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            department_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            credit_units INTEGER NOT NULL DEFAULT 0,
            semester TEXT NOT NULL,
            level INTEGER NOT NULL,
            description TEXT,
            course_type TEXT NOT NULL DEFAULT 'core',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_department ON courses(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_eligibility(
            course_id TEXT PRIMARY KEY,
            is_general INTEGER NOT NULL DEFAULT 0,
            department_id TEXT,
            faculty_id TEXT,
            level INTEGER,
            min_level INTEGER,
            max_level INTEGER,
            is_carryover_allowed INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(department_id) REFERENCES departments(id),
            FOREIGN KEY(faculty_id) REFERENCES faculties(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            reg_number TEXT NOT NULL UNIQUE,
            firstname TEXT NOT NULL,
            surname TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            department_id TEXT NOT NULL,
            level INTEGER NOT NULL,
            admission_year INTEGER,
            gender TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturers(
            id TEXT PRIMARY KEY,
            staff_id TEXT NOT NULL UNIQUE,
            title TEXT,
            firstname TEXT NOT NULL,
            surname TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            department_id TEXT NOT NULL,
            qualification TEXT,
            specialization TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lecturers_department ON lecturers(department_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lecturer_courses(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            lecturer_id TEXT NOT NULL,
            session_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id),
            UNIQUE(course_id, lecturer_id, session_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lecturer_courses_lecturer ON lecturer_courses(lecturer_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_courses(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            session_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, course_id, session_year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_course ON student_courses(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_student ON student_courses(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS registration_audit(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            session_year TEXT NOT NULL,
            eligibility_reason TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            lecturer_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            session_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            session_type TEXT NOT NULL,
            location TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            session_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(lecturer_id) REFERENCES lecturers(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sessions_course ON attendance_sessions(course_id, session_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            attendance_session_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            status TEXT NOT NULL,
            method TEXT NOT NULL,
            marked_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(attendance_session_id) REFERENCES attendance_sessions(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(student_id, attendance_session_id)
        )",
        [],
    )?;
    // Workspaces created before face-marking recorded a confidence score.
    ensure_attendance_confidence(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_session ON attendance(attendance_session_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_attendance_confidence(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance", "recognition_confidence")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance ADD COLUMN recognition_confidence REAL",
        [],
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
