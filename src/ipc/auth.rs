use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{Request, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    AnyActor,
    Staff,
    Admin,
}

impl Access {
    fn allows(self, role: Role) -> bool {
        match self {
            Access::Public | Access::AnyActor => true,
            Access::Staff => matches!(role, Role::Admin | Role::Lecturer),
            Access::Admin => role == Role::Admin,
        }
    }
}

/// `None` for methods nobody handles; the router reports those itself.
pub fn access_for(method: &str) -> Option<Access> {
    let access = match method {
        "health" | "workspace.select" => Access::Public,

        "setup.get"
        | "faculties.list"
        | "departments.list"
        | "courses.list"
        | "courses.get"
        | "eligibility.get"
        | "eligibility.check"
        | "students.get"
        | "lecturers.list"
        | "lecturers.get"
        | "lecturers.courses"
        | "registrations.list"
        | "sessions.list"
        | "attendance.forStudent" => Access::AnyActor,

        "students.list"
        | "sessions.start"
        | "sessions.end"
        | "sessions.open"
        | "attendance.mark"
        | "attendance.markBulk" => Access::Staff,

        "setup.update"
        | "faculties.create"
        | "faculties.update"
        | "faculties.delete"
        | "departments.create"
        | "departments.update"
        | "departments.delete"
        | "courses.create"
        | "courses.update"
        | "courses.setActive"
        | "courses.delete"
        | "courses.assignLecturer"
        | "courses.unassignLecturer"
        | "eligibility.set"
        | "eligibility.clear"
        | "students.create"
        | "students.update"
        | "students.toggleActive"
        | "lecturers.create"
        | "lecturers.update"
        | "lecturers.toggleActive"
        | "registrations.register"
        | "registrations.drop"
        | "sessions.delete"
        | "reports.overview"
        | "reports.courseStatistics"
        | "reports.studentAttendance"
        | "reports.lecturerPerformance"
        | "reports.registrationTrends"
        | "reports.defaulters"
        | "backup.exportWorkspace"
        | "backup.importWorkspace" => Access::Admin,

        _ => return None,
    };
    Some(access)
}

pub fn authorize(req: &Request) -> Result<(), HandlerErr> {
    let Some(access) = access_for(&req.method) else {
        return Ok(());
    };
    if access == Access::Public {
        return Ok(());
    }
    let Some(actor) = req.actor.as_ref() else {
        return Err(HandlerErr::new(
            "unauthorized",
            format!("{} requires a signed-in actor", req.method),
        ));
    };
    if actor.role != Role::Admin && actor.user_id.is_none() {
        return Err(HandlerErr::new(
            "unauthorized",
            "actor.userId is required for non-admin roles",
        ));
    }
    if !access.allows(actor.role) {
        return Err(HandlerErr::forbidden(format!(
            "{} is not allowed for role {}",
            req.method,
            actor.role.as_str()
        )));
    }
    Ok(())
}
