//! Course eligibility rules for student registration.
//!
//! `resolve` is pure: it only looks at the three records it is handed and
//! always produces a `Decision`. Lookups, the active-course filter and
//! duplicate-registration checks happen in the caller before it runs.

use std::fmt;

/// Lowest level on the year scale.
pub const MIN_LEVEL: i64 = 1;
/// Highest level on the year scale (final year of the longest programmes).
pub const MAX_LEVEL: i64 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Student {
    pub level: i64,
    pub department_id: String,
    pub faculty_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub department_id: String,
    pub faculty_id: String,
}

/// Zero-or-one per course. Empty ids are treated as unset by the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityRule {
    pub is_general: bool,
    pub department_id: Option<String>,
    pub faculty_id: Option<String>,
    pub level: Option<i64>,
    pub min_level: Option<i64>,
    pub max_level: Option<i64>,
    pub is_carryover_allowed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    General,
    Faculty,
    Department,
    Unscoped,
}

impl EligibilityRule {
    pub fn kind(&self) -> RuleKind {
        if self.is_general {
            RuleKind::General
        } else if self.faculty_id.is_some() && self.department_id.is_none() {
            RuleKind::Faculty
        } else if self.department_id.is_some() {
            RuleKind::Department
        } else {
            RuleKind::Unscoped
        }
    }
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::General => "general",
            RuleKind::Faculty => "faculty",
            RuleKind::Department => "department",
            RuleKind::Unscoped => "unscoped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NoRuleSameFaculty,
    NoRuleDifferentFaculty,
    GeneralAtTargetLevel { course_level: i64 },
    GeneralHigherLevel { student_level: i64, course_level: i64 },
    GeneralMeetsMinimum,
    GeneralBelowMinimum { student_level: i64, min_level: i64 },
    GeneralAboveMaximum { student_level: i64, max_level: i64 },
    FacultyCourse,
    FacultyLevelOutOfRange { student_level: i64, min_level: i64, max_level: i64 },
    FacultyMismatch,
    DepartmentExactLevel,
    DepartmentWithinRange,
    DepartmentCarryover,
    DepartmentLevelNotMet { student_level: i64 },
    DepartmentMismatch,
    DefaultSameFaculty,
    DefaultDifferentFaculty,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reason::NoRuleSameFaculty => {
                f.write_str("No eligibility restrictions - same faculty access granted.")
            }
            Reason::NoRuleDifferentFaculty => {
                f.write_str("No eligibility rules defined and different faculty.")
            }
            Reason::GeneralAtTargetLevel { course_level } => write!(
                f,
                "General course - student is at the target level ({}).",
                course_level
            ),
            Reason::GeneralHigherLevel {
                student_level,
                course_level,
            } => write!(
                f,
                "General course - student is eligible at higher level ({} taking Level {} course).",
                student_level, course_level
            ),
            Reason::GeneralMeetsMinimum => {
                f.write_str("General course - student meets minimum level requirement.")
            }
            Reason::GeneralBelowMinimum {
                student_level,
                min_level,
            } => write!(
                f,
                "Student level ({}) is below the minimum required level ({}) for this general course.",
                student_level, min_level
            ),
            Reason::GeneralAboveMaximum {
                student_level,
                max_level,
            } => write!(
                f,
                "Student level ({}) exceeds the maximum allowed level ({}) for this general course.",
                student_level, max_level
            ),
            Reason::FacultyCourse => f.write_str(
                "Faculty course - accessible to all students in the faculty at appropriate level.",
            ),
            Reason::FacultyLevelOutOfRange {
                student_level,
                min_level,
                max_level,
            } => write!(
                f,
                "Student level ({}) does not meet faculty course requirements (Level {} - {}).",
                student_level, min_level, max_level
            ),
            Reason::FacultyMismatch => {
                f.write_str("Student faculty does not match course faculty requirements.")
            }
            Reason::DepartmentExactLevel => {
                f.write_str("Departmental course - matches student level exactly.")
            }
            Reason::DepartmentWithinRange => {
                f.write_str("Departmental course - student level within acceptable range.")
            }
            Reason::DepartmentCarryover => {
                f.write_str("Departmental course - eligible as carryover student.")
            }
            Reason::DepartmentLevelNotMet { student_level } => write!(
                f,
                "Student level ({}) does not match departmental course level requirements.",
                student_level
            ),
            Reason::DepartmentMismatch => {
                f.write_str("Student department does not match course department requirements.")
            }
            Reason::DefaultSameFaculty => f.write_str("Default eligibility - same faculty."),
            Reason::DefaultDifferentFaculty => {
                f.write_str("No specific eligibility rules found and different faculty.")
            }
        }
    }
}

impl Reason {
    /// Stable machine-readable code for the reason.
    pub fn code(&self) -> &'static str {
        match self {
            Reason::NoRuleSameFaculty => "no_rule_same_faculty",
            Reason::NoRuleDifferentFaculty => "no_rule_different_faculty",
            Reason::GeneralAtTargetLevel { .. } => "general_target_level",
            Reason::GeneralHigherLevel { .. } => "general_higher_level",
            Reason::GeneralMeetsMinimum => "general_meets_minimum",
            Reason::GeneralBelowMinimum { .. } => "level_below_minimum",
            Reason::GeneralAboveMaximum { .. } => "level_above_maximum",
            Reason::FacultyCourse => "faculty_course",
            Reason::FacultyLevelOutOfRange { .. } => "faculty_level_out_of_range",
            Reason::FacultyMismatch => "faculty_mismatch",
            Reason::DepartmentExactLevel => "department_exact_level",
            Reason::DepartmentWithinRange => "department_within_range",
            Reason::DepartmentCarryover => "department_carryover",
            Reason::DepartmentLevelNotMet { .. } => "department_level_not_met",
            Reason::DepartmentMismatch => "department_mismatch",
            Reason::DefaultSameFaculty => "default_same_faculty",
            Reason::DefaultDifferentFaculty => "default_different_faculty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub eligible: bool,
    pub reason: Reason,
}

impl Decision {
    fn allow(reason: Reason) -> Self {
        Decision {
            eligible: true,
            reason,
        }
    }

    fn deny(reason: Reason) -> Self {
        Decision {
            eligible: false,
            reason,
        }
    }
}

pub fn resolve(student: &Student, course: &Course, rule: Option<&EligibilityRule>) -> Decision {
    let same_faculty = course.faculty_id == student.faculty_id;
    let Some(rule) = rule else {
        return if same_faculty {
            Decision::allow(Reason::NoRuleSameFaculty)
        } else {
            Decision::deny(Reason::NoRuleDifferentFaculty)
        };
    };

    match rule.kind() {
        RuleKind::General => resolve_general(student, rule),
        RuleKind::Faculty => resolve_faculty(student, rule),
        RuleKind::Department => resolve_department(student, rule),
        RuleKind::Unscoped => {
            if same_faculty {
                Decision::allow(Reason::DefaultSameFaculty)
            } else {
                Decision::deny(Reason::DefaultDifferentFaculty)
            }
        }
    }
}

fn resolve_general(student: &Student, rule: &EligibilityRule) -> Decision {
    let course_level = rule.level.unwrap_or(MIN_LEVEL);
    let min_level = rule.min_level.unwrap_or(course_level);
    let max_level = rule.max_level.unwrap_or(MAX_LEVEL);
    let level = student.level;

    if (min_level..=max_level).contains(&level) {
        if level == course_level {
            Decision::allow(Reason::GeneralAtTargetLevel { course_level })
        } else if level > course_level {
            Decision::allow(Reason::GeneralHigherLevel {
                student_level: level,
                course_level,
            })
        } else {
            // min_level was set below the course's own level.
            Decision::allow(Reason::GeneralMeetsMinimum)
        }
    } else if level < min_level {
        Decision::deny(Reason::GeneralBelowMinimum {
            student_level: level,
            min_level,
        })
    } else {
        Decision::deny(Reason::GeneralAboveMaximum {
            student_level: level,
            max_level,
        })
    }
}

fn resolve_faculty(student: &Student, rule: &EligibilityRule) -> Decision {
    if rule.faculty_id.as_deref() != Some(student.faculty_id.as_str()) {
        return Decision::deny(Reason::FacultyMismatch);
    }
    let min_level = rule.min_level.unwrap_or(MIN_LEVEL);
    let max_level = rule.max_level.unwrap_or(MAX_LEVEL);
    if (min_level..=max_level).contains(&student.level) {
        Decision::allow(Reason::FacultyCourse)
    } else {
        Decision::deny(Reason::FacultyLevelOutOfRange {
            student_level: student.level,
            min_level,
            max_level,
        })
    }
}

fn resolve_department(student: &Student, rule: &EligibilityRule) -> Decision {
    if rule.department_id.as_deref() != Some(student.department_id.as_str()) {
        return Decision::deny(Reason::DepartmentMismatch);
    }
    let min_level = rule.min_level.unwrap_or(MIN_LEVEL);
    let max_level = rule.max_level.unwrap_or(MAX_LEVEL);
    let level = student.level;

    match rule.level {
        Some(course_level) if course_level == level => {
            Decision::allow(Reason::DepartmentExactLevel)
        }
        None if (min_level..=max_level).contains(&level) => {
            Decision::allow(Reason::DepartmentWithinRange)
        }
        _ if rule.is_carryover_allowed && level <= max_level => {
            Decision::allow(Reason::DepartmentCarryover)
        }
        _ => Decision::deny(Reason::DepartmentLevelNotMet {
            student_level: level,
        }),
    }
}

/// Maps a level onto the 1..=8 year scale.
///
/// Accepts either year numbers (`1..=8`) or the hundreds form used on
/// registration forms (`100`, `200`, ... `800`). Anything else is rejected.
pub fn normalize_level(raw: i64) -> Option<i64> {
    if (MIN_LEVEL..=MAX_LEVEL).contains(&raw) {
        return Some(raw);
    }
    if raw % 100 == 0 && (MIN_LEVEL * 100..=MAX_LEVEL * 100).contains(&raw) {
        return Some(raw / 100);
    }
    None
}
