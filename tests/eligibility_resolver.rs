#[path = "../src/eligibility.rs"]
mod eligibility;

use eligibility::{normalize_level, resolve, Course, EligibilityRule, Reason, RuleKind, Student};

fn student(level: i64, department: &str, faculty: &str) -> Student {
    Student {
        level,
        department_id: department.to_string(),
        faculty_id: faculty.to_string(),
    }
}

fn course(department: &str, faculty: &str) -> Course {
    Course {
        department_id: department.to_string(),
        faculty_id: faculty.to_string(),
    }
}

fn department_rule(department: &str, level: Option<i64>) -> EligibilityRule {
    EligibilityRule {
        department_id: Some(department.to_string()),
        level,
        ..EligibilityRule::default()
    }
}

#[test]
fn no_rule_follows_faculty_match() {
    let c = course("cs", "sci");
    for level in 1..=8 {
        let same = resolve(&student(level, "math", "sci"), &c, None);
        assert!(same.eligible);
        assert_eq!(same.reason, Reason::NoRuleSameFaculty);

        let other = resolve(&student(level, "law", "arts"), &c, None);
        assert!(!other.eligible);
        assert_eq!(other.reason, Reason::NoRuleDifferentFaculty);
    }
}

#[test]
fn general_rule_minimum_defaults_to_course_level() {
    let rule = EligibilityRule {
        is_general: true,
        level: Some(2),
        ..EligibilityRule::default()
    };
    let c = course("cs", "sci");

    let below = resolve(&student(1, "law", "arts"), &c, Some(&rule));
    assert!(!below.eligible);
    assert_eq!(
        below.reason,
        Reason::GeneralBelowMinimum {
            student_level: 1,
            min_level: 2
        }
    );

    let at = resolve(&student(2, "law", "arts"), &c, Some(&rule));
    assert!(at.eligible);
    assert_eq!(at.reason, Reason::GeneralAtTargetLevel { course_level: 2 });

    for level in 3..=8 {
        let d = resolve(&student(level, "law", "arts"), &c, Some(&rule));
        assert!(d.eligible, "level {} should be eligible", level);
        assert_eq!(
            d.reason,
            Reason::GeneralHigherLevel {
                student_level: level,
                course_level: 2
            }
        );
    }
}

#[test]
fn general_rule_without_level_starts_at_one() {
    let rule = EligibilityRule {
        is_general: true,
        max_level: Some(3),
        ..EligibilityRule::default()
    };
    let c = course("cs", "sci");
    assert_eq!(
        resolve(&student(1, "cs", "sci"), &c, Some(&rule)).reason,
        Reason::GeneralAtTargetLevel { course_level: 1 }
    );
    let above = resolve(&student(4, "cs", "sci"), &c, Some(&rule));
    assert!(!above.eligible);
    assert_eq!(
        above.reason,
        Reason::GeneralAboveMaximum {
            student_level: 4,
            max_level: 3
        }
    );
}

#[test]
fn general_rule_with_lowered_minimum_admits_juniors() {
    let rule = EligibilityRule {
        is_general: true,
        level: Some(3),
        min_level: Some(1),
        ..EligibilityRule::default()
    };
    let d = resolve(&student(2, "cs", "sci"), &course("cs", "sci"), Some(&rule));
    assert!(d.eligible);
    assert_eq!(d.reason, Reason::GeneralMeetsMinimum);
}

#[test]
fn faculty_rule_requires_faculty_and_level_range() {
    let rule = EligibilityRule {
        faculty_id: Some("sci".to_string()),
        min_level: Some(2),
        max_level: Some(4),
        ..EligibilityRule::default()
    };
    assert_eq!(rule.kind(), RuleKind::Faculty);
    let c = course("cs", "sci");

    let inside = resolve(&student(3, "math", "sci"), &c, Some(&rule));
    assert!(inside.eligible);
    assert_eq!(inside.reason, Reason::FacultyCourse);

    let too_senior = resolve(&student(5, "math", "sci"), &c, Some(&rule));
    assert!(!too_senior.eligible);
    assert_eq!(
        too_senior.reason,
        Reason::FacultyLevelOutOfRange {
            student_level: 5,
            min_level: 2,
            max_level: 4
        }
    );

    for level in 1..=8 {
        let outsider = resolve(&student(level, "law", "arts"), &c, Some(&rule));
        assert!(!outsider.eligible);
        assert_eq!(outsider.reason, Reason::FacultyMismatch);
    }
}

#[test]
fn department_rule_exact_level_and_carryover() {
    let c = course("cs", "sci");
    let rule = department_rule("cs", Some(3));
    assert_eq!(rule.kind(), RuleKind::Department);

    let exact = resolve(&student(3, "cs", "sci"), &c, Some(&rule));
    assert!(exact.eligible);
    assert_eq!(exact.reason, Reason::DepartmentExactLevel);

    let senior = resolve(&student(4, "cs", "sci"), &c, Some(&rule));
    assert!(!senior.eligible);
    assert_eq!(
        senior.reason,
        Reason::DepartmentLevelNotMet { student_level: 4 }
    );

    let carryover = EligibilityRule {
        is_carryover_allowed: true,
        max_level: Some(4),
        ..rule.clone()
    };
    let d = resolve(&student(4, "cs", "sci"), &c, Some(&carryover));
    assert!(d.eligible);
    assert_eq!(d.reason, Reason::DepartmentCarryover);

    let beyond = resolve(&student(5, "cs", "sci"), &c, Some(&carryover));
    assert!(!beyond.eligible);
}

#[test]
fn department_rule_without_level_uses_range() {
    let rule = EligibilityRule {
        min_level: Some(2),
        max_level: Some(3),
        ..department_rule("cs", None)
    };
    let c = course("cs", "sci");
    assert_eq!(
        resolve(&student(2, "cs", "sci"), &c, Some(&rule)).reason,
        Reason::DepartmentWithinRange
    );
    assert!(!resolve(&student(4, "cs", "sci"), &c, Some(&rule)).eligible);
}

#[test]
fn department_rule_rejects_other_departments_first() {
    let rule = EligibilityRule {
        faculty_id: Some("sci".to_string()),
        is_carryover_allowed: true,
        ..department_rule("cs", Some(2))
    };
    let d = resolve(&student(2, "math", "sci"), &course("cs", "sci"), Some(&rule));
    assert!(!d.eligible);
    assert_eq!(d.reason, Reason::DepartmentMismatch);
}

#[test]
fn empty_rule_row_behaves_like_no_rule() {
    let rule = EligibilityRule::default();
    assert_eq!(rule.kind(), RuleKind::Unscoped);
    let c = course("cs", "sci");
    for s in [student(1, "math", "sci"), student(6, "law", "arts")] {
        let with_row = resolve(&s, &c, Some(&rule));
        let without = resolve(&s, &c, None);
        assert_eq!(with_row.eligible, without.eligible);
    }
    assert_eq!(
        resolve(&student(1, "math", "sci"), &c, Some(&rule)).reason,
        Reason::DefaultSameFaculty
    );
    assert_eq!(
        resolve(&student(1, "law", "arts"), &c, Some(&rule)).reason,
        Reason::DefaultDifferentFaculty
    );
}

#[test]
fn resolve_is_idempotent() {
    let rule = EligibilityRule {
        is_carryover_allowed: true,
        max_level: Some(5),
        ..department_rule("cs", Some(3))
    };
    let s = student(4, "cs", "sci");
    let c = course("cs", "sci");
    assert_eq!(resolve(&s, &c, Some(&rule)), resolve(&s, &c, Some(&rule)));
    assert_eq!(resolve(&s, &c, None), resolve(&s, &c, None));
}

#[test]
fn ineligibility_reasons_render_verbatim() {
    let cases = [
        (
            Reason::GeneralBelowMinimum {
                student_level: 1,
                min_level: 2,
            },
            "Student level (1) is below the minimum required level (2) for this general course.",
        ),
        (
            Reason::GeneralAboveMaximum {
                student_level: 5,
                max_level: 4,
            },
            "Student level (5) exceeds the maximum allowed level (4) for this general course.",
        ),
        (
            Reason::FacultyMismatch,
            "Student faculty does not match course faculty requirements.",
        ),
        (
            Reason::DepartmentMismatch,
            "Student department does not match course department requirements.",
        ),
        (
            Reason::DepartmentLevelNotMet { student_level: 4 },
            "Student level (4) does not match departmental course level requirements.",
        ),
        (
            Reason::NoRuleDifferentFaculty,
            "No eligibility rules defined and different faculty.",
        ),
    ];
    for (reason, text) in cases {
        assert_eq!(reason.to_string(), text);
    }
    assert_eq!(
        Reason::GeneralHigherLevel {
            student_level: 4,
            course_level: 2
        }
        .to_string(),
        "General course - student is eligible at higher level (4 taking Level 2 course)."
    );
}

#[test]
fn reason_codes_are_distinct() {
    let reasons = [
        Reason::NoRuleSameFaculty,
        Reason::NoRuleDifferentFaculty,
        Reason::GeneralAtTargetLevel { course_level: 1 },
        Reason::GeneralHigherLevel {
            student_level: 2,
            course_level: 1,
        },
        Reason::GeneralMeetsMinimum,
        Reason::GeneralBelowMinimum {
            student_level: 1,
            min_level: 2,
        },
        Reason::GeneralAboveMaximum {
            student_level: 5,
            max_level: 4,
        },
        Reason::FacultyCourse,
        Reason::FacultyLevelOutOfRange {
            student_level: 1,
            min_level: 2,
            max_level: 3,
        },
        Reason::FacultyMismatch,
        Reason::DepartmentExactLevel,
        Reason::DepartmentWithinRange,
        Reason::DepartmentCarryover,
        Reason::DepartmentLevelNotMet { student_level: 1 },
        Reason::DepartmentMismatch,
        Reason::DefaultSameFaculty,
        Reason::DefaultDifferentFaculty,
    ];
    let mut codes: Vec<&str> = reasons.iter().map(|r| r.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), reasons.len());
}

#[test]
fn levels_normalize_onto_year_scale() {
    assert_eq!(normalize_level(1), Some(1));
    assert_eq!(normalize_level(8), Some(8));
    assert_eq!(normalize_level(100), Some(1));
    assert_eq!(normalize_level(500), Some(5));
    assert_eq!(normalize_level(800), Some(8));
    assert_eq!(normalize_level(0), None);
    assert_eq!(normalize_level(9), None);
    assert_eq!(normalize_level(150), None);
    assert_eq!(normalize_level(900), None);
    assert_eq!(normalize_level(-100), None);
}
