pub mod attendance;
pub mod backup;
pub mod core;
pub mod courses;
pub mod departments;
pub mod eligibility;
pub mod faculties;
pub mod lecturers;
pub mod registrations;
pub mod reports;
pub mod sessions;
pub mod setup;
pub mod students;
