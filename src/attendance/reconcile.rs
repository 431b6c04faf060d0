use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use super::roster::{Roster, RosterEntry};
use crate::auth::User;
use crate::db::{
    get_course, get_course_session, get_enrolled_students, get_latest_active_course,
    get_next_pending_session, get_session_attendance,
};
use crate::error::{AppError, LookupContextExt};
use crate::models::{AttendanceRecord, Course, CourseSession, Student};

/// Path segment that asks for the caller's next pending session.
pub const NEXT_SESSION_SENTINEL: &str = "new";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTarget {
    /// Lowest-numbered incomplete session of the caller's newest active course.
    NextPending,
    Session(i64),
}

impl FromStr for SessionTarget {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == NEXT_SESSION_SENTINEL {
            return Ok(SessionTarget::NextPending);
        }

        s.parse::<i64>()
            .map(SessionTarget::Session)
            .map_err(|_| AppError::Validation(format!("Invalid session id: {}", s)))
    }
}

/// Everything needed to show and save attendance for one session.
#[derive(Serialize, Debug, Clone)]
pub struct AttendanceSheet {
    pub session: CourseSession,
    pub course: Course,
    pub course_name: String,
    pub roster: Roster,
    pub notes: String,
}

/// Builds the attendance sheet for a session from current storage state.
/// Never writes.
#[instrument(skip(pool, caller), fields(user_id = caller.id))]
pub async fn reconcile(
    pool: &Pool<Sqlite>,
    caller: &User,
    target: SessionTarget,
) -> Result<AttendanceSheet, AppError> {
    let (session, course) = resolve_session(pool, caller, target).await?;

    caller.require_attendance_access(course.leader_id)?;

    let students = get_enrolled_students(pool, course.id)
        .await
        .unavailable("enrolled students")?;

    let records = if students.is_empty() {
        Vec::new()
    } else {
        get_session_attendance(pool, session.id)
            .await
            .unavailable("attendance records")?
    };

    let roster = build_roster(students, records);
    info!(
        session_id = session.id,
        course_id = course.id,
        entries = roster.len(),
        "Reconciled attendance roster"
    );

    Ok(AttendanceSheet {
        notes: session.notes.clone(),
        course_name: course.title.clone(),
        session,
        course,
        roster,
    })
}

async fn resolve_session(
    pool: &Pool<Sqlite>,
    caller: &User,
    target: SessionTarget,
) -> Result<(CourseSession, Course), AppError> {
    match target {
        SessionTarget::NextPending => {
            let course = get_latest_active_course(pool, caller.id)
                .await
                .unavailable("active course")?
                .ok_or_else(|| {
                    AppError::NotFound(format!("No active course found for {}", caller.username))
                })?;

            let session = get_next_pending_session(pool, course.id)
                .await
                .unavailable("pending session")?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "No pending session found for course {}",
                        course.id
                    ))
                })?;

            Ok((session, course))
        }
        SessionTarget::Session(session_id) => {
            let session = get_course_session(pool, session_id)
                .await
                .unavailable("session")?
                .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

            let course = get_course(pool, session.course_id)
                .await
                .unavailable("course")?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Course for session {} not found", session_id))
                })?;

            Ok((session, course))
        }
    }
}

/// Pairs each enrolled student with their saved record for the session, if
/// any. When a student somehow has several records, the oldest one wins.
pub fn build_roster(students: Vec<Student>, records: Vec<AttendanceRecord>) -> Roster {
    let mut by_student: HashMap<String, AttendanceRecord> = HashMap::new();
    for record in records {
        by_student.entry(record.student_id.clone()).or_insert(record);
    }

    Roster::from_entries(students.into_iter().map(|student| {
        let mut entry = RosterEntry::new(student);
        if let Some(record) = by_student.get(entry.student_id()) {
            entry.present = record.checked_in;
            entry.justification = record.justification.clone().unwrap_or_default();
            entry.existing_record_id = Some(record.id);
        }
        entry
    }))
}
