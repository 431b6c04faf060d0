use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub document_number: Option<String>,
    pub registration_date: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbStudent {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub document_number: Option<String>,
    pub registration_date: Option<NaiveDateTime>,
}

impl From<DbStudent> for Student {
    fn from(db: DbStudent) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            email: db.email,
            phone: db.phone,
            birth_date: db.birth_date,
            gender: db.gender,
            marital_status: db.marital_status,
            document_number: db.document_number,
            registration_date: db.registration_date.map(to_utc),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub leader_id: Option<i64>,
    pub capacity: i64,
    pub enrolled_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbCourse {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub leader_id: Option<i64>,
    pub capacity: Option<i64>,
    pub enrolled_count: Option<i64>,
    pub is_active: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
}

/// Shown wherever a course has no title of its own.
pub const DEFAULT_COURSE_TITLE: &str = "Course";

impl From<DbCourse> for Course {
    fn from(db: DbCourse) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            title: db
                .title
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| DEFAULT_COURSE_TITLE.to_string()),
            leader_id: db.leader_id,
            capacity: db.capacity.unwrap_or_default(),
            enrolled_count: db.enrolled_count.unwrap_or_default(),
            is_active: db.is_active.unwrap_or_default(),
            created_at: db.created_at.map(to_utc).unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseSession {
    pub id: i64,
    pub course_id: i64,
    pub session_number: Option<i64>,
    pub session_date: Option<NaiveDate>,
    pub topic: Option<String>,
    pub notes: String,
    pub is_completed: bool,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbCourseSession {
    pub id: Option<i64>,
    pub course_id: Option<i64>,
    pub session_number: Option<i64>,
    pub session_date: Option<NaiveDate>,
    pub topic: Option<String>,
    pub notes: Option<String>,
    pub is_completed: Option<bool>,
}

impl From<DbCourseSession> for CourseSession {
    fn from(db: DbCourseSession) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            session_number: db.session_number,
            session_date: db.session_date,
            topic: db.topic,
            notes: db.notes.unwrap_or_default(),
            is_completed: db.is_completed.unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub session_id: i64,
    pub student_id: String,
    pub checked_in: bool,
    pub justification: Option<String>,
    pub check_in_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbAttendanceRecord {
    pub id: Option<i64>,
    pub session_id: Option<i64>,
    pub student_id: Option<String>,
    pub checked_in: Option<bool>,
    pub justification: Option<String>,
    pub check_in_time: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl From<DbAttendanceRecord> for AttendanceRecord {
    fn from(db: DbAttendanceRecord) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            session_id: db.session_id.unwrap_or_default(),
            student_id: db.student_id.unwrap_or_default(),
            checked_in: db.checked_in.unwrap_or_default(),
            justification: db.justification,
            check_in_time: db.check_in_time.map(to_utc),
            updated_at: db.updated_at.map(to_utc),
        }
    }
}
