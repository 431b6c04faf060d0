use crate::{
    auth::{DbUser, DbUserSession, Role, User, UserSession},
    error::AppError,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::models::{
    AttendanceRecord, Course, CourseSession, DbAttendanceRecord, DbCourse, DbCourseSession,
    DbStudent, Student,
};

const USER_COLUMNS: &str = "id, username, role, display_name, email, phone, archived";
const COURSE_COLUMNS: &str =
    "id, title, leader_id, capacity, enrolled_count, is_active, created_at";
const SESSION_COLUMNS: &str =
    "id, course_id, session_number, session_date, topic, notes, is_completed";
const STUDENT_COLUMNS: &str = "s.id, s.name, s.email, s.phone, s.birth_date, s.gender, \
     s.marital_status, s.document_number, s.registration_date";
const ATTENDANCE_COLUMNS: &str =
    "id, session_id, student_id, checked_in, justification, check_in_time, updated_at";

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE username = ? AND archived IS 0")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some((id, hashed)) = row else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hashed) {
        Ok(true) => Ok(Some(get_user(pool, id).await?)),
        _ => Ok(None),
    }
}

#[derive(Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub role: Role,
    pub display_name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
}

#[instrument(skip(pool, user), fields(username = user.username, role = %user.role))]
pub async fn create_user(pool: &Pool<Sqlite>, user: NewUser<'_>) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, user.username).await?.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            user.username
        )));
    }

    let hashed_password = bcrypt::hash(user.password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name, email, phone)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user.username)
    .bind(hashed_password)
    .bind(user.role.as_str())
    .bind(user.display_name)
    .bind(user.email)
    .bind(user.phone)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

#[derive(Debug, Clone)]
pub struct NewCourse<'a> {
    pub title: &'a str,
    pub leader_id: Option<i64>,
    pub capacity: i64,
    pub is_active: bool,
}

#[instrument]
pub async fn create_course(pool: &Pool<Sqlite>, course: NewCourse<'_>) -> Result<i64, AppError> {
    info!("Creating course");
    let res = sqlx::query(
        "INSERT INTO courses (title, leader_id, capacity, is_active, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(course.title)
    .bind(course.leader_id)
    .bind(course.capacity)
    .bind(course.is_active)
    .bind(Utc::now().naive_utc())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<Option<Course>, AppError> {
    info!("Getting course");
    let row = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE id = ?"
    ))
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Course::from))
}

#[instrument]
pub async fn get_courses_for_leader(
    pool: &Pool<Sqlite>,
    leader_id: i64,
) -> Result<Vec<Course>, AppError> {
    info!("Getting courses for leader");
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses WHERE leader_id = ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(leader_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument]
pub async fn get_all_courses(pool: &Pool<Sqlite>) -> Result<Vec<Course>, AppError> {
    info!("Getting all courses");
    let rows = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses ORDER BY created_at DESC, id DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

/// The leader's most recently created course that is still active.
#[instrument]
pub async fn get_latest_active_course(
    pool: &Pool<Sqlite>,
    leader_id: i64,
) -> Result<Option<Course>, AppError> {
    info!("Getting latest active course for leader");
    let row = sqlx::query_as::<_, DbCourse>(&format!(
        "SELECT {COURSE_COLUMNS} FROM courses
         WHERE leader_id = ? AND is_active IS 1
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    ))
    .bind(leader_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Course::from))
}

#[instrument]
pub async fn create_course_session(
    pool: &Pool<Sqlite>,
    course_id: i64,
    session_number: i64,
    session_date: NaiveDate,
    topic: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating course session");
    let res = sqlx::query(
        "INSERT INTO course_sessions (course_id, session_number, session_date, topic, notes, is_completed)
         VALUES (?, ?, ?, ?, '', FALSE)",
    )
    .bind(course_id)
    .bind(session_number)
    .bind(session_date)
    .bind(topic)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_course_session(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Option<CourseSession>, AppError> {
    info!("Getting course session");
    let row = sqlx::query_as::<_, DbCourseSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM course_sessions WHERE id = ?"
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CourseSession::from))
}

#[instrument]
pub async fn get_course_sessions(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<CourseSession>, AppError> {
    info!("Getting course sessions");
    let rows = sqlx::query_as::<_, DbCourseSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM course_sessions
         WHERE course_id = ?
         ORDER BY session_number, id"
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CourseSession::from).collect())
}

/// Lowest-numbered session of the course that has not been completed.
#[instrument]
pub async fn get_next_pending_session(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Option<CourseSession>, AppError> {
    info!("Getting next pending session");
    let row = sqlx::query_as::<_, DbCourseSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM course_sessions
         WHERE course_id = ? AND (is_completed IS NULL OR is_completed IS 0)
         ORDER BY session_number ASC, id ASC
         LIMIT 1"
    ))
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CourseSession::from))
}

#[derive(Debug, Clone, Default)]
pub struct NewStudent<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub birth_date: Option<&'a str>,
    pub gender: Option<&'a str>,
    pub marital_status: Option<&'a str>,
    pub document_number: Option<&'a str>,
}

#[instrument]
pub async fn create_student(
    pool: &Pool<Sqlite>,
    student: NewStudent<'_>,
) -> Result<String, AppError> {
    info!("Creating student");
    let id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO students
         (id, name, email, phone, birth_date, gender, marital_status, document_number)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(student.name)
    .bind(student.email)
    .bind(student.phone)
    .bind(student.birth_date)
    .bind(student.gender)
    .bind(student.marital_status)
    .bind(student.document_number)
    .execute(pool)
    .await?;

    Ok(id)
}

#[instrument]
pub async fn get_student(pool: &Pool<Sqlite>, student_id: &str) -> Result<Student, AppError> {
    info!("Getting student");
    let row = sqlx::query_as::<_, DbStudent>(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students s WHERE s.id = ?"
    ))
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(student) => Ok(Student::from(student)),
        _ => Err(AppError::NotFound(format!(
            "Student with id {} not found in database",
            student_id
        ))),
    }
}

/// Enrolls a student in a course. Enrolling twice returns the existing
/// enrollment and leaves the course's enrolled count alone.
#[instrument]
pub async fn enroll_student(
    pool: &Pool<Sqlite>,
    course_id: i64,
    student_id: &str,
) -> Result<i64, AppError> {
    info!("Enrolling student in course");
    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM student_courses WHERE course_id = ? AND student_id = ?")
            .bind(course_id)
            .bind(student_id)
            .fetch_optional(&mut *tx)
            .await?;

    if let Some((id,)) = existing {
        tx.commit().await?;
        return Ok(id);
    }

    let res = sqlx::query("INSERT INTO student_courses (student_id, course_id) VALUES (?, ?)")
        .bind(student_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE courses SET enrolled_count = enrolled_count + 1, updated_at = ? WHERE id = ?",
    )
    .bind(Utc::now().naive_utc())
    .bind(course_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(res.last_insert_rowid())
}

/// Students enrolled in a course, in enrollment order.
#[instrument]
pub async fn get_enrolled_students(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<Student>, AppError> {
    info!("Getting enrolled students");
    let rows = sqlx::query_as::<_, DbStudent>(&format!(
        "SELECT {STUDENT_COLUMNS}
         FROM student_courses sc
         JOIN students s ON s.id = sc.student_id
         WHERE sc.course_id = ?
         ORDER BY sc.id"
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    // No error thrown if nobody is enrolled
    Ok(rows.into_iter().map(Student::from).collect())
}

#[instrument]
pub async fn get_session_attendance(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Vec<AttendanceRecord>, AppError> {
    info!("Getting attendance records for session");
    let rows = sqlx::query_as::<_, DbAttendanceRecord>(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE session_id = ? ORDER BY id"
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AttendanceRecord::from).collect())
}

/// Overwrites the session notes and marks it completed.
#[instrument(skip(conn, notes))]
pub async fn complete_session(
    conn: &mut SqliteConnection,
    session_id: i64,
    notes: &str,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query("UPDATE course_sessions SET notes = ?, is_completed = TRUE WHERE id = ?")
        .bind(notes)
        .bind(session_id)
        .execute(&mut *conn)
        .await?;

    Ok(res.rows_affected())
}

#[instrument(skip(conn, justification))]
pub async fn update_attendance_record(
    conn: &mut SqliteConnection,
    record_id: i64,
    checked_in: bool,
    justification: Option<&str>,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        "UPDATE attendance
         SET checked_in = ?, justification = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(checked_in)
    .bind(justification)
    .bind(now)
    .bind(record_id)
    .execute(&mut *conn)
    .await?;

    Ok(res.rows_affected())
}

/// The saved record for a student in a session, read inside the caller's
/// transaction so rows written since the roster was loaded are seen.
#[instrument(skip(conn))]
pub async fn find_attendance_record_id(
    conn: &mut SqliteConnection,
    session_id: i64,
    student_id: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM attendance WHERE session_id = ? AND student_id = ? ORDER BY id LIMIT 1",
    )
    .bind(session_id)
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

#[instrument(skip(conn, justification))]
pub async fn insert_attendance_record(
    conn: &mut SqliteConnection,
    session_id: i64,
    student_id: &str,
    checked_in: bool,
    justification: Option<&str>,
    now: NaiveDateTime,
) -> Result<i64, sqlx::Error> {
    let res = sqlx::query(
        "INSERT INTO attendance
         (session_id, student_id, checked_in, justification, check_in_time, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(student_id)
    .bind(checked_in)
    .bind(justification)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(res.last_insert_rowid())
}
