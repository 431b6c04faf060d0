use chrono::{NaiveDate, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::{Validate, ValidationError};

use crate::attendance::{
    AttendanceSheet, CommitSummary, PresenceFilter, RosterEdit, RosterEntry, RosterStats,
    SessionTarget, commit, reconcile,
};
use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::db::{
    NewCourse, NewStudent, NewUser, authenticate_user, create_course, create_course_session,
    create_student, create_user, create_user_session, enroll_student, find_user_by_username,
    get_all_courses, get_course, get_course_sessions, get_courses_for_leader,
    get_enrolled_students, get_student, get_user, invalidate_session,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{Course, CourseSession, Student};
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ValidationResponse,
};

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub archived: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role.to_string(),
            username: user.username,
            display_name: user.display_name,
            email: user.email,
            phone: user.phone,
            archived: user.archived,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse<T> {
    pub id: T,
}

fn created<T>(id: T) -> Custom<Json<CreatedResponse<T>>> {
    Custom(Status::Created, Json(CreatedResponse { id }))
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(config.session_ttl_hours);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            cookies.add_private(
                Cookie::build((SESSION_COOKIE, token))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(config.session_ttl_hours)),
            );

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Result<Json<UserData>, ApiError> {
    user.require_permission(Permission::ViewOwnProfile)
        .validate_custom()?;

    Ok(Json(UserData::from(user)))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize, Validate, Clone)]
pub struct UserRegistrationRequest {
    #[validate(length(min = 3, max = 50, message = "Username must be 3-50 characters"))]
    username: String,
    display_name: Option<String>,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    role: String,
    #[validate(email(message = "Invalid email address"))]
    email: Option<String>,
    #[validate(length(min = 6, max = 30, message = "Phone must be 6-30 characters"))]
    phone: Option<String>,
}

#[post("/users", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<UserRegistrationRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse<i64>>>, ApiError> {
    user.require_permission(Permission::RegisterUsers)
        .validate_custom()?;

    let validated = registration.validate_custom()?;

    let role = validated.role.parse::<Role>().map_err(|_| {
        Custom(
            Status::UnprocessableEntity,
            Json(ValidationResponse::with_error(
                "role",
                "Role must be one of leader, pastor, admin",
            )),
        )
    })?;

    if find_user_by_username(db, &validated.username)
        .await
        .validate_custom()?
        .is_some()
    {
        return Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ));
    }

    let id = create_user(
        db,
        NewUser {
            username: &validated.username,
            password: &validated.password,
            role,
            display_name: validated.display_name.as_deref(),
            email: validated.email.as_deref(),
            phone: validated.phone.as_deref(),
        },
    )
    .await
    .validate_custom()?;

    Ok(created(id))
}

#[get("/courses")]
pub async fn api_get_courses(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Course>>, ApiError> {
    let courses = if user.has_permission(Permission::ViewAllCourses) {
        get_all_courses(db).await
    } else {
        user.require_permission(Permission::ViewOwnCourses)
            .validate_custom()?;
        get_courses_for_leader(db, user.id).await
    }
    .validate_custom()?;

    Ok(Json(courses))
}

#[derive(Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200, message = "Title is required"))]
    title: String,
    leader_id: Option<i64>,
    #[validate(range(min = 0, message = "Capacity cannot be negative"))]
    capacity: i64,
    is_active: Option<bool>,
}

#[post("/courses", data = "<request>")]
pub async fn api_create_course(
    request: Json<CreateCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse<i64>>>, ApiError> {
    user.require_permission(Permission::ManageCourses)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    if let Some(leader_id) = validated.leader_id {
        get_user(db, leader_id).await.validate_custom()?;
    }

    let id = create_course(
        db,
        NewCourse {
            title: &validated.title,
            leader_id: validated.leader_id,
            capacity: validated.capacity,
            is_active: validated.is_active.unwrap_or(true),
        },
    )
    .await
    .validate_custom()?;

    Ok(created(id))
}

async fn accessible_course(
    db: &Pool<Sqlite>,
    user: &User,
    course_id: i64,
) -> Result<Course, AppError> {
    let course = get_course(db, course_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Course {} not found", course_id)))?;

    if !user.can_access_course(course.leader_id) {
        return Err(AppError::Authorization(format!(
            "User {} may not view course {}",
            user.username, course_id
        )));
    }

    Ok(course)
}

#[get("/courses/<id>/sessions")]
pub async fn api_get_course_sessions(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CourseSession>>, ApiError> {
    let course = accessible_course(db, &user, id).await.validate_custom()?;
    let sessions = get_course_sessions(db, course.id).await.validate_custom()?;

    Ok(Json(sessions))
}

#[derive(Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(range(min = 1, message = "Session number starts at 1"))]
    session_number: i64,
    session_date: NaiveDate,
    topic: Option<String>,
}

#[post("/courses/<id>/sessions", data = "<request>")]
pub async fn api_create_course_session(
    id: i64,
    request: Json<CreateSessionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse<i64>>>, ApiError> {
    user.require_permission(Permission::ManageCourses)
        .validate_custom()?;

    let validated = request.validate_custom()?;
    let course = accessible_course(db, &user, id).await.validate_custom()?;

    let session_id = create_course_session(
        db,
        course.id,
        validated.session_number,
        validated.session_date,
        validated.topic.as_deref(),
    )
    .await
    .validate_custom()?;

    Ok(created(session_id))
}

#[get("/courses/<id>/students")]
pub async fn api_get_course_students(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Student>>, ApiError> {
    let course = accessible_course(db, &user, id).await.validate_custom()?;
    let students = get_enrolled_students(db, course.id)
        .await
        .validate_custom()?;

    Ok(Json(students))
}

#[derive(Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    name: String,
    #[validate(email(message = "Invalid email address"))]
    email: Option<String>,
    phone: Option<String>,
    birth_date: Option<String>,
    gender: Option<String>,
    marital_status: Option<String>,
    document_number: Option<String>,
}

#[post("/students", data = "<request>")]
pub async fn api_create_student(
    request: Json<CreateStudentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse<String>>>, ApiError> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let id = create_student(
        db,
        NewStudent {
            name: &validated.name,
            email: validated.email.as_deref(),
            phone: validated.phone.as_deref(),
            birth_date: validated.birth_date.as_deref(),
            gender: validated.gender.as_deref(),
            marital_status: validated.marital_status.as_deref(),
            document_number: validated.document_number.as_deref(),
        },
    )
    .await
    .validate_custom()?;

    Ok(created(id))
}

#[derive(Deserialize)]
pub struct EnrollmentRequest {
    student_id: String,
}

#[post("/courses/<id>/enrollments", data = "<request>")]
pub async fn api_enroll_student(
    id: i64,
    request: Json<EnrollmentRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse<i64>>>, ApiError> {
    user.require_permission(Permission::ManageStudents)
        .validate_custom()?;

    let course = accessible_course(db, &user, id).await.validate_custom()?;
    let student = get_student(db, &request.student_id)
        .await
        .validate_custom()?;

    let enrollment_id = enroll_student(db, course.id, &student.id)
        .await
        .validate_custom()?;

    Ok(created(enrollment_id))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AttendanceResponse {
    pub session: CourseSession,
    pub course_id: i64,
    pub course_name: String,
    pub notes: String,
    pub roster: Vec<RosterEntry>,
    pub stats: RosterStats,
}

impl AttendanceResponse {
    fn from_sheet(sheet: &AttendanceSheet, filter: PresenceFilter, search: &str) -> Self {
        Self {
            session: sheet.session.clone(),
            course_id: sheet.course.id,
            course_name: sheet.course_name.clone(),
            notes: sheet.notes.clone(),
            roster: sheet
                .roster
                .filtered(filter, search)
                .into_iter()
                .cloned()
                .collect(),
            stats: sheet.roster.stats(),
        }
    }
}

const MAX_JUSTIFICATION_CHARS: usize = 5000;

fn validate_edits(edits: &[RosterEdit]) -> Result<(), ValidationError> {
    let too_long = edits.iter().any(|edit| match edit {
        RosterEdit::SetJustification { text, .. } => text.chars().count() > MAX_JUSTIFICATION_CHARS,
        _ => false,
    });

    if too_long {
        let mut error = ValidationError::new("justification_length");
        error.message = Some("Justifications are limited to 5000 characters".into());
        return Err(error);
    }

    Ok(())
}

#[derive(Deserialize, Serialize, Validate, Default)]
pub struct AttendanceEditRequest {
    #[validate(length(max = 5000, message = "Notes are limited to 5000 characters"))]
    pub notes: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_edits"))]
    pub edits: Vec<RosterEdit>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SaveAttendanceResponse {
    pub summary: CommitSummary,
    #[serde(flatten)]
    pub attendance: AttendanceResponse,
}

async fn edited_sheet(
    db: &Pool<Sqlite>,
    user: &User,
    target: &str,
    request: &AttendanceEditRequest,
) -> Result<AttendanceSheet, AppError> {
    let target = target.parse::<SessionTarget>()?;
    let mut sheet = reconcile(db, user, target).await?;

    sheet.roster.apply_all(&request.edits)?;
    if let Some(notes) = &request.notes {
        sheet.notes = notes.clone();
    }

    Ok(sheet)
}

#[get("/attendance/<target>?<filter>&<search>")]
pub async fn api_get_attendance(
    target: &str,
    filter: Option<PresenceFilter>,
    search: Option<String>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let target = target.parse::<SessionTarget>().validate_custom()?;
    let sheet = reconcile(db, &user, target).await.validate_custom()?;

    Ok(Json(AttendanceResponse::from_sheet(
        &sheet,
        filter.unwrap_or_default(),
        search.as_deref().unwrap_or_default(),
    )))
}

#[post("/attendance/<target>/preview", data = "<request>")]
pub async fn api_preview_attendance(
    target: &str,
    request: Json<AttendanceEditRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let validated = request.validate_custom()?;
    let sheet = edited_sheet(db, &user, target, &validated)
        .await
        .validate_custom()?;

    Ok(Json(AttendanceResponse::from_sheet(
        &sheet,
        PresenceFilter::All,
        "",
    )))
}

#[put("/attendance/<target>", data = "<request>")]
pub async fn api_save_attendance(
    target: &str,
    request: Json<AttendanceEditRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<SaveAttendanceResponse>, ApiError> {
    let validated = request.validate_custom()?;
    let mut sheet = edited_sheet(db, &user, target, &validated)
        .await
        .validate_custom()?;

    let summary = commit(db, &user, &mut sheet).await.validate_custom()?;

    Ok(Json(SaveAttendanceResponse {
        summary,
        attendance: AttendanceResponse::from_sheet(&sheet, PresenceFilter::All, ""),
    }))
}
