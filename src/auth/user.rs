use rocket::http::Status;
use serde::Serialize;

use super::{Permission, Role};
use crate::error::AppError;

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub archived: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub archived: Option<bool>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        let role = match user.role.as_deref().unwrap_or_default().parse::<Role>() {
            Ok(role) => role,
            Err(err) => {
                // Unknown roles get the narrowest permission set.
                tracing::warn!(user_id = ?user.id, error = %err, "Falling back to leader role");
                Role::Leader
            }
        };

        let username = user.username.unwrap_or_default();

        Self {
            id: user.id.unwrap_or_default(),
            display_name: user
                .display_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| username.clone()),
            username,
            role,
            email: user.email,
            phone: user.phone,
            archived: user.archived.unwrap_or_default(),
        }
    }
}

impl User {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), Status> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                username = %self.username,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(Status::Forbidden)
        }
    }

    /// Leaders only see their own courses; pastors and admins see every course.
    pub fn can_access_course(&self, leader_id: Option<i64>) -> bool {
        self.has_permission(Permission::ViewAllCourses) || leader_id == Some(self.id)
    }

    /// Whether this user may take attendance for a course led by `leader_id`.
    pub fn require_attendance_access(&self, leader_id: Option<i64>) -> Result<(), AppError> {
        let allowed = self.has_permission(Permission::TakeAllAttendance)
            || (self.has_permission(Permission::TakeOwnAttendance) && leader_id == Some(self.id));

        if allowed {
            Ok(())
        } else {
            Err(AppError::Authorization(format!(
                "User {} may not take attendance for this course",
                self.username
            )))
        }
    }
}
