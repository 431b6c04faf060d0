#[cfg(test)]
pub mod test_utils {
    use crate::auth::{Role, User};
    use crate::database::{apply_schema, connect_pool};
    use crate::db::{
        NewCourse, NewStudent, NewUser, create_course, create_course_session, create_student,
        create_user, enroll_student, get_user,
    };
    use crate::env::AppConfig;
    use crate::error::AppError;
    use crate::models::Student;
    use chrono::{Duration, NaiveDate, Utc};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;

    pub static STANDARD_PASSWORD: &str = "password123";

    pub async fn setup_test_pool() -> Pool<Sqlite> {
        let pool = connect_pool("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        apply_schema(&pool)
            .await
            .expect("Failed to apply schema to test database");

        pool
    }

    pub struct TestUser {
        pub username: String,
        pub role: Role,
    }

    pub struct TestCourse {
        pub title: String,
        pub leader_username: Option<String>,
        pub is_active: bool,
        pub capacity: i64,
    }

    pub struct TestSession {
        pub course_title: String,
        pub number: i64,
        pub completed: bool,
    }

    pub struct TestStudent {
        pub name: String,
        pub email: Option<String>,
    }

    pub struct TestRecord {
        pub course_title: String,
        pub session_number: i64,
        pub student_name: String,
        pub checked_in: bool,
        pub justification: Option<String>,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        courses: Vec<TestCourse>,
        sessions: Vec<TestSession>,
        students: Vec<TestStudent>,
        enrollments: Vec<(String, String)>,
        records: Vec<TestRecord>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, username: &str, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                role,
            });
            self
        }

        pub fn leader(self, username: &str) -> Self {
            self.user(username, Role::Leader)
        }

        pub fn pastor(self, username: &str) -> Self {
            self.user(username, Role::Pastor)
        }

        pub fn admin(self, username: &str) -> Self {
            self.user(username, Role::Admin)
        }

        pub fn course(mut self, title: &str, leader_username: Option<&str>) -> Self {
            self.courses.push(TestCourse {
                title: title.to_string(),
                leader_username: leader_username.map(String::from),
                is_active: true,
                capacity: 25,
            });
            self
        }

        pub fn inactive_course(mut self, title: &str, leader_username: Option<&str>) -> Self {
            self.courses.push(TestCourse {
                title: title.to_string(),
                leader_username: leader_username.map(String::from),
                is_active: false,
                capacity: 25,
            });
            self
        }

        pub fn session(mut self, course_title: &str, number: i64, completed: bool) -> Self {
            self.sessions.push(TestSession {
                course_title: course_title.to_string(),
                number,
                completed,
            });
            self
        }

        pub fn student(mut self, name: &str, email: Option<&str>) -> Self {
            self.students.push(TestStudent {
                name: name.to_string(),
                email: email.map(String::from),
            });
            self
        }

        pub fn enroll(mut self, course_title: &str, student_name: &str) -> Self {
            self.enrollments
                .push((course_title.to_string(), student_name.to_string()));
            self
        }

        pub fn record(
            mut self,
            course_title: &str,
            session_number: i64,
            student_name: &str,
            checked_in: bool,
            justification: Option<&str>,
        ) -> Self {
            self.records.push(TestRecord {
                course_title: course_title.to_string(),
                session_number,
                student_name: student_name.to_string(),
                checked_in,
                justification: justification.map(String::from),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            let pool = setup_test_pool().await;

            let mut user_ids = HashMap::new();
            let mut course_ids = HashMap::new();
            let mut session_ids = HashMap::new();
            let mut student_ids = HashMap::new();

            for user in &self.users {
                let id = create_user(
                    &pool,
                    NewUser {
                        username: &user.username,
                        password: STANDARD_PASSWORD,
                        role: user.role,
                        display_name: None,
                        email: None,
                        phone: None,
                    },
                )
                .await?;
                user_ids.insert(user.username.clone(), id);
            }

            for course in &self.courses {
                let leader_id = course
                    .leader_username
                    .as_ref()
                    .and_then(|name| user_ids.get(name).copied());

                let id = create_course(
                    &pool,
                    NewCourse {
                        title: &course.title,
                        leader_id,
                        capacity: course.capacity,
                        is_active: course.is_active,
                    },
                )
                .await?;
                course_ids.insert(course.title.clone(), id);
            }

            let first_day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
            for session in &self.sessions {
                let course_id = course_ids[&session.course_title];
                let date = first_day + Duration::weeks(session.number);
                let id =
                    create_course_session(&pool, course_id, session.number, date, None).await?;

                if session.completed {
                    sqlx::query("UPDATE course_sessions SET is_completed = TRUE WHERE id = ?")
                        .bind(id)
                        .execute(&pool)
                        .await?;
                }

                session_ids.insert((session.course_title.clone(), session.number), id);
            }

            for student in &self.students {
                let id = create_student(
                    &pool,
                    NewStudent {
                        name: &student.name,
                        email: student.email.as_deref(),
                        ..Default::default()
                    },
                )
                .await?;
                student_ids.insert(student.name.clone(), id);
            }

            for (course_title, student_name) in &self.enrollments {
                enroll_student(&pool, course_ids[course_title], &student_ids[student_name])
                    .await?;
            }

            let now = Utc::now().naive_utc();
            for record in &self.records {
                let session_id =
                    session_ids[&(record.course_title.clone(), record.session_number)];
                sqlx::query(
                    "INSERT INTO attendance
                     (session_id, student_id, checked_in, justification, check_in_time)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(session_id)
                .bind(&student_ids[&record.student_name])
                .bind(record.checked_in)
                .bind(record.justification.as_deref())
                .bind(now)
                .execute(&pool)
                .await?;
            }

            Ok(TestDb {
                pool,
                user_ids,
                course_ids,
                session_ids,
                student_ids,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_ids: HashMap<String, i64>,
        pub course_ids: HashMap<String, i64>,
        pub session_ids: HashMap<(String, i64), i64>,
        pub student_ids: HashMap<String, String>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> i64 {
            self.user_ids[username]
        }

        pub fn course_id(&self, title: &str) -> i64 {
            self.course_ids[title]
        }

        pub fn session_id(&self, course_title: &str, number: i64) -> i64 {
            self.session_ids[&(course_title.to_string(), number)]
        }

        pub fn student_id(&self, name: &str) -> String {
            self.student_ids[name].clone()
        }

        pub async fn user(&self, username: &str) -> User {
            get_user(&self.pool, self.user_id(username))
                .await
                .expect("Test user should exist")
        }

        pub async fn attendance_count(&self, session_id: i64) -> i64 {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM attendance WHERE session_id = ?")
                    .bind(session_id)
                    .fetch_one(&self.pool)
                    .await
                    .expect("Failed to count attendance rows");
            count
        }
    }

    /// Two leaders with one course each, plus a pastor and an admin.
    ///
    /// "Foundations" (leader_user): sessions 1 (completed), 2 and 3; Ana,
    /// Bruno and Carla enrolled; session 1 has Ana present and Bruno absent.
    /// "Other Course" (other_leader): session 1; Davi enrolled.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin_user")
            .pastor("pastor_user")
            .leader("leader_user")
            .leader("other_leader")
            .course("Foundations", Some("leader_user"))
            .course("Other Course", Some("other_leader"))
            .session("Foundations", 1, true)
            .session("Foundations", 2, false)
            .session("Foundations", 3, false)
            .session("Other Course", 1, false)
            .student("Ana Souza", Some("ana@example.com"))
            .student("Bruno Lima", Some("bruno@example.com"))
            .student("Carla Dias", None)
            .student("Davi Rocha", None)
            .enroll("Foundations", "Ana Souza")
            .enroll("Foundations", "Bruno Lima")
            .enroll("Foundations", "Carla Dias")
            .enroll("Other Course", "Davi Rocha")
            .record("Foundations", 1, "Ana Souza", true, None)
            .record("Foundations", 1, "Bruno Lima", false, Some("Travel"))
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = crate::init_rocket(test_db.pool.clone(), AppConfig::default());
        let client = Client::tracked(rocket)
            .await
            .expect("Valid rocket instance");
        (client, test_db)
    }

    pub async fn login_test_user(client: &Client, username: &str, password: &str) {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        let body: serde_json::Value = response.into_json().await.expect("Login response body");
        assert_eq!(body["success"], true, "Login failed for {}", username);
    }

    pub fn student(id: &str, name: &str, email: Option<&str>) -> Student {
        Student {
            id: id.to_string(),
            name: name.to_string(),
            email: email.map(String::from),
            phone: None,
            birth_date: None,
            gender: None,
            marital_status: None,
            document_number: None,
            registration_date: None,
        }
    }
}
