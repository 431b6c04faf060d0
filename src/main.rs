#[macro_use]
extern crate rocket;

mod api;
mod attendance;
mod auth;
mod database;
mod db;
mod env;
mod error;
mod models;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use api::{
    api_create_course, api_create_course_session, api_create_student, api_enroll_student,
    api_get_attendance, api_get_course_sessions, api_get_course_students, api_get_courses,
    api_login, api_logout, api_me, api_me_unauthorized, api_preview_attendance,
    api_register_user, api_save_attendance, health,
};
use auth::{forbidden_api, not_found_api, unauthorized_api};
use database::{apply_schema, connect_pool};
use db::clean_expired_sessions;
use env::{AppConfig, load_environment};
use error::AppError;
use rocket::{Build, Rocket};
use telemetry::{TelemetryFairing, init_tracing};
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
    #[error("Rocket error: {0}")]
    Rocket(#[from] rocket::Error),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

fn spawn_session_cleanup(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(
                SESSION_CLEANUP_INTERVAL_SECS,
            ))
            .await;
        }
    });
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = load_environment() {
        return Err(Error::Anyhow(anyhow::anyhow!(
            "Failed to load environment: {}",
            e
        )));
    }

    let _telemetry = init_tracing();

    let config = AppConfig::from_env();
    let pool = connect_pool(&config.database_url).await?;

    info!("Applying database schema...");
    apply_schema(&pool).await?;

    spawn_session_cleanup(pool.clone());

    init_rocket(pool, config).launch().await?;

    Ok(())
}

pub fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting course attendance service");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_me_unauthorized,
                api_register_user,
                api_get_courses,
                api_create_course,
                api_get_course_sessions,
                api_create_course_session,
                api_get_course_students,
                api_create_student,
                api_enroll_student,
                api_get_attendance,
                api_preview_attendance,
                api_save_attendance,
                health,
            ],
        )
        .register(
            "/api",
            catchers![unauthorized_api, forbidden_api, not_found_api],
        )
        .attach(TelemetryFairing)
}
