use std::str::FromStr;

use crate::database::schema::CURRENT_SCHEMA;
use crate::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use tracing::{info, instrument};

const EXPECTED_TABLES: [&str; 7] = [
    "users",
    "user_sessions",
    "students",
    "courses",
    "course_sessions",
    "student_courses",
    "attendance",
];

#[instrument]
pub async fn connect_pool(database_url: &str) -> Result<Pool<Sqlite>, AppError> {
    info!("Connecting to SQLite database");
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // In-memory databases are per connection, so they must stay on one.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Brings the database up to `CURRENT_SCHEMA`. Every statement is
/// `IF NOT EXISTS`, so running this against an existing database is a no-op.
#[instrument(skip(pool))]
pub async fn apply_schema(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Applying declarative schema");

    let mut tx = pool.begin().await?;
    sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(CURRENT_SCHEMA))
        .await
        .map_err(|e| AppError::Internal(format!("Failed to apply schema: {}", e)))?;
    tx.commit().await?;

    let missing = missing_tables(pool).await?;
    if !missing.is_empty() {
        return Err(AppError::Internal(format!(
            "Schema is missing tables after migration: {}",
            missing.join(", ")
        )));
    }

    info!("Schema is up to date");
    Ok(())
}

pub async fn missing_tables(pool: &Pool<Sqlite>) -> Result<Vec<String>, AppError> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(pool)
        .await?;

    let present: Vec<String> = rows
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<_, _>>()?;

    Ok(EXPECTED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|name| name == *table))
        .map(|table| table.to_string())
        .collect())
}
