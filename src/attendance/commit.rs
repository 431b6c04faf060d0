use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use super::reconcile::AttendanceSheet;
use crate::auth::User;
use crate::db::{
    complete_session, find_attendance_record_id, insert_attendance_record,
    update_attendance_record,
};
use crate::error::AppError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
}

fn commit_failed(session_id: i64, source: sqlx::Error) -> AppError {
    AppError::CommitFailed { session_id, source }
}

/// Saves the sheet: overwrites the session notes, marks the session completed
/// and upserts one attendance record per roster entry.
///
/// All writes share one transaction, so a failure leaves storage untouched.
/// Writes are derived from the full roster rather than from the edits that
/// produced it, and each student's record is looked up again inside the
/// transaction, so overlapping saves converge on one row per student holding
/// the last save's values.
/// On success the sheet is updated to match what was stored.
#[instrument(skip(pool, caller, sheet), fields(user_id = caller.id, session_id = sheet.session.id))]
pub async fn commit(
    pool: &Pool<Sqlite>,
    caller: &User,
    sheet: &mut AttendanceSheet,
) -> Result<CommitSummary, AppError> {
    caller.require_attendance_access(sheet.course.leader_id)?;

    let session_id = sheet.session.id;
    let now = Utc::now().naive_utc();
    let mut summary = CommitSummary::default();
    let mut saved = Vec::new();

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| commit_failed(session_id, e))?;

    let touched = complete_session(&mut tx, session_id, &sheet.notes)
        .await
        .map_err(|e| commit_failed(session_id, e))?;

    if touched == 0 {
        return Err(AppError::NotFound(format!(
            "Session {} not found",
            session_id
        )));
    }

    for entry in sheet.roster.entries() {
        let justification = entry.stored_justification();

        if let Some(record_id) = entry.existing_record_id {
            let rows =
                update_attendance_record(&mut tx, record_id, entry.present, justification, now)
                    .await
                    .map_err(|e| commit_failed(session_id, e))?;

            if rows > 0 {
                summary.updated += 1;
                continue;
            }

            warn!(record_id, student_id = %entry.student_id(), "Attendance record vanished");
        }

        // Another save of this session may have landed after the roster was loaded.
        let found = find_attendance_record_id(&mut tx, session_id, entry.student_id())
            .await
            .map_err(|e| commit_failed(session_id, e))?;

        if let Some(record_id) = found {
            update_attendance_record(&mut tx, record_id, entry.present, justification, now)
                .await
                .map_err(|e| commit_failed(session_id, e))?;

            summary.updated += 1;
            saved.push((entry.student_id().to_string(), record_id));
            continue;
        }

        let record_id = insert_attendance_record(
            &mut tx,
            session_id,
            entry.student_id(),
            entry.present,
            justification,
            now,
        )
        .await
        .map_err(|e| commit_failed(session_id, e))?;

        summary.inserted += 1;
        saved.push((entry.student_id().to_string(), record_id));
    }

    tx.commit()
        .await
        .map_err(|e| commit_failed(session_id, e))?;

    for (student_id, record_id) in saved {
        sheet.roster.record_saved(&student_id, record_id);
    }
    sheet.session.notes = sheet.notes.clone();
    sheet.session.is_completed = true;

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        "Committed attendance"
    );

    Ok(summary)
}
