#[cfg(test)]
mod tests {
    use crate::attendance::{SessionTarget, build_roster, reconcile};
    use crate::error::AppError;
    use crate::models::AttendanceRecord;
    use crate::test::test_utils::{TestDbBuilder, create_standard_test_db, student};
    use rocket::tokio;

    fn record(id: i64, student_id: &str, checked_in: bool, justification: Option<&str>) -> AttendanceRecord {
        AttendanceRecord {
            id,
            session_id: 1,
            student_id: student_id.to_string(),
            checked_in,
            justification: justification.map(String::from),
            check_in_time: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_session_target_parsing() {
        assert_eq!("new".parse::<SessionTarget>().unwrap(), SessionTarget::NextPending);
        assert_eq!("42".parse::<SessionTarget>().unwrap(), SessionTarget::Session(42));
        assert!(matches!(
            "forty-two".parse::<SessionTarget>(),
            Err(AppError::Validation(_))
        ));
        assert!(matches!("".parse::<SessionTarget>(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_build_roster_pairs_students_with_records() {
        let students = vec![
            student("s1", "Ana", None),
            student("s2", "Bruno", None),
            student("s3", "Carla", None),
        ];
        let records = vec![
            record(10, "s2", false, Some("Travel")),
            record(11, "s1", true, None),
        ];

        let roster = build_roster(students, records);

        let ids: Vec<_> = roster.entries().iter().map(|e| e.student_id()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);

        let ana = roster.get("s1").unwrap();
        assert!(ana.present);
        assert_eq!(ana.existing_record_id, Some(11));

        let bruno = roster.get("s2").unwrap();
        assert!(!bruno.present);
        assert_eq!(bruno.justification, "Travel");
        assert_eq!(bruno.existing_record_id, Some(10));

        let carla = roster.get("s3").unwrap();
        assert!(!carla.present);
        assert_eq!(carla.justification, "");
        assert_eq!(carla.existing_record_id, None);
    }

    #[test]
    fn test_build_roster_ignores_strays_and_keeps_oldest_duplicate() {
        let students = vec![student("s1", "Ana", None), student("s1", "Ana", None)];
        let records = vec![
            record(5, "s1", false, Some("First")),
            record(9, "s1", true, None),
            record(7, "gone", true, None),
        ];

        let roster = build_roster(students, records);

        assert_eq!(roster.len(), 1);
        let ana = roster.get("s1").unwrap();
        assert_eq!(ana.existing_record_id, Some(5));
        assert_eq!(ana.justification, "First");
        assert!(roster.get("gone").is_none());
    }

    #[tokio::test]
    async fn test_next_pending_session_for_leader() {
        let test_db = create_standard_test_db().await;
        let leader = test_db.user("leader_user").await;

        let sheet = reconcile(&test_db.pool, &leader, SessionTarget::NextPending)
            .await
            .expect("Failed to reconcile next session");

        assert_eq!(sheet.session.id, test_db.session_id("Foundations", 2));
        assert_eq!(sheet.course.id, test_db.course_id("Foundations"));
        assert_eq!(sheet.course_name, "Foundations");
        assert_eq!(sheet.notes, "");

        let names: Vec<_> = sheet
            .roster
            .entries()
            .iter()
            .map(|e| e.student.name.as_str())
            .collect();
        assert_eq!(names, vec!["Ana Souza", "Bruno Lima", "Carla Dias"]);
        assert!(sheet.roster.entries().iter().all(|e| !e.present));
        assert!(sheet.roster.entries().iter().all(|e| e.existing_record_id.is_none()));
    }

    #[tokio::test]
    async fn test_explicit_session_uses_saved_records() {
        let test_db = create_standard_test_db().await;
        let leader = test_db.user("leader_user").await;
        let session_id = test_db.session_id("Foundations", 1);

        let sheet = reconcile(&test_db.pool, &leader, SessionTarget::Session(session_id))
            .await
            .expect("Failed to reconcile session");

        assert_eq!(sheet.roster.len(), 3);

        let ana = sheet.roster.get(&test_db.student_id("Ana Souza")).unwrap();
        assert!(ana.present);
        assert!(ana.existing_record_id.is_some());

        let bruno = sheet.roster.get(&test_db.student_id("Bruno Lima")).unwrap();
        assert!(!bruno.present);
        assert_eq!(bruno.justification, "Travel");
        assert!(bruno.existing_record_id.is_some());

        let carla = sheet.roster.get(&test_db.student_id("Carla Dias")).unwrap();
        assert!(!carla.present);
        assert!(carla.existing_record_id.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_does_not_write() {
        let test_db = create_standard_test_db().await;
        let leader = test_db.user("leader_user").await;
        let session_id = test_db.session_id("Foundations", 2);

        reconcile(&test_db.pool, &leader, SessionTarget::Session(session_id))
            .await
            .expect("Failed to reconcile session");

        assert_eq!(test_db.attendance_count(session_id).await, 0);
    }

    #[tokio::test]
    async fn test_leader_cannot_reconcile_another_leaders_session() {
        let test_db = create_standard_test_db().await;
        let other = test_db.user("other_leader").await;
        let session_id = test_db.session_id("Foundations", 2);

        let result = reconcile(&test_db.pool, &other, SessionTarget::Session(session_id)).await;

        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_pastor_and_admin_can_reconcile_any_session() {
        let test_db = create_standard_test_db().await;
        let session_id = test_db.session_id("Other Course", 1);

        for username in ["pastor_user", "admin_user"] {
            let user = test_db.user(username).await;
            let sheet = reconcile(&test_db.pool, &user, SessionTarget::Session(session_id))
                .await
                .expect("Failed to reconcile session");

            assert_eq!(sheet.roster.len(), 1);
            assert_eq!(sheet.course_name, "Other Course");
        }
    }

    #[tokio::test]
    async fn test_missing_session_is_not_found() {
        let test_db = create_standard_test_db().await;
        let leader = test_db.user("leader_user").await;

        let result = reconcile(&test_db.pool, &leader, SessionTarget::Session(9999)).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_next_pending_without_course_is_not_found() {
        let test_db = create_standard_test_db().await;
        let pastor = test_db.user("pastor_user").await;

        let result = reconcile(&test_db.pool, &pastor, SessionTarget::NextPending).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_next_pending_when_all_sessions_completed_is_not_found() {
        let test_db = TestDbBuilder::new()
            .leader("leader_user")
            .course("Finished", Some("leader_user"))
            .session("Finished", 1, true)
            .session("Finished", 2, true)
            .build()
            .await
            .expect("Failed to build test database");
        let leader = test_db.user("leader_user").await;

        let result = reconcile(&test_db.pool, &leader, SessionTarget::NextPending).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_next_pending_uses_newest_active_course() {
        let test_db = TestDbBuilder::new()
            .leader("leader_user")
            .course("Older", Some("leader_user"))
            .course("Newer", Some("leader_user"))
            .inactive_course("Newest But Closed", Some("leader_user"))
            .session("Older", 1, false)
            .session("Newer", 1, true)
            .session("Newer", 3, false)
            .session("Newer", 2, false)
            .session("Newest But Closed", 1, false)
            .build()
            .await
            .expect("Failed to build test database");
        let leader = test_db.user("leader_user").await;

        let sheet = reconcile(&test_db.pool, &leader, SessionTarget::NextPending)
            .await
            .expect("Failed to reconcile next session");

        assert_eq!(sheet.course.id, test_db.course_id("Newer"));
        assert_eq!(sheet.session.id, test_db.session_id("Newer", 2));
        assert_eq!(sheet.session.session_number, Some(2));
    }

    #[tokio::test]
    async fn test_session_without_enrollments_has_empty_roster() {
        let test_db = TestDbBuilder::new()
            .leader("leader_user")
            .course("Empty", Some("leader_user"))
            .session("Empty", 1, false)
            .build()
            .await
            .expect("Failed to build test database");
        let leader = test_db.user("leader_user").await;

        let sheet = reconcile(&test_db.pool, &leader, SessionTarget::NextPending)
            .await
            .expect("Failed to reconcile empty session");

        assert!(sheet.roster.is_empty());
        assert_eq!(sheet.roster.stats().rate, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_as_unavailable() {
        let test_db = create_standard_test_db().await;
        let leader = test_db.user("leader_user").await;
        let session_id = test_db.session_id("Foundations", 2);

        test_db.pool.close().await;

        let result = reconcile(&test_db.pool, &leader, SessionTarget::Session(session_id)).await;

        assert!(matches!(result, Err(AppError::DataUnavailable { .. })));
    }
}
