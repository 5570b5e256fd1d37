use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    clean, datetime_col, fmt_datetime, get_patient, get_staff, immediate_tx, now,
    opt_datetime_col, opt_uuid_col, uuid_col,
};
use crate::db::DatabaseError;
use crate::models::{
    ItemResult, LabTest, NewLabTest, NewTestRequest, TestRequest, TestRequestDetail,
    TestRequestItem, TestRequestStatus, TestRequestSummary,
};

const LAB_TEST_COLUMNS: &str = "id, code, name, sample_type, unit, reference_range, active";

const REQUEST_SELECT: &str = "SELECT r.id, r.patient_id, r.doctor_id, r.priority, r.clinical_notes,
        r.status, r.requested_at, r.sample_collected_at, r.collected_by, r.completed_at,
        r.completed_by,
        p.first_name || ' ' || p.last_name, p.hospital_number, s.full_name,
        (SELECT GROUP_CONCAT(lt.name, ', ')
           FROM test_request_items i JOIN lab_tests lt ON lt.id = i.lab_test_id
          WHERE i.request_id = r.id)
     FROM test_requests r
     JOIN patients p ON p.id = r.patient_id
     JOIN staff s ON s.id = r.doctor_id";

// ═══════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════

pub fn list_lab_tests(conn: &Connection, active_only: bool) -> Result<Vec<LabTest>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LAB_TEST_COLUMNS} FROM lab_tests
         WHERE (?1 = 0 OR active = 1) ORDER BY name"
    ))?;
    let rows = stmt.query_map(params![active_only as i32], row_to_lab_test)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn get_lab_test(conn: &Connection, id: &Uuid) -> Result<LabTest, DatabaseError> {
    conn.query_row(
        &format!("SELECT {LAB_TEST_COLUMNS} FROM lab_tests WHERE id = ?1"),
        params![id.to_string()],
        row_to_lab_test,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("lab_test", id))
}

/// Add a test to the catalog. Codes are stored upper-case and must be unique.
pub fn insert_lab_test(conn: &Connection, new: &NewLabTest) -> Result<LabTest, DatabaseError> {
    let code = new.code.trim().to_uppercase();
    if code.is_empty()
        || code.len() > 16
        || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(DatabaseError::Validation(
            "Test code must be 1-16 letters, digits or '-'".into(),
        ));
    }
    let name = new.name.trim();
    let sample_type = new.sample_type.trim();
    if name.is_empty() || sample_type.is_empty() {
        return Err(DatabaseError::Validation("Test name and sample type are required".into()));
    }

    let taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM lab_tests WHERE code = ?1)",
        params![code],
        |row| row.get(0),
    )?;
    if taken {
        return Err(DatabaseError::ConstraintViolation(format!(
            "test code '{code}' already exists"
        )));
    }

    let test = LabTest {
        id: Uuid::new_v4(),
        code,
        name: name.to_string(),
        sample_type: sample_type.to_string(),
        unit: clean(new.unit.as_deref()),
        reference_range: clean(new.reference_range.as_deref()),
        active: true,
    };
    conn.execute(
        "INSERT INTO lab_tests (id, code, name, sample_type, unit, reference_range, active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![
            test.id.to_string(),
            test.code,
            test.name,
            test.sample_type,
            test.unit,
            test.reference_range,
        ],
    )?;
    Ok(test)
}

/// Retire or restore a catalog test. Existing requests keep their items.
pub fn set_lab_test_active(conn: &Connection, id: &Uuid, active: bool) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE lab_tests SET active = ?2 WHERE id = ?1",
        params![id.to_string(), active as i32],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("lab_test", id));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Test requests
// ═══════════════════════════════════════════════════════════

/// Order one or more catalog tests for a patient.
///
/// The request and all of its items are written in one transaction.
pub fn create_test_request(
    conn: &Connection,
    new: &NewTestRequest,
) -> Result<TestRequest, DatabaseError> {
    if new.lab_test_ids.is_empty() {
        return Err(DatabaseError::Validation("Select at least one test".into()));
    }
    let mut seen = HashSet::new();
    if !new.lab_test_ids.iter().all(|id| seen.insert(*id)) {
        return Err(DatabaseError::Validation("A test was selected more than once".into()));
    }

    get_patient(conn, &new.patient_id)?;
    get_staff(conn, &new.doctor_id)?;
    for id in &new.lab_test_ids {
        let test = get_lab_test(conn, id)?;
        if !test.active {
            return Err(DatabaseError::Validation(format!(
                "{} is no longer offered",
                test.name
            )));
        }
    }

    let request = TestRequest {
        id: Uuid::new_v4(),
        patient_id: new.patient_id,
        doctor_id: new.doctor_id,
        priority: new.priority,
        clinical_notes: clean(new.clinical_notes.as_deref()),
        status: TestRequestStatus::Pending,
        requested_at: now(),
        sample_collected_at: None,
        collected_by: None,
        completed_at: None,
        completed_by: None,
    };

    let tx = immediate_tx(conn)?;
    tx.execute(
        "INSERT INTO test_requests (id, patient_id, doctor_id, priority, clinical_notes, status,
         requested_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            request.id.to_string(),
            request.patient_id.to_string(),
            request.doctor_id.to_string(),
            request.priority.as_str(),
            request.clinical_notes,
            request.status.as_str(),
            fmt_datetime(&request.requested_at),
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO test_request_items (id, request_id, lab_test_id) VALUES (?1, ?2, ?3)",
        )?;
        for lab_test_id in &new.lab_test_ids {
            stmt.execute(params![
                Uuid::new_v4().to_string(),
                request.id.to_string(),
                lab_test_id.to_string(),
            ])?;
        }
    }
    tx.commit()?;

    tracing::info!(
        request_id = %request.id,
        tests = new.lab_test_ids.len(),
        "Test request created"
    );
    Ok(request)
}

/// A request with names resolved and its items in catalog-code order.
pub fn get_test_request(conn: &Connection, id: &Uuid) -> Result<TestRequestDetail, DatabaseError> {
    let summary = conn
        .query_row(
            &format!("{REQUEST_SELECT} WHERE r.id = ?1"),
            params![id.to_string()],
            row_to_summary,
        )
        .optional()?
        .ok_or_else(|| DatabaseError::not_found("test_request", id))?;

    let mut stmt = conn.prepare(
        "SELECT i.id, i.request_id, i.lab_test_id, lt.code, lt.name, lt.sample_type, lt.unit,
                lt.reference_range, i.result_value, i.result_flag, i.result_comment, i.resulted_at
         FROM test_request_items i
         JOIN lab_tests lt ON lt.id = i.lab_test_id
         WHERE i.request_id = ?1
         ORDER BY lt.code",
    )?;
    let items = stmt
        .query_map(params![id.to_string()], row_to_item)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TestRequestDetail {
        request: summary.request,
        patient_name: summary.patient_name,
        hospital_number: summary.hospital_number,
        doctor_name: summary.doctor_name,
        items,
    })
}

/// Lab queue for one status. Open queues put urgent work first, then
/// oldest first; closed ones list the most recent first.
pub fn list_test_requests_by_status(
    conn: &Connection,
    status: TestRequestStatus,
    limit: u32,
) -> Result<Vec<TestRequestSummary>, DatabaseError> {
    let order = match status {
        TestRequestStatus::Pending | TestRequestStatus::SampleCollected => {
            "r.priority = 'routine', r.requested_at"
        }
        TestRequestStatus::Completed | TestRequestStatus::Cancelled => {
            "COALESCE(r.completed_at, r.requested_at) DESC"
        }
    };
    let mut stmt = conn.prepare(&format!(
        "{REQUEST_SELECT} WHERE r.status = ?1 ORDER BY {order} LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![status.as_str(), limit], row_to_summary)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn list_test_requests_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<TestRequestSummary>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{REQUEST_SELECT} WHERE r.patient_id = ?1 ORDER BY r.requested_at DESC"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string()], row_to_summary)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Completed requests ordered by a doctor, newest results first.
pub fn list_recent_results_for_doctor(
    conn: &Connection,
    doctor_id: &Uuid,
    limit: u32,
) -> Result<Vec<TestRequestSummary>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{REQUEST_SELECT} WHERE r.doctor_id = ?1 AND r.status = 'completed'
         ORDER BY r.completed_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![doctor_id.to_string(), limit], row_to_summary)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Pending → Sample Collected.
pub fn collect_sample(
    conn: &Connection,
    id: &Uuid,
    collected_by: &Uuid,
) -> Result<TestRequest, DatabaseError> {
    let current = load_status(conn, id)?;
    let to = TestRequestStatus::SampleCollected;
    ensure_transition(current, to)?;

    let affected = conn.execute(
        "UPDATE test_requests SET status = ?3, sample_collected_at = ?4, collected_by = ?5
         WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            current.as_str(),
            to.as_str(),
            fmt_datetime(&now()),
            collected_by.to_string(),
        ],
    )?;
    if affected == 0 {
        return Err(stale(current, to));
    }
    tracing::info!(request_id = %id, "Sample collected");
    get_test_request(conn, id).map(|d| d.request)
}

/// Pending | Sample Collected → Cancelled.
pub fn cancel_test_request(conn: &Connection, id: &Uuid) -> Result<TestRequest, DatabaseError> {
    let current = load_status(conn, id)?;
    let to = TestRequestStatus::Cancelled;
    ensure_transition(current, to)?;

    let affected = conn.execute(
        "UPDATE test_requests SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![id.to_string(), current.as_str(), to.as_str()],
    )?;
    if affected == 0 {
        return Err(stale(current, to));
    }
    tracing::info!(request_id = %id, "Test request cancelled");
    get_test_request(conn, id).map(|d| d.request)
}

/// Enter results for some or all items of a collected request.
///
/// Results can be entered in several passes; re-entering an item
/// overwrites it. Once every item has a value the request is completed in
/// the same transaction.
pub fn record_results(
    conn: &Connection,
    request_id: &Uuid,
    scientist_id: &Uuid,
    results: &[ItemResult],
) -> Result<TestRequestDetail, DatabaseError> {
    if results.is_empty() {
        return Err(DatabaseError::Validation("Enter at least one result".into()));
    }
    if results.iter().any(|r| r.value.trim().is_empty()) {
        return Err(DatabaseError::Validation("Result values cannot be blank".into()));
    }

    let tx = immediate_tx(conn)?;
    let current = load_status(&tx, request_id)?;
    if current != TestRequestStatus::SampleCollected {
        return Err(DatabaseError::InvalidTransition {
            entity: "test request",
            from: current.label().into(),
            to: TestRequestStatus::Completed.label().into(),
        });
    }

    let stamp = fmt_datetime(&now());
    {
        let mut stmt = tx.prepare(
            "UPDATE test_request_items
             SET result_value = ?3, result_flag = ?4, result_comment = ?5, resulted_at = ?6
             WHERE id = ?1 AND request_id = ?2",
        )?;
        for result in results {
            let affected = stmt.execute(params![
                result.item_id.to_string(),
                request_id.to_string(),
                result.value.trim(),
                result.flag.as_str(),
                clean(result.comment.as_deref()),
                stamp,
            ])?;
            if affected == 0 {
                return Err(DatabaseError::not_found("test_request_item", result.item_id));
            }
        }
    }

    let outstanding: i64 = tx.query_row(
        "SELECT COUNT(*) FROM test_request_items
         WHERE request_id = ?1 AND (result_value IS NULL OR TRIM(result_value) = '')",
        params![request_id.to_string()],
        |row| row.get(0),
    )?;
    if outstanding == 0 {
        tx.execute(
            "UPDATE test_requests SET status = 'completed', completed_at = ?2, completed_by = ?3
             WHERE id = ?1 AND status = 'sample_collected'",
            params![request_id.to_string(), stamp, scientist_id.to_string()],
        )?;
    }
    tx.commit()?;

    tracing::info!(
        request_id = %request_id,
        entered = results.len(),
        completed = outstanding == 0,
        "Lab results recorded"
    );
    get_test_request(conn, request_id)
}

fn load_status(conn: &Connection, id: &Uuid) -> Result<TestRequestStatus, DatabaseError> {
    conn.query_row(
        "SELECT status FROM test_requests WHERE id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("test_request", id))
}

fn ensure_transition(from: TestRequestStatus, to: TestRequestStatus) -> Result<(), DatabaseError> {
    if from.can_transition_to(&to) {
        Ok(())
    } else {
        Err(stale(from, to))
    }
}

fn stale(from: TestRequestStatus, to: TestRequestStatus) -> DatabaseError {
    DatabaseError::InvalidTransition {
        entity: "test request",
        from: from.label().into(),
        to: to.label().into(),
    }
}

fn row_to_lab_test(row: &rusqlite::Row) -> Result<LabTest, rusqlite::Error> {
    Ok(LabTest {
        id: uuid_col(row, 0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        sample_type: row.get(3)?,
        unit: row.get(4)?,
        reference_range: row.get(5)?,
        active: row.get::<_, i64>(6)? != 0,
    })
}

fn row_to_summary(row: &rusqlite::Row) -> Result<TestRequestSummary, rusqlite::Error> {
    Ok(TestRequestSummary {
        request: TestRequest {
            id: uuid_col(row, 0)?,
            patient_id: uuid_col(row, 1)?,
            doctor_id: uuid_col(row, 2)?,
            priority: row.get(3)?,
            clinical_notes: row.get(4)?,
            status: row.get(5)?,
            requested_at: datetime_col(row, 6)?,
            sample_collected_at: opt_datetime_col(row, 7)?,
            collected_by: opt_uuid_col(row, 8)?,
            completed_at: opt_datetime_col(row, 9)?,
            completed_by: opt_uuid_col(row, 10)?,
        },
        patient_name: row.get(11)?,
        hospital_number: row.get(12)?,
        doctor_name: row.get(13)?,
        test_names: row.get::<_, Option<String>>(14)?.unwrap_or_default(),
    })
}

fn row_to_item(row: &rusqlite::Row) -> Result<TestRequestItem, rusqlite::Error> {
    Ok(TestRequestItem {
        id: uuid_col(row, 0)?,
        request_id: uuid_col(row, 1)?,
        lab_test_id: uuid_col(row, 2)?,
        test_code: row.get(3)?,
        test_name: row.get(4)?,
        sample_type: row.get(5)?,
        unit: row.get(6)?,
        reference_range: row.get(7)?,
        result_value: row.get(8)?,
        result_flag: row.get(9)?,
        result_comment: row.get(10)?,
        resulted_at: opt_datetime_col(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;
    use crate::models::{ResultFlag, StaffRole, TestPriority};

    struct Fixture {
        conn: Connection,
        patient: Uuid,
        doctor: Uuid,
        scientist: Uuid,
        tests: Vec<LabTest>,
    }

    fn fixture() -> Fixture {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi").id;
        let doctor = make_staff(&conn, "doc", StaffRole::Doctor);
        let scientist = make_staff(&conn, "labsci", StaffRole::LabScientist);
        let tests = list_lab_tests(&conn, true).unwrap();
        Fixture { conn, patient, doctor, scientist, tests }
    }

    fn order(f: &Fixture, ids: Vec<Uuid>, priority: TestPriority) -> Result<TestRequest, DatabaseError> {
        create_test_request(
            &f.conn,
            &NewTestRequest {
                patient_id: f.patient,
                doctor_id: f.doctor,
                priority,
                clinical_notes: Some("fever x3 days".into()),
                lab_test_ids: ids,
            },
        )
    }

    fn result(item: &TestRequestItem, value: &str) -> ItemResult {
        ItemResult {
            item_id: item.id,
            value: value.into(),
            flag: ResultFlag::Normal,
            comment: None,
        }
    }

    #[test]
    fn seeded_catalog_is_listed() {
        let f = fixture();
        assert_eq!(f.tests.len(), 10);
        assert!(f.tests.iter().any(|t| t.code == "MP"));
    }

    #[test]
    fn catalog_add_and_retire() {
        let f = fixture();
        let added = insert_lab_test(
            &f.conn,
            &NewLabTest {
                code: " crp ".into(),
                name: "C-Reactive Protein".into(),
                sample_type: "Serum".into(),
                unit: Some("mg/L".into()),
                reference_range: Some(" ".into()),
            },
        )
        .unwrap();
        assert_eq!(added.code, "CRP");
        assert_eq!(added.reference_range, None);

        let dup = insert_lab_test(
            &f.conn,
            &NewLabTest {
                code: "CRP".into(),
                name: "Again".into(),
                sample_type: "Serum".into(),
                unit: None,
                reference_range: None,
            },
        );
        assert!(matches!(dup, Err(DatabaseError::ConstraintViolation(_))));

        set_lab_test_active(&f.conn, &added.id, false).unwrap();
        assert_eq!(list_lab_tests(&f.conn, true).unwrap().len(), 10);
        assert_eq!(list_lab_tests(&f.conn, false).unwrap().len(), 11);

        let err = order(&f, vec![added.id], TestPriority::Routine).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn create_rejects_empty_and_duplicate_selection() {
        let f = fixture();
        assert!(matches!(
            order(&f, vec![], TestPriority::Routine),
            Err(DatabaseError::Validation(_))
        ));
        let id = f.tests[0].id;
        assert!(matches!(
            order(&f, vec![id, id], TestPriority::Routine),
            Err(DatabaseError::Validation(_))
        ));
        assert!(matches!(
            order(&f, vec![Uuid::new_v4()], TestPriority::Routine),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn full_workflow_completes_when_all_items_resulted() {
        let f = fixture();
        let req = order(&f, vec![f.tests[0].id, f.tests[1].id], TestPriority::Urgent).unwrap();
        assert_eq!(req.status, TestRequestStatus::Pending);

        // Results before collection are refused.
        let detail = get_test_request(&f.conn, &req.id).unwrap();
        assert_eq!(detail.items.len(), 2);
        let early = record_results(&f.conn, &req.id, &f.scientist, &[result(&detail.items[0], "5.1")]);
        assert!(matches!(early, Err(DatabaseError::InvalidTransition { .. })));

        let collected = collect_sample(&f.conn, &req.id, &f.scientist).unwrap();
        assert_eq!(collected.status, TestRequestStatus::SampleCollected);
        assert_eq!(collected.collected_by, Some(f.scientist));
        assert!(collected.sample_collected_at.is_some());

        let partial =
            record_results(&f.conn, &req.id, &f.scientist, &[result(&detail.items[0], "5.1")]).unwrap();
        assert_eq!(partial.request.status, TestRequestStatus::SampleCollected);
        assert!(partial.items[0].has_result());
        assert!(!partial.items[1].has_result());

        let mut high = result(&detail.items[1], "18.2");
        high.flag = ResultFlag::High;
        high.comment = Some("repeat".into());
        let done = record_results(&f.conn, &req.id, &f.scientist, &[high]).unwrap();
        assert_eq!(done.request.status, TestRequestStatus::Completed);
        assert_eq!(done.request.completed_by, Some(f.scientist));
        assert_eq!(done.items[1].result_flag, Some(ResultFlag::High));

        assert!(matches!(
            cancel_test_request(&f.conn, &req.id),
            Err(DatabaseError::InvalidTransition { .. })
        ));
        let recent = list_recent_results_for_doctor(&f.conn, &f.doctor, 5).unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn blank_and_foreign_items_rejected() {
        let f = fixture();
        let req = order(&f, vec![f.tests[0].id], TestPriority::Routine).unwrap();
        collect_sample(&f.conn, &req.id, &f.scientist).unwrap();
        let detail = get_test_request(&f.conn, &req.id).unwrap();

        assert!(matches!(
            record_results(&f.conn, &req.id, &f.scientist, &[result(&detail.items[0], "  ")]),
            Err(DatabaseError::Validation(_))
        ));

        let other = order(&f, vec![f.tests[1].id], TestPriority::Routine).unwrap();
        let other_item = get_test_request(&f.conn, &other.id).unwrap().items.remove(0);
        assert!(matches!(
            record_results(&f.conn, &req.id, &f.scientist, &[result(&other_item, "1")]),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn cancel_and_double_collect() {
        let f = fixture();
        let req = order(&f, vec![f.tests[2].id], TestPriority::Routine).unwrap();
        collect_sample(&f.conn, &req.id, &f.scientist).unwrap();
        assert!(collect_sample(&f.conn, &req.id, &f.scientist).is_err());
        let cancelled = cancel_test_request(&f.conn, &req.id).unwrap();
        assert_eq!(cancelled.status, TestRequestStatus::Cancelled);
    }

    #[test]
    fn queue_puts_urgent_first() {
        let f = fixture();
        let routine = order(&f, vec![f.tests[0].id], TestPriority::Routine).unwrap();
        let urgent = order(&f, vec![f.tests[1].id, f.tests[2].id], TestPriority::Urgent).unwrap();

        let queue = list_test_requests_by_status(&f.conn, TestRequestStatus::Pending, 50).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].request.id, urgent.id);
        assert_eq!(queue[1].request.id, routine.id);
        assert!(queue[0].test_names.contains(", "));
        assert_eq!(queue[0].patient_name, "Ada Obi");

        assert_eq!(list_test_requests_for_patient(&f.conn, &f.patient).unwrap().len(), 2);
    }
}
