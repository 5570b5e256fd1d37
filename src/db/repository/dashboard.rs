use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{count_appointments_on, count_patients, count_vitals_on, day_bounds};
use crate::db::DatabaseError;
use crate::models::{AppointmentStatus, BloodRequestStatus, TestRequestStatus};

/// Headline numbers shown on the dashboards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardCounts {
    pub patients_total: i64,
    pub patients_registered_today: i64,
    pub appointments_today: i64,
    pub appointments_scheduled: i64,
    pub appointments_confirmed: i64,
    pub appointments_completed: i64,
    pub tests_pending: i64,
    pub tests_sample_collected: i64,
    pub tests_completed_today: i64,
    pub blood_pending: i64,
    pub blood_approved: i64,
    pub vitals_today: i64,
}

pub fn count_test_requests(
    conn: &Connection,
    status: TestRequestStatus,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM test_requests WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn count_blood_requests(
    conn: &Connection,
    status: BloodRequestStatus,
) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM blood_requests WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Gather every counter for `day` in one pass.
pub fn dashboard_counts(conn: &Connection, day: NaiveDate) -> Result<DashboardCounts, DatabaseError> {
    let (start, end) = day_bounds(day);

    let patients_registered_today = conn.query_row(
        "SELECT COUNT(*) FROM patients WHERE created_at >= ?1 AND created_at < ?2",
        params![start, end],
        |row| row.get(0),
    )?;
    let tests_completed_today = conn.query_row(
        "SELECT COUNT(*) FROM test_requests
         WHERE status = 'completed' AND completed_at >= ?1 AND completed_at < ?2",
        params![start, end],
        |row| row.get(0),
    )?;

    Ok(DashboardCounts {
        patients_total: count_patients(conn, None)?,
        patients_registered_today,
        appointments_today: count_appointments_on(conn, day, None)?,
        appointments_scheduled: count_appointments_on(conn, day, Some(AppointmentStatus::Scheduled))?,
        appointments_confirmed: count_appointments_on(conn, day, Some(AppointmentStatus::Confirmed))?,
        appointments_completed: count_appointments_on(conn, day, Some(AppointmentStatus::Completed))?,
        tests_pending: count_test_requests(conn, TestRequestStatus::Pending)?,
        tests_sample_collected: count_test_requests(conn, TestRequestStatus::SampleCollected)?,
        tests_completed_today,
        blood_pending: count_blood_requests(conn, BloodRequestStatus::Pending)?,
        blood_approved: count_blood_requests(conn, BloodRequestStatus::Approved)?,
        vitals_today: count_vitals_on(conn, day)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;
    use crate::db::repository::{create_test_request, now, record_vitals};
    use crate::models::{NewTestRequest, NewVitals, StaffRole, TestPriority};

    #[test]
    fn empty_database_counts_zero() {
        let conn = test_db();
        let counts = dashboard_counts(&conn, now().date()).unwrap();
        assert_eq!(counts.patients_total, 0);
        assert_eq!(counts.tests_pending, 0);
        assert_eq!(counts.vitals_today, 0);
    }

    #[test]
    fn counts_reflect_activity() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi");
        let doctor = make_staff(&conn, "doc", StaffRole::Doctor);
        let nurse = make_staff(&conn, "nurse", StaffRole::Nurse);
        record_vitals(
            &conn,
            &patient.id,
            &nurse,
            &NewVitals { pulse_bpm: Some(70), ..Default::default() },
        )
        .unwrap();
        let tests = crate::db::repository::list_lab_tests(&conn, true).unwrap();
        create_test_request(
            &conn,
            &NewTestRequest {
                patient_id: patient.id,
                doctor_id: doctor,
                priority: TestPriority::Routine,
                clinical_notes: None,
                lab_test_ids: vec![tests[0].id],
            },
        )
        .unwrap();

        let counts = dashboard_counts(&conn, now().date()).unwrap();
        assert_eq!(counts.patients_total, 1);
        assert_eq!(counts.patients_registered_today, 1);
        assert_eq!(counts.vitals_today, 1);
        assert_eq!(counts.tests_pending, 1);
        assert_eq!(counts.blood_pending, 0);
    }
}
