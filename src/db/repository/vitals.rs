use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{clean, datetime_col, day_bounds, fmt_datetime, get_patient, now, uuid_col};
use crate::db::DatabaseError;
use crate::models::{NewVitals, Vitals, VitalsView};

const VIEW_SELECT: &str = "SELECT v.id, v.patient_id, v.recorded_by, v.temperature_c, v.systolic,
        v.diastolic, v.pulse_bpm, v.respiratory_rate, v.oxygen_saturation, v.weight_kg,
        v.height_cm, v.notes, v.recorded_at, s.full_name
     FROM vitals v
     JOIN staff s ON s.id = v.recorded_by";

fn check_range<T: PartialOrd + Copy + std::fmt::Display>(
    label: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> Result<(), DatabaseError> {
    match value {
        // Written as a negated range so NaN fails too.
        Some(v) if !(v >= min && v <= max) => Err(DatabaseError::Validation(format!(
            "{label} must be between {min} and {max}"
        ))),
        _ => Ok(()),
    }
}

fn validate(v: &NewVitals) -> Result<(), DatabaseError> {
    if v.is_empty() {
        return Err(DatabaseError::Validation("Enter at least one measurement".into()));
    }
    check_range("Temperature (°C)", v.temperature_c, 30.0, 45.0)?;
    check_range("Systolic pressure", v.systolic, 50, 260)?;
    check_range("Diastolic pressure", v.diastolic, 30, 160)?;
    check_range("Pulse", v.pulse_bpm, 20, 250)?;
    check_range("Respiratory rate", v.respiratory_rate, 5, 60)?;
    check_range("Oxygen saturation", v.oxygen_saturation, 50, 100)?;
    check_range("Weight (kg)", v.weight_kg, 0.5, 400.0)?;
    check_range("Height (cm)", v.height_cm, 20.0, 250.0)?;

    match (v.systolic, v.diastolic) {
        (Some(s), Some(d)) if d >= s => Err(DatabaseError::Validation(
            "Diastolic pressure must be below systolic".into(),
        )),
        (Some(_), None) | (None, Some(_)) => Err(DatabaseError::Validation(
            "Blood pressure needs both systolic and diastolic values".into(),
        )),
        _ => Ok(()),
    }
}

/// Store one set of observations for a patient.
pub fn record_vitals(
    conn: &Connection,
    patient_id: &Uuid,
    recorded_by: &Uuid,
    new: &NewVitals,
) -> Result<Vitals, DatabaseError> {
    validate(new)?;
    get_patient(conn, patient_id)?;

    let vitals = Vitals {
        id: Uuid::new_v4(),
        patient_id: *patient_id,
        recorded_by: *recorded_by,
        temperature_c: new.temperature_c,
        systolic: new.systolic,
        diastolic: new.diastolic,
        pulse_bpm: new.pulse_bpm,
        respiratory_rate: new.respiratory_rate,
        oxygen_saturation: new.oxygen_saturation,
        weight_kg: new.weight_kg,
        height_cm: new.height_cm,
        notes: clean(new.notes.as_deref()),
        recorded_at: now(),
    };

    conn.execute(
        "INSERT INTO vitals (id, patient_id, recorded_by, temperature_c, systolic, diastolic,
         pulse_bpm, respiratory_rate, oxygen_saturation, weight_kg, height_cm, notes, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            vitals.id.to_string(),
            vitals.patient_id.to_string(),
            vitals.recorded_by.to_string(),
            vitals.temperature_c,
            vitals.systolic,
            vitals.diastolic,
            vitals.pulse_bpm,
            vitals.respiratory_rate,
            vitals.oxygen_saturation,
            vitals.weight_kg,
            vitals.height_cm,
            vitals.notes,
            fmt_datetime(&vitals.recorded_at),
        ],
    )?;

    tracing::info!(vitals_id = %vitals.id, "Vitals recorded");
    Ok(vitals)
}

/// Most recent observations first.
pub fn list_vitals_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
    limit: u32,
) -> Result<Vec<VitalsView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE v.patient_id = ?1 ORDER BY v.recorded_at DESC, v.rowid DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string(), limit], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn latest_vitals(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Option<VitalsView>, DatabaseError> {
    let latest = conn
        .query_row(
            &format!(
                "{VIEW_SELECT} WHERE v.patient_id = ?1
                 ORDER BY v.recorded_at DESC, v.rowid DESC LIMIT 1"
            ),
            params![patient_id.to_string()],
            row_to_view,
        )
        .optional()?;
    Ok(latest)
}

pub fn count_vitals_on(conn: &Connection, day: NaiveDate) -> Result<i64, DatabaseError> {
    let (start, end) = day_bounds(day);
    let count = conn.query_row(
        "SELECT COUNT(*) FROM vitals WHERE recorded_at >= ?1 AND recorded_at < ?2",
        params![start, end],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn row_to_view(row: &rusqlite::Row) -> Result<VitalsView, rusqlite::Error> {
    Ok(VitalsView {
        vitals: Vitals {
            id: uuid_col(row, 0)?,
            patient_id: uuid_col(row, 1)?,
            recorded_by: uuid_col(row, 2)?,
            temperature_c: row.get(3)?,
            systolic: row.get(4)?,
            diastolic: row.get(5)?,
            pulse_bpm: row.get(6)?,
            respiratory_rate: row.get(7)?,
            oxygen_saturation: row.get(8)?,
            weight_kg: row.get(9)?,
            height_cm: row.get(10)?,
            notes: row.get(11)?,
            recorded_at: datetime_col(row, 12)?,
        },
        recorded_by_name: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;
    use crate::models::StaffRole;

    fn reading() -> NewVitals {
        NewVitals {
            temperature_c: Some(37.2),
            systolic: Some(118),
            diastolic: Some(76),
            pulse_bpm: Some(80),
            weight_kg: Some(64.5),
            height_cm: Some(162.0),
            notes: Some("  after walk ".into()),
            ..Default::default()
        }
    }

    #[test]
    fn record_and_list() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi");
        let nurse = make_staff(&conn, "nurse1", StaffRole::Nurse);

        let first = record_vitals(&conn, &patient.id, &nurse, &reading()).unwrap();
        assert_eq!(first.notes.as_deref(), Some("after walk"));
        let second = record_vitals(
            &conn,
            &patient.id,
            &nurse,
            &NewVitals {
                pulse_bpm: Some(90),
                ..Default::default()
            },
        )
        .unwrap();

        let history = list_vitals_for_patient(&conn, &patient.id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].vitals.id, second.id);
        assert_eq!(history[0].recorded_by_name, "nurse1 test");

        let latest = latest_vitals(&conn, &patient.id).unwrap().unwrap();
        assert_eq!(latest.vitals.id, second.id);
        assert_eq!(count_vitals_on(&conn, now().date()).unwrap(), 2);
    }

    #[test]
    fn empty_submission_rejected() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi");
        let nurse = make_staff(&conn, "nurse1", StaffRole::Nurse);
        let err = record_vitals(&conn, &patient.id, &nurse, &NewVitals::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn out_of_range_values_rejected() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi");
        let nurse = make_staff(&conn, "nurse1", StaffRole::Nurse);

        let hot = NewVitals { temperature_c: Some(48.0), ..Default::default() };
        assert!(record_vitals(&conn, &patient.id, &nurse, &hot).is_err());

        let spo2 = NewVitals { oxygen_saturation: Some(101), ..Default::default() };
        assert!(record_vitals(&conn, &patient.id, &nurse, &spo2).is_err());

        let inverted = NewVitals { systolic: Some(80), diastolic: Some(90), ..Default::default() };
        assert!(record_vitals(&conn, &patient.id, &nurse, &inverted).is_err());

        let half = NewVitals { systolic: Some(120), ..Default::default() };
        assert!(record_vitals(&conn, &patient.id, &nurse, &half).is_err());
    }

    #[test]
    fn non_finite_values_rejected() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi");
        let nurse = make_staff(&conn, "nurse1", StaffRole::Nurse);

        let nan = NewVitals { temperature_c: Some(f64::NAN), ..Default::default() };
        let err = record_vitals(&conn, &patient.id, &nurse, &nan).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));

        let inf = NewVitals { weight_kg: Some(f64::INFINITY), ..Default::default() };
        let err = record_vitals(&conn, &patient.id, &nurse, &inf).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));

        assert!(list_vitals_for_patient(&conn, &patient.id, 10).unwrap().is_empty());
    }

    #[test]
    fn latest_for_new_patient_is_none() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi");
        assert!(latest_vitals(&conn, &patient.id).unwrap().is_none());
    }
}
