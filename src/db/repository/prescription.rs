use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    clean, datetime_col, fmt_datetime, get_appointment, get_patient, now, opt_uuid_col, uuid_col,
};
use crate::db::DatabaseError;
use crate::models::{NewPrescription, Prescription, PrescriptionStatus, PrescriptionView};

const VIEW_SELECT: &str = "SELECT rx.id, rx.patient_id, rx.doctor_id, rx.appointment_id,
        rx.medication, rx.dosage, rx.frequency, rx.duration, rx.instructions, rx.status,
        rx.prescribed_at, rx.updated_at,
        p.first_name || ' ' || p.last_name, p.hospital_number, s.full_name
     FROM prescriptions rx
     JOIN patients p ON p.id = rx.patient_id
     JOIN staff s ON s.id = rx.doctor_id";

fn required<'a>(label: &str, value: &'a str) -> Result<&'a str, DatabaseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DatabaseError::Validation(format!("{label} is required")));
    }
    Ok(value)
}

pub fn create_prescription(
    conn: &Connection,
    new: &NewPrescription,
) -> Result<Prescription, DatabaseError> {
    let medication = required("Medication", &new.medication)?;
    let dosage = required("Dosage", &new.dosage)?;
    let frequency = required("Frequency", &new.frequency)?;

    get_patient(conn, &new.patient_id)?;
    if let Some(appointment_id) = &new.appointment_id {
        let appointment = get_appointment(conn, appointment_id)?;
        if appointment.patient_id != new.patient_id {
            return Err(DatabaseError::Validation(
                "The linked appointment belongs to another patient".into(),
            ));
        }
    }

    let stamp = now();
    let prescription = Prescription {
        id: Uuid::new_v4(),
        patient_id: new.patient_id,
        doctor_id: new.doctor_id,
        appointment_id: new.appointment_id,
        medication: medication.to_string(),
        dosage: dosage.to_string(),
        frequency: frequency.to_string(),
        duration: clean(new.duration.as_deref()),
        instructions: clean(new.instructions.as_deref()),
        status: PrescriptionStatus::Active,
        prescribed_at: stamp,
        updated_at: stamp,
    };

    conn.execute(
        "INSERT INTO prescriptions (id, patient_id, doctor_id, appointment_id, medication, dosage,
         frequency, duration, instructions, status, prescribed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            prescription.id.to_string(),
            prescription.patient_id.to_string(),
            prescription.doctor_id.to_string(),
            prescription.appointment_id.map(|id| id.to_string()),
            prescription.medication,
            prescription.dosage,
            prescription.frequency,
            prescription.duration,
            prescription.instructions,
            prescription.status.as_str(),
            fmt_datetime(&prescription.prescribed_at),
            fmt_datetime(&prescription.updated_at),
        ],
    )?;

    tracing::info!(prescription_id = %prescription.id, "Prescription created");
    Ok(prescription)
}

pub fn get_prescription(conn: &Connection, id: &Uuid) -> Result<Prescription, DatabaseError> {
    conn.query_row(
        &format!("{VIEW_SELECT} WHERE rx.id = ?1"),
        params![id.to_string()],
        row_to_view,
    )
    .optional()?
    .map(|v| v.prescription)
    .ok_or_else(|| DatabaseError::not_found("prescription", id))
}

/// Active → Completed | Discontinued.
pub fn update_prescription_status(
    conn: &Connection,
    id: &Uuid,
    to: PrescriptionStatus,
) -> Result<Prescription, DatabaseError> {
    let current = get_prescription(conn, id)?.status;
    let invalid = || DatabaseError::InvalidTransition {
        entity: "prescription",
        from: current.label().into(),
        to: to.label().into(),
    };
    if !current.can_transition_to(&to) {
        return Err(invalid());
    }

    let affected = conn.execute(
        "UPDATE prescriptions SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![id.to_string(), current.as_str(), to.as_str(), fmt_datetime(&now())],
    )?;
    if affected == 0 {
        return Err(invalid());
    }
    get_prescription(conn, id)
}

/// A patient's prescriptions, active ones first, then newest.
pub fn list_prescriptions_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<PrescriptionView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE rx.patient_id = ?1
         ORDER BY rx.status != 'active', rx.prescribed_at DESC"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string()], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Ward-wide list of active prescriptions for the nurse view.
pub fn list_active_prescriptions(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<PrescriptionView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE rx.status = 'active'
         ORDER BY p.last_name, p.first_name, rx.prescribed_at DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_view(row: &rusqlite::Row) -> Result<PrescriptionView, rusqlite::Error> {
    Ok(PrescriptionView {
        prescription: Prescription {
            id: uuid_col(row, 0)?,
            patient_id: uuid_col(row, 1)?,
            doctor_id: uuid_col(row, 2)?,
            appointment_id: opt_uuid_col(row, 3)?,
            medication: row.get(4)?,
            dosage: row.get(5)?,
            frequency: row.get(6)?,
            duration: row.get(7)?,
            instructions: row.get(8)?,
            status: row.get(9)?,
            prescribed_at: datetime_col(row, 10)?,
            updated_at: datetime_col(row, 11)?,
        },
        patient_name: row.get(12)?,
        hospital_number: row.get(13)?,
        doctor_name: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;
    use crate::models::StaffRole;

    fn amoxil(patient: Uuid, doctor: Uuid) -> NewPrescription {
        NewPrescription {
            patient_id: patient,
            doctor_id: doctor,
            appointment_id: None,
            medication: "Amoxicillin".into(),
            dosage: "500 mg".into(),
            frequency: "8 hourly".into(),
            duration: Some("7 days".into()),
            instructions: Some("".into()),
        }
    }

    #[test]
    fn create_and_list() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi").id;
        let doctor = make_staff(&conn, "doc", StaffRole::Doctor);

        let rx = create_prescription(&conn, &amoxil(patient, doctor)).unwrap();
        assert_eq!(rx.status, PrescriptionStatus::Active);
        assert_eq!(rx.instructions, None);

        let list = list_prescriptions_for_patient(&conn, &patient).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].doctor_name, "doc test");
        assert_eq!(list_active_prescriptions(&conn, 10).unwrap().len(), 1);
    }

    #[test]
    fn missing_fields_rejected() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi").id;
        let doctor = make_staff(&conn, "doc", StaffRole::Doctor);
        let mut new = amoxil(patient, doctor);
        new.dosage = "  ".into();
        assert!(matches!(
            create_prescription(&conn, &new),
            Err(DatabaseError::Validation(_))
        ));
    }

    #[test]
    fn status_changes_once() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi").id;
        let doctor = make_staff(&conn, "doc", StaffRole::Doctor);
        let rx = create_prescription(&conn, &amoxil(patient, doctor)).unwrap();

        let stopped =
            update_prescription_status(&conn, &rx.id, PrescriptionStatus::Discontinued).unwrap();
        assert_eq!(stopped.status, PrescriptionStatus::Discontinued);
        assert!(list_active_prescriptions(&conn, 10).unwrap().is_empty());

        let err = update_prescription_status(&conn, &rx.id, PrescriptionStatus::Completed).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidTransition { .. }));
    }

    #[test]
    fn appointment_must_match_patient() {
        let conn = test_db();
        let patient = make_patient(&conn, "Ada", "Obi").id;
        let doctor = make_staff(&conn, "doc", StaffRole::Doctor);
        let mut new = amoxil(patient, doctor);
        new.appointment_id = Some(Uuid::new_v4());
        assert!(matches!(
            create_prescription(&conn, &new),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
