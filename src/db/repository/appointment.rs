use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    clean, datetime_col, day_bounds, fmt_datetime, get_patient, get_staff, immediate_tx, now,
    opt_uuid_col, uuid_col,
};
use crate::db::DatabaseError;
use crate::models::{Appointment, AppointmentStatus, AppointmentView, NewAppointment, StaffRole};

const VIEW_SELECT: &str = "SELECT a.id, a.patient_id, a.doctor_id, a.scheduled_at, a.reason, a.status,
        a.consultation_notes, a.cancel_reason, a.created_by, a.created_at, a.updated_at,
        p.first_name || ' ' || p.last_name, p.hospital_number, s.full_name
     FROM appointments a
     JOIN patients p ON p.id = a.patient_id
     JOIN staff s ON s.id = a.doctor_id";

/// Book a patient with a doctor.
///
/// The slot must not be in the past, the doctor must be an active doctor,
/// and the doctor cannot already hold a non-cancelled appointment at the
/// same start time.
pub fn schedule_appointment(
    conn: &Connection,
    new: &NewAppointment,
) -> Result<Appointment, DatabaseError> {
    let reason = new.reason.trim();
    if reason.is_empty() {
        return Err(DatabaseError::Validation("A reason for the visit is required".into()));
    }
    let stamp = now();
    if new.scheduled_at < stamp {
        return Err(DatabaseError::Validation("Appointments cannot be booked in the past".into()));
    }

    get_patient(conn, &new.patient_id)?;
    let doctor = get_staff(conn, &new.doctor_id)?;
    if doctor.role != StaffRole::Doctor || !doctor.active {
        return Err(DatabaseError::Validation(format!(
            "{} is not an active doctor",
            doctor.full_name
        )));
    }

    let tx = immediate_tx(conn)?;
    let clash: i64 = tx.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE doctor_id = ?1 AND scheduled_at = ?2 AND status != 'cancelled'",
        params![new.doctor_id.to_string(), fmt_datetime(&new.scheduled_at)],
        |row| row.get(0),
    )?;
    if clash > 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "{} already has an appointment at {}",
            doctor.full_name,
            new.scheduled_at.format("%Y-%m-%d %H:%M")
        )));
    }

    let appointment = Appointment {
        id: Uuid::new_v4(),
        patient_id: new.patient_id,
        doctor_id: new.doctor_id,
        scheduled_at: new.scheduled_at,
        reason: reason.to_string(),
        status: AppointmentStatus::Scheduled,
        consultation_notes: None,
        cancel_reason: None,
        created_by: Some(new.created_by),
        created_at: stamp,
        updated_at: stamp,
    };
    tx.execute(
        "INSERT INTO appointments (id, patient_id, doctor_id, scheduled_at, reason, status,
         created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            appointment.id.to_string(),
            appointment.patient_id.to_string(),
            appointment.doctor_id.to_string(),
            fmt_datetime(&appointment.scheduled_at),
            appointment.reason,
            appointment.status.as_str(),
            new.created_by.to_string(),
            fmt_datetime(&appointment.created_at),
            fmt_datetime(&appointment.updated_at),
        ],
    )?;
    tx.commit()?;

    tracing::info!(appointment_id = %appointment.id, "Appointment scheduled");
    Ok(appointment)
}

pub fn get_appointment(conn: &Connection, id: &Uuid) -> Result<Appointment, DatabaseError> {
    get_appointment_view(conn, id).map(|v| v.appointment)
}

pub fn get_appointment_view(conn: &Connection, id: &Uuid) -> Result<AppointmentView, DatabaseError> {
    conn.query_row(
        &format!("{VIEW_SELECT} WHERE a.id = ?1"),
        params![id.to_string()],
        row_to_view,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("appointment", id))
}

/// Appointments on a day, optionally filtered by status, in time order.
pub fn list_appointments_on(
    conn: &Connection,
    day: NaiveDate,
    status: Option<AppointmentStatus>,
) -> Result<Vec<AppointmentView>, DatabaseError> {
    let (start, end) = day_bounds(day);
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT}
         WHERE a.scheduled_at >= ?1 AND a.scheduled_at < ?2 AND (?3 IS NULL OR a.status = ?3)
         ORDER BY a.scheduled_at, s.full_name"
    ))?;
    let rows = stmt.query_map(params![start, end, status.map(|s| s.as_str())], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// A doctor's list for one day.
pub fn list_doctor_appointments_on(
    conn: &Connection,
    doctor_id: &Uuid,
    day: NaiveDate,
) -> Result<Vec<AppointmentView>, DatabaseError> {
    let (start, end) = day_bounds(day);
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT}
         WHERE a.doctor_id = ?1 AND a.scheduled_at >= ?2 AND a.scheduled_at < ?3
         ORDER BY a.scheduled_at"
    ))?;
    let rows = stmt.query_map(params![doctor_id.to_string(), start, end], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Full appointment history of a patient, newest first.
pub fn list_patient_appointments(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<AppointmentView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE a.patient_id = ?1 ORDER BY a.scheduled_at DESC"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string()], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn count_appointments_on(
    conn: &Connection,
    day: NaiveDate,
    status: Option<AppointmentStatus>,
) -> Result<i64, DatabaseError> {
    let (start, end) = day_bounds(day);
    let count = conn.query_row(
        "SELECT COUNT(*) FROM appointments
         WHERE scheduled_at >= ?1 AND scheduled_at < ?2 AND (?3 IS NULL OR status = ?3)",
        params![start, end, status.map(|s| s.as_str())],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Scheduled → Confirmed (patient checked in).
pub fn confirm_appointment(conn: &Connection, id: &Uuid) -> Result<Appointment, DatabaseError> {
    transition(conn, id, AppointmentStatus::Confirmed, None, None)
}

/// Confirmed → Completed, storing the consultation notes.
pub fn complete_appointment(
    conn: &Connection,
    id: &Uuid,
    consultation_notes: &str,
) -> Result<Appointment, DatabaseError> {
    let notes = clean(Some(consultation_notes))
        .ok_or_else(|| DatabaseError::Validation("Consultation notes are required".into()))?;
    transition(conn, id, AppointmentStatus::Completed, Some(&notes), None)
}

/// Scheduled | Confirmed → Cancelled.
pub fn cancel_appointment(
    conn: &Connection,
    id: &Uuid,
    reason: Option<&str>,
) -> Result<Appointment, DatabaseError> {
    let reason = clean(reason);
    transition(conn, id, AppointmentStatus::Cancelled, None, reason.as_deref())
}

fn transition(
    conn: &Connection,
    id: &Uuid,
    to: AppointmentStatus,
    consultation_notes: Option<&str>,
    cancel_reason: Option<&str>,
) -> Result<Appointment, DatabaseError> {
    let current = get_appointment(conn, id)?;
    if !current.status.can_transition_to(&to) {
        return Err(DatabaseError::InvalidTransition {
            entity: "appointment",
            from: current.status.label().into(),
            to: to.label().into(),
        });
    }

    // Guard on the status we read so a concurrent change is not overwritten.
    let affected = conn.execute(
        "UPDATE appointments
         SET status = ?3,
             consultation_notes = COALESCE(?4, consultation_notes),
             cancel_reason = COALESCE(?5, cancel_reason),
             updated_at = ?6
         WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            current.status.as_str(),
            to.as_str(),
            consultation_notes,
            cancel_reason,
            fmt_datetime(&now()),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::InvalidTransition {
            entity: "appointment",
            from: current.status.label().into(),
            to: to.label().into(),
        });
    }

    tracing::info!(appointment_id = %id, status = to.as_str(), "Appointment status changed");
    get_appointment(conn, id)
}

fn row_to_view(row: &rusqlite::Row) -> Result<AppointmentView, rusqlite::Error> {
    Ok(AppointmentView {
        appointment: Appointment {
            id: uuid_col(row, 0)?,
            patient_id: uuid_col(row, 1)?,
            doctor_id: uuid_col(row, 2)?,
            scheduled_at: datetime_col(row, 3)?,
            reason: row.get(4)?,
            status: row.get(5)?,
            consultation_notes: row.get(6)?,
            cancel_reason: row.get(7)?,
            created_by: opt_uuid_col(row, 8)?,
            created_at: datetime_col(row, 9)?,
            updated_at: datetime_col(row, 10)?,
        },
        patient_name: row.get(11)?,
        hospital_number: row.get(12)?,
        doctor_name: row.get(13)?,
    })
}
