use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{clean, datetime_col, fmt_datetime, get_patient, now, opt_uuid_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::{
    BloodRequest, BloodRequestStatus, BloodRequestView, NewBloodRequest, BLOOD_GROUPS,
};

const VIEW_SELECT: &str = "SELECT b.id, b.patient_id, b.doctor_id, b.blood_group, b.units,
        b.urgency, b.indication, b.status, b.handled_by, b.lab_notes, b.requested_at, b.updated_at,
        p.first_name || ' ' || p.last_name, p.hospital_number, s.full_name
     FROM blood_requests b
     JOIN patients p ON p.id = b.patient_id
     JOIN staff s ON s.id = b.doctor_id";

pub const MAX_BLOOD_UNITS: i64 = 10;

pub fn create_blood_request(
    conn: &Connection,
    new: &NewBloodRequest,
) -> Result<BloodRequest, DatabaseError> {
    let group = new.blood_group.trim().to_uppercase();
    if !BLOOD_GROUPS.contains(&group.as_str()) {
        return Err(DatabaseError::Validation(format!("Unknown blood group '{group}'")));
    }
    if !(1..=MAX_BLOOD_UNITS).contains(&new.units) {
        return Err(DatabaseError::Validation(format!(
            "Units must be between 1 and {MAX_BLOOD_UNITS}"
        )));
    }
    let indication = new.indication.trim();
    if indication.is_empty() {
        return Err(DatabaseError::Validation("An indication is required".into()));
    }
    get_patient(conn, &new.patient_id)?;

    let stamp = now();
    let request = BloodRequest {
        id: Uuid::new_v4(),
        patient_id: new.patient_id,
        doctor_id: new.doctor_id,
        blood_group: group,
        units: new.units,
        urgency: new.urgency,
        indication: indication.to_string(),
        status: BloodRequestStatus::Pending,
        handled_by: None,
        lab_notes: None,
        requested_at: stamp,
        updated_at: stamp,
    };

    conn.execute(
        "INSERT INTO blood_requests (id, patient_id, doctor_id, blood_group, units, urgency,
         indication, status, requested_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            request.id.to_string(),
            request.patient_id.to_string(),
            request.doctor_id.to_string(),
            request.blood_group,
            request.units,
            request.urgency.as_str(),
            request.indication,
            request.status.as_str(),
            fmt_datetime(&request.requested_at),
            fmt_datetime(&request.updated_at),
        ],
    )?;

    tracing::info!(
        blood_request_id = %request.id,
        urgency = request.urgency.as_str(),
        "Blood request created"
    );
    Ok(request)
}

pub fn get_blood_request(conn: &Connection, id: &Uuid) -> Result<BloodRequestView, DatabaseError> {
    conn.query_row(
        &format!("{VIEW_SELECT} WHERE b.id = ?1"),
        params![id.to_string()],
        row_to_view,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("blood_request", id))
}

/// Lab-side decision: approve, issue or reject. `handled_by` is the
/// scientist; notes are kept when the new value is blank.
pub fn transition_blood_request(
    conn: &Connection,
    id: &Uuid,
    to: BloodRequestStatus,
    handled_by: &Uuid,
    lab_notes: Option<&str>,
) -> Result<BloodRequest, DatabaseError> {
    let current = get_blood_request(conn, id)?.request.status;
    let invalid = || DatabaseError::InvalidTransition {
        entity: "blood request",
        from: current.label().into(),
        to: to.label().into(),
    };
    if !current.can_transition_to(&to) {
        return Err(invalid());
    }

    let affected = conn.execute(
        "UPDATE blood_requests
         SET status = ?3, handled_by = ?4, lab_notes = COALESCE(?5, lab_notes), updated_at = ?6
         WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            current.as_str(),
            to.as_str(),
            handled_by.to_string(),
            clean(lab_notes),
            fmt_datetime(&now()),
        ],
    )?;
    if affected == 0 {
        return Err(invalid());
    }

    tracing::info!(blood_request_id = %id, status = to.as_str(), "Blood request status changed");
    get_blood_request(conn, id).map(|v| v.request)
}

/// Doctor withdraws a request that has not been issued yet.
pub fn cancel_blood_request(conn: &Connection, id: &Uuid) -> Result<BloodRequest, DatabaseError> {
    let current = get_blood_request(conn, id)?.request.status;
    let to = BloodRequestStatus::Cancelled;
    let invalid = || DatabaseError::InvalidTransition {
        entity: "blood request",
        from: current.label().into(),
        to: to.label().into(),
    };
    if !current.can_transition_to(&to) {
        return Err(invalid());
    }

    let affected = conn.execute(
        "UPDATE blood_requests SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        params![id.to_string(), current.as_str(), to.as_str(), fmt_datetime(&now())],
    )?;
    if affected == 0 {
        return Err(invalid());
    }
    get_blood_request(conn, id).map(|v| v.request)
}

/// Requests in one status. Emergencies first, then oldest first.
pub fn list_blood_requests_by_status(
    conn: &Connection,
    status: BloodRequestStatus,
    limit: u32,
) -> Result<Vec<BloodRequestView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE b.status = ?1
         ORDER BY CASE b.urgency WHEN 'emergency' THEN 0 WHEN 'urgent' THEN 1 ELSE 2 END,
                  b.requested_at
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![status.as_str(), limit], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn list_blood_requests_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<BloodRequestView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE b.patient_id = ?1 ORDER BY b.requested_at DESC"
    ))?;
    let rows = stmt.query_map(params![patient_id.to_string()], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// A doctor's requests that are still pending or approved.
pub fn list_open_blood_requests_for_doctor(
    conn: &Connection,
    doctor_id: &Uuid,
) -> Result<Vec<BloodRequestView>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{VIEW_SELECT} WHERE b.doctor_id = ?1 AND b.status IN ('pending', 'approved')
         ORDER BY b.requested_at DESC"
    ))?;
    let rows = stmt.query_map(params![doctor_id.to_string()], row_to_view)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_view(row: &rusqlite::Row) -> Result<BloodRequestView, rusqlite::Error> {
    Ok(BloodRequestView {
        request: BloodRequest {
            id: uuid_col(row, 0)?,
            patient_id: uuid_col(row, 1)?,
            doctor_id: uuid_col(row, 2)?,
            blood_group: row.get(3)?,
            units: row.get(4)?,
            urgency: row.get(5)?,
            indication: row.get(6)?,
            status: row.get(7)?,
            handled_by: opt_uuid_col(row, 8)?,
            lab_notes: row.get(9)?,
            requested_at: datetime_col(row, 10)?,
            updated_at: datetime_col(row, 11)?,
        },
        patient_name: row.get(12)?,
        hospital_number: row.get(13)?,
        doctor_name: row.get(14)?,
    })
}
