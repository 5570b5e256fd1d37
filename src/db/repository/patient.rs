use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{clean, date_col, immediate_tx, datetime_col, fmt_date, fmt_datetime, now, opt_uuid_col, uuid_col};
use crate::db::DatabaseError;
use crate::db::DATE_FORMAT;
use crate::models::{Gender, Patient, PatientDetails, PatientSummary, BLOOD_GROUPS, GENOTYPES};

/// Rows per page on the patient list.
pub const PATIENT_PAGE_SIZE: i64 = 20;

/// Minimum query length for the live search box.
pub const MIN_SEARCH_LEN: usize = 2;

const PATIENT_COLUMNS: &str = "id, hospital_number, first_name, last_name, date_of_birth, gender,
     phone, address, blood_group, genotype, allergies, emergency_contact_name,
     emergency_contact_phone, registered_by, created_at, updated_at";

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{5,19}$").unwrap());

/// Parsed and normalised form of `PatientDetails`.
struct ValidDetails {
    first_name: String,
    last_name: String,
    date_of_birth: NaiveDate,
    gender: Gender,
    phone: Option<String>,
    address: Option<String>,
    blood_group: Option<String>,
    genotype: Option<String>,
    allergies: Option<String>,
    emergency_contact_name: Option<String>,
    emergency_contact_phone: Option<String>,
}

fn validate(details: &PatientDetails, today: NaiveDate) -> Result<ValidDetails, DatabaseError> {
    let first_name = details.first_name.trim();
    let last_name = details.last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(DatabaseError::Validation("First and last name are required".into()));
    }

    let date_of_birth = NaiveDate::parse_from_str(details.date_of_birth.trim(), DATE_FORMAT)
        .map_err(|_| DatabaseError::Validation("Date of birth must be YYYY-MM-DD".into()))?;
    if date_of_birth > today {
        return Err(DatabaseError::Validation("Date of birth cannot be in the future".into()));
    }
    if today.year() - date_of_birth.year() > 130 {
        return Err(DatabaseError::Validation("Date of birth is implausibly old".into()));
    }

    let gender: Gender = details
        .gender
        .trim()
        .parse()
        .map_err(|_| DatabaseError::Validation("Select a gender".into()))?;

    let phone = clean(details.phone.as_deref());
    let emergency_contact_phone = clean(details.emergency_contact_phone.as_deref());
    for number in [&phone, &emergency_contact_phone].into_iter().flatten() {
        if !PHONE_PATTERN.is_match(number) {
            return Err(DatabaseError::Validation(format!("'{number}' is not a valid phone number")));
        }
    }

    let blood_group = clean(details.blood_group.as_deref()).map(|g| g.to_uppercase());
    if let Some(group) = &blood_group {
        if !BLOOD_GROUPS.contains(&group.as_str()) {
            return Err(DatabaseError::Validation(format!("Unknown blood group '{group}'")));
        }
    }

    let genotype = clean(details.genotype.as_deref()).map(|g| g.to_uppercase());
    if let Some(g) = &genotype {
        if !GENOTYPES.contains(&g.as_str()) {
            return Err(DatabaseError::Validation(format!("Unknown genotype '{g}'")));
        }
    }

    Ok(ValidDetails {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        date_of_birth,
        gender,
        phone,
        address: clean(details.address.as_deref()),
        blood_group,
        genotype,
        allergies: clean(details.allergies.as_deref()),
        emergency_contact_name: clean(details.emergency_contact_name.as_deref()),
        emergency_contact_phone,
    })
}

/// Next hospital number for the given year: `HN-<year>-<00001..>`.
fn next_hospital_number(conn: &Connection, year: i32) -> Result<String, DatabaseError> {
    let prefix = format!("HN-{year}-");
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(substr(hospital_number, ?2) AS INTEGER))
         FROM patients WHERE hospital_number LIKE ?1",
        params![format!("{prefix}%"), prefix.len() as i64 + 1],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}{:05}", last.unwrap_or(0) + 1))
}

/// Register a new patient and allocate the hospital number atomically.
pub fn register_patient(
    conn: &Connection,
    details: &PatientDetails,
    registered_by: Option<Uuid>,
) -> Result<Patient, DatabaseError> {
    let stamp = now();
    let valid = validate(details, stamp.date())?;

    let tx = immediate_tx(conn)?;
    let hospital_number = next_hospital_number(&tx, stamp.year())?;
    let patient = Patient {
        id: Uuid::new_v4(),
        hospital_number,
        first_name: valid.first_name,
        last_name: valid.last_name,
        date_of_birth: valid.date_of_birth,
        gender: valid.gender,
        phone: valid.phone,
        address: valid.address,
        blood_group: valid.blood_group,
        genotype: valid.genotype,
        allergies: valid.allergies,
        emergency_contact_name: valid.emergency_contact_name,
        emergency_contact_phone: valid.emergency_contact_phone,
        registered_by,
        created_at: stamp,
        updated_at: stamp,
    };

    tx.execute(
        "INSERT INTO patients (id, hospital_number, first_name, last_name, date_of_birth, gender,
         phone, address, blood_group, genotype, allergies, emergency_contact_name,
         emergency_contact_phone, registered_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            patient.id.to_string(),
            patient.hospital_number,
            patient.first_name,
            patient.last_name,
            fmt_date(&patient.date_of_birth),
            patient.gender.as_str(),
            patient.phone,
            patient.address,
            patient.blood_group,
            patient.genotype,
            patient.allergies,
            patient.emergency_contact_name,
            patient.emergency_contact_phone,
            patient.registered_by.map(|id| id.to_string()),
            fmt_datetime(&patient.created_at),
            fmt_datetime(&patient.updated_at),
        ],
    )?;
    tx.commit()?;

    tracing::info!(hospital_number = %patient.hospital_number, "Patient registered");
    Ok(patient)
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Patient, DatabaseError> {
    conn.query_row(
        &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1"),
        params![id.to_string()],
        row_to_patient,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("patient", id))
}

/// Overwrite the demographic fields of a patient. The hospital number never changes.
pub fn update_patient(
    conn: &Connection,
    id: &Uuid,
    details: &PatientDetails,
) -> Result<Patient, DatabaseError> {
    let stamp = now();
    let valid = validate(details, stamp.date())?;
    let affected = conn.execute(
        "UPDATE patients SET first_name = ?2, last_name = ?3, date_of_birth = ?4, gender = ?5,
         phone = ?6, address = ?7, blood_group = ?8, genotype = ?9, allergies = ?10,
         emergency_contact_name = ?11, emergency_contact_phone = ?12, updated_at = ?13
         WHERE id = ?1",
        params![
            id.to_string(),
            valid.first_name,
            valid.last_name,
            fmt_date(&valid.date_of_birth),
            valid.gender.as_str(),
            valid.phone,
            valid.address,
            valid.blood_group,
            valid.genotype,
            valid.allergies,
            valid.emergency_contact_name,
            valid.emergency_contact_phone,
            fmt_datetime(&stamp),
        ],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("patient", id));
    }
    get_patient(conn, id)
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

const SEARCH_PREDICATE: &str = "(first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\'
     OR (first_name || ' ' || last_name) LIKE ?1 ESCAPE '\\'
     OR hospital_number LIKE ?1 ESCAPE '\\' OR phone LIKE ?1 ESCAPE '\\')";

/// One page of patients, newest registration first. `page` is 1-based.
pub fn list_patients(
    conn: &Connection,
    search: Option<&str>,
    page: i64,
) -> Result<Vec<Patient>, DatabaseError> {
    let offset = (page.max(1) - 1) * PATIENT_PAGE_SIZE;
    match search.map(str::trim).filter(|s| !s.is_empty()) {
        Some(q) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM patients WHERE {SEARCH_PREDICATE}
                 ORDER BY created_at DESC, hospital_number DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(
                params![like_pattern(q), PATIENT_PAGE_SIZE, offset],
                row_to_patient,
            )?;
            rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PATIENT_COLUMNS} FROM patients
                 ORDER BY created_at DESC, hospital_number DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![PATIENT_PAGE_SIZE, offset], row_to_patient)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
        }
    }
}

/// Number of patients matching the optional search.
pub fn count_patients(conn: &Connection, search: Option<&str>) -> Result<i64, DatabaseError> {
    let count = match search.map(str::trim).filter(|s| !s.is_empty()) {
        Some(q) => conn.query_row(
            &format!("SELECT COUNT(*) FROM patients WHERE {SEARCH_PREDICATE}"),
            params![like_pattern(q)],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?,
    };
    Ok(count)
}

/// Live-search results for the AJAX box. Short queries return nothing.
pub fn search_patients(
    conn: &Connection,
    query: &str,
    limit: i64,
) -> Result<Vec<PatientSummary>, DatabaseError> {
    if query.trim().chars().count() < MIN_SEARCH_LEN {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT id, hospital_number, first_name, last_name, date_of_birth, gender
         FROM patients WHERE {SEARCH_PREDICATE}
         ORDER BY last_name, first_name LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![like_pattern(query), limit.clamp(1, 50)], |row| {
        let first: String = row.get(2)?;
        let last: String = row.get(3)?;
        Ok(PatientSummary {
            id: uuid_col(row, 0)?,
            hospital_number: row.get(1)?,
            name: format!("{first} {last}"),
            date_of_birth: date_col(row, 4)?,
            gender: row.get(5)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

fn row_to_patient(row: &rusqlite::Row) -> Result<Patient, rusqlite::Error> {
    Ok(Patient {
        id: uuid_col(row, 0)?,
        hospital_number: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_birth: date_col(row, 4)?,
        gender: row.get(5)?,
        phone: row.get(6)?,
        address: row.get(7)?,
        blood_group: row.get(8)?,
        genotype: row.get(9)?,
        allergies: row.get(10)?,
        emergency_contact_name: row.get(11)?,
        emergency_contact_phone: row.get(12)?,
        registered_by: opt_uuid_col(row, 13)?,
        created_at: datetime_col(row, 14)?,
        updated_at: datetime_col(row, 15)?,
    })
}
