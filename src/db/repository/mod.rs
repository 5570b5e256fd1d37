//! Repository layer: entity-scoped database operations.
//!
//! One sub-module per table family. Every function takes a borrowed
//! `Connection` and uses prepared, parameterised statements.
//! All public functions are re-exported here.

mod appointment;
mod audit;
mod blood_request;
mod dashboard;
mod lab;
mod patient;
mod prescription;
mod staff;
mod vitals;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use uuid::Uuid;

use super::sqlite::{DATETIME_FORMAT, DATE_FORMAT};

pub use appointment::*;
pub use audit::*;
pub use blood_request::*;
pub use dashboard::*;
pub use lab::*;
pub use patient::*;
pub use prescription::*;
pub use staff::*;
pub use vitals::*;

// ═══════════════════════════════════════════════════════════
// Column helpers shared by the sub-modules
// ═══════════════════════════════════════════════════════════

/// Current clinic-local time, truncated to whole seconds.
pub(crate) fn now() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub(crate) fn fmt_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn fmt_date(d: &NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn uuid_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn datetime_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let s: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_datetime_col(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDateTime>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn date_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

/// Start a write transaction that takes the SQLite write lock up front,
/// so read-then-write sequences inside it cannot interleave.
pub(crate) fn immediate_tx(conn: &rusqlite::Connection) -> rusqlite::Result<rusqlite::Transaction<'_>> {
    rusqlite::Transaction::new_unchecked(conn, rusqlite::TransactionBehavior::Immediate)
}

/// Trim an optional form field; blank becomes `None`.
pub(crate) fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Half-open `[day 00:00:00, next day 00:00:00)` bounds as stored strings.
pub(crate) fn day_bounds(day: NaiveDate) -> (String, String) {
    let start = day.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end = day
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(start);
    (fmt_datetime(&start), fmt_datetime(&end))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by repository tests.

    use rusqlite::Connection;
    use uuid::Uuid;

    use crate::db::sqlite::open_memory_database;
    use crate::models::*;

    pub fn test_db() -> Connection {
        open_memory_database().unwrap()
    }

    pub fn make_staff(conn: &Connection, username: &str, role: StaffRole) -> Uuid {
        super::insert_staff(
            conn,
            &NewStaff {
                username: username.into(),
                full_name: format!("{username} test"),
                role,
                password_hash: "pbkdf2-sha256$1$AA$AA".into(),
            },
        )
        .unwrap()
        .id
    }

    pub fn make_patient(conn: &Connection, first: &str, last: &str) -> Patient {
        super::register_patient(
            conn,
            &PatientDetails {
                first_name: first.into(),
                last_name: last.into(),
                date_of_birth: "1985-03-12".into(),
                gender: "female".into(),
                phone: Some("08031234567".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_blank_is_none() {
        assert_eq!(clean(Some("   ")), None);
        assert_eq!(clean(None), None);
        assert_eq!(clean(Some("  x ")), Some("x".to_string()));
    }

    #[test]
    fn day_bounds_cover_one_day() {
        let (start, end) = day_bounds(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());
        assert_eq!(start, "2024-02-28 00:00:00");
        assert_eq!(end, "2024-02-29 00:00:00");
    }

    #[test]
    fn now_has_no_fraction() {
        let n = now();
        assert_eq!(n.and_utc().timestamp_subsec_nanos(), 0);
    }
}
