use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{datetime_col, fmt_datetime, now, opt_datetime_col, uuid_col};
use crate::db::DatabaseError;
use crate::models::{NewStaff, Staff, StaffRole};

const STAFF_COLUMNS: &str =
    "id, username, full_name, role, password_hash, active, last_login_at, created_at";

/// Usernames: 3-32 chars of lowercase letters, digits, dot, dash, underscore.
fn valid_username(username: &str) -> bool {
    let len = username.chars().count();
    (3..=32).contains(&len)
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
}

/// Create a staff account. Usernames are unique, case-insensitively.
pub fn insert_staff(conn: &Connection, new: &NewStaff) -> Result<Staff, DatabaseError> {
    let username = new.username.trim().to_lowercase();
    if !valid_username(&username) {
        return Err(DatabaseError::Validation(
            "Username must be 3-32 characters: letters, digits, '.', '-' or '_'".into(),
        ));
    }
    let full_name = new.full_name.trim();
    if full_name.is_empty() {
        return Err(DatabaseError::Validation("Full name is required".into()));
    }

    if find_staff_by_username(conn, &username)?.is_some() {
        return Err(DatabaseError::ConstraintViolation(format!(
            "username '{username}' is already taken"
        )));
    }

    let staff = Staff {
        id: Uuid::new_v4(),
        username,
        full_name: full_name.to_string(),
        role: new.role,
        password_hash: new.password_hash.clone(),
        active: true,
        last_login_at: None,
        created_at: now(),
    };

    conn.execute(
        "INSERT INTO staff (id, username, full_name, role, password_hash, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            staff.id.to_string(),
            staff.username,
            staff.full_name,
            staff.role.as_str(),
            staff.password_hash,
            fmt_datetime(&staff.created_at),
        ],
    )?;
    Ok(staff)
}

pub fn get_staff(conn: &Connection, id: &Uuid) -> Result<Staff, DatabaseError> {
    conn.query_row(
        &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?1"),
        params![id.to_string()],
        row_to_staff,
    )
    .optional()?
    .ok_or_else(|| DatabaseError::not_found("staff", id))
}

pub fn find_staff_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<Staff>, DatabaseError> {
    let staff = conn
        .query_row(
            &format!("SELECT {STAFF_COLUMNS} FROM staff WHERE username = ?1"),
            params![username.trim()],
            row_to_staff,
        )
        .optional()?;
    Ok(staff)
}

/// All staff, grouped by role then name.
pub fn list_staff(conn: &Connection) -> Result<Vec<Staff>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STAFF_COLUMNS} FROM staff ORDER BY role, full_name"
    ))?;
    let rows = stmt.query_map([], row_to_staff)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

/// Active staff holding a role, by name. Feeds the doctor picker.
pub fn list_staff_by_role(conn: &Connection, role: StaffRole) -> Result<Vec<Staff>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STAFF_COLUMNS} FROM staff WHERE role = ?1 AND active = 1 ORDER BY full_name"
    ))?;
    let rows = stmt.query_map(params![role.as_str()], row_to_staff)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(DatabaseError::from)
}

pub fn update_staff_password(
    conn: &Connection,
    id: &Uuid,
    password_hash: &str,
) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE staff SET password_hash = ?2 WHERE id = ?1",
        params![id.to_string(), password_hash],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("staff", id));
    }
    Ok(())
}

pub fn set_staff_active(conn: &Connection, id: &Uuid, active: bool) -> Result<(), DatabaseError> {
    let affected = conn.execute(
        "UPDATE staff SET active = ?2 WHERE id = ?1",
        params![id.to_string(), active as i32],
    )?;
    if affected == 0 {
        return Err(DatabaseError::not_found("staff", id));
    }
    Ok(())
}

pub fn record_login(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE staff SET last_login_at = ?2 WHERE id = ?1",
        params![id.to_string(), fmt_datetime(&now())],
    )?;
    Ok(())
}

pub fn count_active_staff(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row("SELECT COUNT(*) FROM staff WHERE active = 1", [], |row| row.get(0))?;
    Ok(count)
}

fn row_to_staff(row: &rusqlite::Row) -> Result<Staff, rusqlite::Error> {
    Ok(Staff {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        role: row.get(3)?,
        password_hash: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        last_login_at: opt_datetime_col(row, 6)?,
        created_at: datetime_col(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    fn new_staff(username: &str, role: StaffRole) -> NewStaff {
        NewStaff {
            username: username.into(),
            full_name: "Grace Hopper".into(),
            role,
            password_hash: "hash".into(),
        }
    }

    #[test]
    fn insert_and_get_staff() {
        let conn = test_db();
        let created = insert_staff(&conn, &new_staff("ghopper", StaffRole::Doctor)).unwrap();
        let fetched = get_staff(&conn, &created.id).unwrap();
        assert_eq!(fetched.username, "ghopper");
        assert_eq!(fetched.role, StaffRole::Doctor);
        assert!(fetched.active);
        assert!(fetched.last_login_at.is_none());
    }

    #[test]
    fn username_is_normalised_and_unique() {
        let conn = test_db();
        insert_staff(&conn, &new_staff("  NurseJoy ", StaffRole::Nurse)).unwrap();
        assert!(find_staff_by_username(&conn, "nursejoy").unwrap().is_some());

        let err = insert_staff(&conn, &new_staff("nursejoy", StaffRole::Nurse)).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn invalid_username_rejected() {
        let conn = test_db();
        let err = insert_staff(&conn, &new_staff("a b", StaffRole::Nurse)).unwrap_err();
        assert!(matches!(err, DatabaseError::Validation(_)));
    }

    #[test]
    fn list_by_role_skips_inactive() {
        let conn = test_db();
        let d1 = make_staff(&conn, "doc1", StaffRole::Doctor);
        make_staff(&conn, "doc2", StaffRole::Doctor);
        make_staff(&conn, "nurse1", StaffRole::Nurse);
        set_staff_active(&conn, &d1, false).unwrap();

        let doctors = list_staff_by_role(&conn, StaffRole::Doctor).unwrap();
        assert_eq!(doctors.len(), 1);
        assert_eq!(doctors[0].username, "doc2");
        assert_eq!(count_active_staff(&conn).unwrap(), 2);
    }

    #[test]
    fn password_update_and_login_stamp() {
        let conn = test_db();
        let id = make_staff(&conn, "lab1", StaffRole::LabScientist);
        update_staff_password(&conn, &id, "new-hash").unwrap();
        record_login(&conn, &id).unwrap();
        let staff = get_staff(&conn, &id).unwrap();
        assert_eq!(staff.password_hash, "new-hash");
        assert!(staff.last_login_at.is_some());
    }

    #[test]
    fn missing_staff_is_not_found() {
        let conn = test_db();
        let err = get_staff(&conn, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        assert!(set_staff_active(&conn, &Uuid::new_v4(), false).is_err());
    }
}
