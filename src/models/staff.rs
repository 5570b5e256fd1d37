use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::StaffRole;

/// A clinic employee who can sign in. The password hash never leaves the
/// repository layer except for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: StaffRole,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub active: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// Fields needed to create a staff account.
#[derive(Debug, Clone)]
pub struct NewStaff {
    pub username: String,
    pub full_name: String,
    pub role: StaffRole,
    pub password_hash: String,
}
