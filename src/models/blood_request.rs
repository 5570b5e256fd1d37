use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BloodRequestStatus, BloodUrgency};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloodRequest {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub blood_group: String,
    pub units: i64,
    pub urgency: BloodUrgency,
    pub indication: String,
    pub status: BloodRequestStatus,
    pub handled_by: Option<Uuid>,
    pub lab_notes: Option<String>,
    pub requested_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct BloodRequestView {
    pub request: BloodRequest,
    pub patient_name: String,
    pub hospital_number: String,
    pub doctor_name: String,
}

#[derive(Debug, Clone)]
pub struct NewBloodRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub blood_group: String,
    pub units: i64,
    pub urgency: BloodUrgency,
    pub indication: String,
}
