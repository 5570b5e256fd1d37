use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ResultFlag, TestPriority, TestRequestStatus};

/// Catalog entry a doctor can order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTest {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub sample_type: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRequest {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub priority: TestPriority,
    pub clinical_notes: Option<String>,
    pub status: TestRequestStatus,
    pub requested_at: NaiveDateTime,
    pub sample_collected_at: Option<NaiveDateTime>,
    pub collected_by: Option<Uuid>,
    pub completed_at: Option<NaiveDateTime>,
    pub completed_by: Option<Uuid>,
}

/// One ordered test within a request, with its result once entered.
#[derive(Debug, Clone, Serialize)]
pub struct TestRequestItem {
    pub id: Uuid,
    pub request_id: Uuid,
    pub lab_test_id: Uuid,
    pub test_code: String,
    pub test_name: String,
    pub sample_type: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
    pub result_value: Option<String>,
    pub result_flag: Option<ResultFlag>,
    pub result_comment: Option<String>,
    pub resulted_at: Option<NaiveDateTime>,
}

impl TestRequestItem {
    pub fn has_result(&self) -> bool {
        self.result_value
            .as_deref()
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Request header joined with names, plus its items.
#[derive(Debug, Clone, Serialize)]
pub struct TestRequestDetail {
    pub request: TestRequest,
    pub patient_name: String,
    pub hospital_number: String,
    pub doctor_name: String,
    pub items: Vec<TestRequestItem>,
}

/// Queue row for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct TestRequestSummary {
    pub request: TestRequest,
    pub patient_name: String,
    pub hospital_number: String,
    pub doctor_name: String,
    pub test_names: String,
}

#[derive(Debug, Clone)]
pub struct NewTestRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub priority: TestPriority,
    pub clinical_notes: Option<String>,
    pub lab_test_ids: Vec<Uuid>,
}

/// Result entry for one item, as submitted by the lab.
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub item_id: Uuid,
    pub value: String,
    pub flag: ResultFlag,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLabTest {
    pub code: String,
    pub name: String,
    pub sample_type: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
}
