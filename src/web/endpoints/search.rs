//! JSON patient search behind the live search box.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repository as repo;
use crate::models::{Gender, PatientSummary};
use crate::web::error::WebError;
use crate::web::types::{StaffContext, WebContext};

const SEARCH_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub hospital_number: String,
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    /// Patient page for the caller's role.
    pub url: String,
}

fn hit(summary: PatientSummary, prefix: &str) -> SearchHit {
    SearchHit {
        url: format!("{prefix}{}", summary.id),
        id: summary.id,
        hospital_number: summary.hospital_number,
        name: summary.name,
        date_of_birth: summary.date_of_birth,
        gender: summary.gender,
    }
}

/// `GET /api/patients/search?q=`
pub async fn patients(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, WebError> {
    let conn = ctx.core.open_db()?;
    let prefix = staff.role().patient_link_prefix();
    let hits = repo::search_patients(&conn, &query.q, SEARCH_LIMIT)?
        .into_iter()
        .map(|s| hit(s, prefix))
        .collect();
    Ok(Json(hits))
}
