//! Nurse dashboard: today's queue, vitals capture and the medication list.

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::response::{Html, Response};
use axum::{Extension, Form};
use serde::Deserialize;
use uuid::Uuid;

use super::shared::{appointments_table, prescriptions_table, vitals_table};
use super::{after_action, today};
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::{NewVitals, PrescriptionStatus};
use crate::web::error::WebError;
use crate::web::render::{csrf_input, fmt_datetime, layout, patient_banner, patient_search_box, stat_card, tabs};
use crate::web::types::{StaffContext, WebContext};

/// `GET /nurse`
pub async fn dashboard(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let day = today();
    let conn = ctx.core.open_db()?;
    let queue: Vec<_> = repo::list_appointments_on(&conn, day, None)?
        .into_iter()
        .filter(|a| a.appointment.status.is_open())
        .collect();

    let mut last_taken = Vec::with_capacity(queue.len());
    for a in &queue {
        last_taken.push((a.appointment.patient_id, repo::latest_vitals(&conn, &a.appointment.patient_id)?));
    }
    let vitals_today = repo::count_vitals_on(&conn, day)?;
    let active_rx = repo::list_active_prescriptions(&conn, 500)?.len() as i64;

    let table = appointments_table(&queue, false, |a| {
        let latest = last_taken
            .iter()
            .find(|(pid, _)| *pid == a.appointment.patient_id)
            .and_then(|(_, v)| v.as_ref());
        let (label, class) = match latest {
            Some(v) if v.vitals.recorded_at.date() == day => {
                (format!("Vitals {}", v.vitals.recorded_at.format("%H:%M")), "btn-outline-success")
            }
            Some(v) => (format!("Last {}", fmt_datetime(&v.vitals.recorded_at)), "btn-primary"),
            None => ("Record vitals".to_string(), "btn-primary"),
        };
        format!(
            r#"<a class="btn btn-sm {class}" href="/nurse/patients/{}">{label}</a>"#,
            a.appointment.patient_id
        )
    });

    let cards = [
        stat_card("Patients in queue", queue.len() as i64, "primary"),
        stat_card("Vitals taken today", vitals_today, "success"),
        stat_card("Active prescriptions", active_rx, "info"),
    ]
    .concat();

    let body = format!(
        r#"<div class="row g-3 mb-4">{cards}</div>
{search}
<h2 class="h5">Today's queue</h2>
{table}"#,
        search = patient_search_box(),
    );
    Ok(layout("Nurse", &staff, &body))
}

/// `GET /nurse/patients/:id`: vitals form and history.
pub async fn patient(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let patient = repo::get_patient(&conn, &id)?;
    let history = repo::list_vitals_for_patient(&conn, &id, 50)?;
    let medications: Vec<_> = repo::list_prescriptions_for_patient(&conn, &id)?
        .into_iter()
        .filter(|p| p.prescription.status == PrescriptionStatus::Active)
        .collect();

    let field = |name: &str, label: &str, step: &str, placeholder: &str| {
        format!(
            r#"<div class="col-6 col-md-3"><label class="form-label">{label}</label><input class="form-control" type="number" step="{step}" name="{name}" placeholder="{placeholder}"></div>"#
        )
    };
    let form = format!(
        r#"<form method="post" action="/nurse/patients/{id}/vitals" class="card card-body mb-3">{csrf}
<div class="row g-2">
{temp}{sys}{dia}{pulse}{rr}{spo2}{weight}{height}
<div class="col-12"><label class="form-label">Notes</label><input class="form-control" name="notes"></div>
</div>
<div class="mt-3"><button class="btn btn-primary" type="submit">Save vitals</button></div>
</form>"#,
        csrf = csrf_input(&staff.csrf_token),
        temp = field("temperature_c", "Temperature (°C)", "0.1", "36.8"),
        sys = field("systolic", "Systolic (mmHg)", "1", "120"),
        dia = field("diastolic", "Diastolic (mmHg)", "1", "80"),
        pulse = field("pulse_bpm", "Pulse (bpm)", "1", "72"),
        rr = field("respiratory_rate", "Resp. rate (/min)", "1", "16"),
        spo2 = field("oxygen_saturation", "SpO2 (%)", "1", "98"),
        weight = field("weight_kg", "Weight (kg)", "0.1", ""),
        height = field("height_cm", "Height (cm)", "0.1", ""),
    );

    let panes = [
        ("vitals", "Vitals", format!("{form}{}", vitals_table(&history))),
        ("medications", "Current medication", prescriptions_table(&medications, |_| String::new())),
    ];
    let body = format!("{}{}", patient_banner(&patient, today()), tabs(&panes));
    Ok(layout(&patient.full_name(), &staff, &body))
}

/// Raw vitals form. Every input may be left blank, so values arrive as
/// strings and are parsed here.
#[derive(Debug, Default, Deserialize)]
pub struct VitalsForm {
    pub temperature_c: Option<String>,
    pub systolic: Option<String>,
    pub diastolic: Option<String>,
    pub pulse_bpm: Option<String>,
    pub respiratory_rate: Option<String>,
    pub oxygen_saturation: Option<String>,
    pub weight_kg: Option<String>,
    pub height_cm: Option<String>,
    pub notes: Option<String>,
}

fn parse_opt<T: FromStr>(value: &Option<String>, label: &str) -> Result<Option<T>, DatabaseError> {
    match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| DatabaseError::Validation(format!("{label} must be a number"))),
        None => Ok(None),
    }
}

impl VitalsForm {
    fn parse(&self) -> Result<NewVitals, DatabaseError> {
        Ok(NewVitals {
            temperature_c: parse_opt(&self.temperature_c, "Temperature")?,
            systolic: parse_opt(&self.systolic, "Systolic pressure")?,
            diastolic: parse_opt(&self.diastolic, "Diastolic pressure")?,
            pulse_bpm: parse_opt(&self.pulse_bpm, "Pulse")?,
            respiratory_rate: parse_opt(&self.respiratory_rate, "Respiratory rate")?,
            oxygen_saturation: parse_opt(&self.oxygen_saturation, "Oxygen saturation")?,
            weight_kg: parse_opt(&self.weight_kg, "Weight")?,
            height_cm: parse_opt(&self.height_cm, "Height")?,
            notes: self.notes.clone(),
        })
    }
}

/// `POST /nurse/patients/:id/vitals`
pub async fn record_vitals(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<VitalsForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let result = form
        .parse()
        .and_then(|new| repo::record_vitals(&conn, &id, &staff.id(), &new));
    if result.is_ok() {
        ctx.core.log_access(&staff.actor(), &format!("record_vitals {id}"), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Vitals recorded".to_string(),
        &format!("/nurse/patients/{id}"),
    )
}

/// `GET /nurse/prescriptions`
pub async fn prescriptions(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let rows = repo::list_active_prescriptions(&conn, 200)?;
    let table = prescriptions_table(&rows, |p| {
        format!(
            r#"<a class="btn btn-sm btn-outline-primary" href="/nurse/patients/{}">Patient</a>"#,
            p.prescription.patient_id
        )
    });
    Ok(layout("Active prescriptions", &staff, &table))
}
