//! Doctor dashboard: consultations, test orders, prescriptions and blood
//! requests.
//!
//! Doctors act on their own appointments and orders. Admins may act on
//! anyone's.

use axum::extract::{Path, Query, State};
use axum::response::{Html, Response};
use axum::{Extension, Form};
use serde::Deserialize;
use uuid::Uuid;

use super::shared::{
    appointments_table, blood_requests_table, day_picker, form_value, form_values, prescriptions_table,
    test_requests_table, vitals_table, DayQuery,
};
use super::{after_action, fail_back, local_path, redirect_with, today};
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::{
    AppointmentStatus, AppointmentView, BloodRequestStatus, BloodRequestView, BloodUrgency, NewBloodRequest,
    NewPrescription, NewTestRequest, PrescriptionStatus, PrescriptionView, ResultFlag, TestPriority,
    TestRequestStatus, BLOOD_GROUPS,
};
use crate::web::error::WebError;
use crate::web::render::{
    action_button, badge, csrf_input, empty_row, escape_html, fmt_datetime, layout, opt_text, options,
    patient_banner, patient_search_box, stat_card, tabs,
};
use crate::web::types::{Flash, StaffContext, WebContext};

/// Doctors may only act on their own records; admins on any.
fn ensure_owner(staff: &StaffContext, doctor_id: &Uuid) -> Result<(), WebError> {
    if staff.is_admin() || staff.id() == *doctor_id {
        Ok(())
    } else {
        Err(WebError::Forbidden)
    }
}

fn consult_link(a: &AppointmentView) -> String {
    format!(
        "/doctor/patients/{}?appointment={}",
        a.appointment.patient_id, a.appointment.id
    )
}

fn open_button(a: &AppointmentView) -> String {
    format!(
        r#"<a class="btn btn-sm btn-outline-primary" href="{}">Open</a>"#,
        consult_link(a)
    )
}

/// `GET /doctor`
pub async fn dashboard(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let day = today();
    let conn = ctx.core.open_db()?;
    let appointments = repo::list_doctor_appointments_on(&conn, &staff.id(), day)?;
    let results = repo::list_recent_results_for_doctor(&conn, &staff.id(), 10)?;
    let blood = repo::list_open_blood_requests_for_doctor(&conn, &staff.id())?;

    let waiting = appointments
        .iter()
        .filter(|a| a.appointment.status == AppointmentStatus::Confirmed)
        .count() as i64;
    let seen = appointments
        .iter()
        .filter(|a| a.appointment.status == AppointmentStatus::Completed)
        .count() as i64;
    let cards = [
        stat_card("Appointments today", appointments.len() as i64, "primary"),
        stat_card("Waiting (confirmed)", waiting, "warning"),
        stat_card("Seen today", seen, "success"),
        stat_card("Open blood requests", blood.len() as i64, "danger"),
    ]
    .concat();

    let body = format!(
        r#"<div class="row g-3 mb-4">{cards}</div>
{search}
<h2 class="h5">Today's appointments</h2>
{appointments}
<h2 class="h5 mt-4">Recent lab results</h2>
{results}
<h2 class="h5 mt-4">Open blood requests</h2>
{blood}"#,
        search = patient_search_box(),
        appointments = appointments_table(&appointments, false, open_button),
        results = test_requests_table(&results, |r| Some(format!("/doctor/test-requests/{}", r.request.id))),
        blood = blood_requests_table(&blood, |b| blood_actions(&staff, b)),
    );
    Ok(layout("Doctor", &staff, &body))
}

/// `GET /doctor/appointments?date=`
pub async fn appointments(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Query(query): Query<DayQuery>,
) -> Result<Html<String>, WebError> {
    let today = today();
    let day = query.day(today);
    let conn = ctx.core.open_db()?;
    let rows = repo::list_doctor_appointments_on(&conn, &staff.id(), day)?;
    let body = format!(
        "{}{}",
        day_picker("/doctor/appointments", day, today),
        appointments_table(&rows, false, open_button)
    );
    Ok(layout("My appointments", &staff, &body))
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsultQuery {
    pub appointment: Option<Uuid>,
}

/// `GET /doctor/patients/:id?appointment=`, the consultation view.
pub async fn patient(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<ConsultQuery>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let patient = repo::get_patient(&conn, &id)?;
    let appointment = match query.appointment {
        Some(appointment_id) => {
            let view = repo::get_appointment_view(&conn, &appointment_id)?;
            if view.appointment.patient_id != id {
                return Err(WebError::NotFound("That appointment belongs to another patient.".into()));
            }
            Some(view)
        }
        None => None,
    };
    let history = repo::list_patient_appointments(&conn, &id)?;
    let vitals = repo::list_vitals_for_patient(&conn, &id, 20)?;
    let tests = repo::list_test_requests_for_patient(&conn, &id)?;
    let prescriptions = repo::list_prescriptions_for_patient(&conn, &id)?;
    let blood = repo::list_blood_requests_for_patient(&conn, &id)?;
    let catalog = repo::list_lab_tests(&conn, true)?;

    let csrf = &staff.csrf_token;
    let here = match &appointment {
        Some(a) => consult_link(a),
        None => format!("/doctor/patients/{id}"),
    };

    let mut consult = String::new();
    if let Some(a) = &appointment {
        consult.push_str(&appointment_panel(&staff, a, &here));
    }

    let test_boxes: String = catalog
        .iter()
        .map(|t| {
            format!(
                r#"<div class="col-md-4"><div class="form-check"><input class="form-check-input" type="checkbox" name="lab_test_id" value="{id}" id="t-{id}"><label class="form-check-label" for="t-{id}">{name} <span class="text-muted small">{code}</span></label></div></div>"#,
                id = t.id,
                name = escape_html(&t.name),
                code = escape_html(&t.code),
            )
        })
        .collect();
    let appointment_field = appointment
        .as_ref()
        .map(|a| format!(r#"<input type="hidden" name="appointment_id" value="{}">"#, a.appointment.id))
        .unwrap_or_default();
    let priorities = options(TestPriority::ALL.iter().map(|p| (p.as_str(), p.label())), None);
    let groups = options(
        BLOOD_GROUPS.iter().map(|g| (*g, *g)),
        patient.blood_group.as_deref(),
    );
    let urgencies = options(BloodUrgency::ALL.iter().map(|u| (u.as_str(), u.label())), None);

    consult.push_str(&format!(
        r#"<div class="card mb-3"><div class="card-header">Order lab tests</div><div class="card-body">
<form method="post" action="/doctor/patients/{id}/test-requests">{csrf_field}
<input type="hidden" name="return_to" value="{here}">
<div class="row g-1 mb-2">{test_boxes}</div>
<div class="row g-2 align-items-end">
<div class="col-md-3"><label class="form-label">Priority</label><select class="form-select" name="priority">{priorities}</select></div>
<div class="col-md-7"><label class="form-label">Clinical notes</label><input class="form-control" name="clinical_notes"></div>
<div class="col-md-2"><button class="btn btn-primary w-100" type="submit">Order</button></div>
</div></form></div></div>
<div class="card mb-3"><div class="card-header">Prescribe</div><div class="card-body">
<form method="post" action="/doctor/patients/{id}/prescriptions">{csrf_field}{appointment_field}
<input type="hidden" name="return_to" value="{here}">
<div class="row g-2 align-items-end">
<div class="col-md-3"><label class="form-label">Medication</label><input class="form-control" name="medication" required></div>
<div class="col-md-2"><label class="form-label">Dosage</label><input class="form-control" name="dosage" required></div>
<div class="col-md-2"><label class="form-label">Frequency</label><input class="form-control" name="frequency" required></div>
<div class="col-md-2"><label class="form-label">Duration</label><input class="form-control" name="duration"></div>
<div class="col-md-3"><label class="form-label">Instructions</label><input class="form-control" name="instructions"></div>
</div><button class="btn btn-primary mt-2" type="submit">Prescribe</button></form></div></div>
<div class="card mb-3"><div class="card-header">Request blood</div><div class="card-body">
<form method="post" action="/doctor/patients/{id}/blood-requests">{csrf_field}
<input type="hidden" name="return_to" value="{here}">
<div class="row g-2 align-items-end">
<div class="col-md-2"><label class="form-label">Group</label><select class="form-select" name="blood_group">{groups}</select></div>
<div class="col-md-2"><label class="form-label">Units</label><input class="form-control" type="number" min="1" max="{max}" name="units" value="1"></div>
<div class="col-md-2"><label class="form-label">Urgency</label><select class="form-select" name="urgency">{urgencies}</select></div>
<div class="col-md-4"><label class="form-label">Indication</label><input class="form-control" name="indication" required></div>
<div class="col-md-2"><button class="btn btn-danger w-100" type="submit">Request</button></div>
</div></form></div></div>"#,
        csrf_field = csrf_input(csrf),
        here = escape_html(&here),
        max = repo::MAX_BLOOD_UNITS,
    ));

    let panes = [
        ("consult", "Consultation", consult),
        (
            "history",
            "Appointments",
            appointments_table(&history, true, |a| {
                if open_for(&staff, a) {
                    open_button(a)
                } else {
                    String::new()
                }
            }),
        ),
        ("vitals", "Vitals", vitals_table(&vitals)),
        (
            "labs",
            "Lab tests",
            test_requests_table(&tests, |r| Some(format!("/doctor/test-requests/{}", r.request.id))),
        ),
        (
            "prescriptions",
            "Prescriptions",
            prescriptions_table(&prescriptions, |p| prescription_actions(&staff, p, &here)),
        ),
        ("blood", "Blood requests", blood_requests_table(&blood, |b| blood_actions(&staff, b))),
    ];

    let body = format!("{}{}", patient_banner(&patient, today()), tabs(&panes));
    Ok(layout(&patient.full_name(), &staff, &body))
}

fn open_for(staff: &StaffContext, a: &AppointmentView) -> bool {
    a.appointment.status.is_open() && (staff.is_admin() || a.appointment.doctor_id == staff.id())
}

/// Appointment summary with the notes form when it can be completed.
fn appointment_panel(staff: &StaffContext, a: &AppointmentView, here: &str) -> String {
    let appt = &a.appointment;
    let mine = staff.is_admin() || appt.doctor_id == staff.id();
    let mut actions = String::new();
    match appt.status {
        AppointmentStatus::Confirmed if mine => actions.push_str(&format!(
            r#"<form method="post" action="/doctor/appointments/{id}/complete" class="mt-2">{csrf}
<label class="form-label">Consultation notes</label>
<textarea class="form-control mb-2" name="notes" rows="4" required></textarea>
<button class="btn btn-success" type="submit">Complete consultation</button></form>"#,
            id = appt.id,
            csrf = csrf_input(&staff.csrf_token),
        )),
        AppointmentStatus::Scheduled => actions.push_str(
            r#"<p class="text-muted small mb-0">Awaiting confirmation at the front desk.</p>"#,
        ),
        _ => {}
    }
    if appt.status.is_open() && mine {
        actions.push_str(&format!(
            r#"<form method="post" action="/doctor/appointments/{id}/cancel" class="mt-2 d-flex gap-2" data-confirm="Cancel this appointment?">{csrf}
<input type="hidden" name="return_to" value="{here}">
<input class="form-control form-control-sm" name="reason" placeholder="Reason for cancelling">
<button class="btn btn-sm btn-outline-danger text-nowrap" type="submit">Cancel appointment</button></form>"#,
            id = appt.id,
            csrf = csrf_input(&staff.csrf_token),
            here = escape_html(here),
        ));
    }
    let notes = appt
        .consultation_notes
        .as_deref()
        .map(|n| format!(r#"<p class="mb-0"><strong>Notes:</strong> {}</p>"#, escape_html(n)))
        .unwrap_or_default();
    format!(
        r#"<div class="card mb-3 border-primary"><div class="card-body">
<div class="d-flex justify-content-between"><div><strong>{when}</strong> with {doctor}</div>{status}</div>
<p class="mb-1">{reason}</p>{notes}{actions}</div></div>"#,
        when = fmt_datetime(&appt.scheduled_at),
        doctor = escape_html(&a.doctor_name),
        status = badge(appt.status.label(), appt.status.badge_class()),
        reason = escape_html(&appt.reason),
    )
}

fn prescription_actions(staff: &StaffContext, p: &PrescriptionView, here: &str) -> String {
    let rx = &p.prescription;
    if rx.status != PrescriptionStatus::Active || !(staff.is_admin() || rx.doctor_id == staff.id()) {
        return String::new();
    }
    let form = |status: PrescriptionStatus, label: &str, class: &str, confirm: &str| {
        format!(
            r#"<form method="post" action="/doctor/prescriptions/{id}/status" class="d-inline" data-confirm="{confirm}">{csrf}<input type="hidden" name="status" value="{status}"><input type="hidden" name="return_to" value="{here}"><button class="btn btn-sm {class}" type="submit">{label}</button></form>"#,
            id = rx.id,
            csrf = csrf_input(&staff.csrf_token),
            status = status.as_str(),
            here = escape_html(here),
        )
    };
    format!(
        "{} {}",
        form(PrescriptionStatus::Completed, "Complete", "btn-outline-success", "Mark this course as completed?"),
        form(PrescriptionStatus::Discontinued, "Discontinue", "btn-outline-danger", "Discontinue this medication?"),
    )
}

fn blood_actions(staff: &StaffContext, b: &BloodRequestView) -> String {
    let r = &b.request;
    let open = matches!(r.status, BloodRequestStatus::Pending | BloodRequestStatus::Approved);
    if open && (staff.is_admin() || r.doctor_id == staff.id()) {
        action_button(
            &format!("/doctor/blood-requests/{}/cancel", r.id),
            &staff.csrf_token,
            "Cancel",
            "btn-outline-danger",
            Some("Cancel this blood request?"),
        )
    } else {
        String::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteForm {
    #[serde(default)]
    pub notes: String,
}

/// `POST /doctor/appointments/:id/complete`
pub async fn complete_appointment(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<CompleteForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let appointment = repo::get_appointment(&conn, &id)?;
    ensure_owner(&staff, &appointment.doctor_id)?;
    let result = repo::complete_appointment(&conn, &id, &form.notes);
    if result.is_ok() {
        ctx.core.log_access(&staff.actor(), &format!("complete_appointment {id}"), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Consultation completed".to_string(),
        &format!("/doctor/patients/{}?appointment={id}", appointment.patient_id),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonForm {
    pub reason: Option<String>,
    pub return_to: Option<String>,
}

/// `POST /doctor/appointments/:id/cancel`
pub async fn cancel_appointment(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<ReasonForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let appointment = repo::get_appointment(&conn, &id)?;
    ensure_owner(&staff, &appointment.doctor_id)?;
    let result = repo::cancel_appointment(&conn, &id, form.reason.as_deref());
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Appointment cancelled".to_string(),
        local_path(form.return_to.as_deref(), "/doctor"),
    )
}

/// `POST /doctor/patients/:id/test-requests`
///
/// The form repeats `lab_test_id` once per ticked test, so it is read as
/// raw pairs.
pub async fn create_test_request(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(patient_id): Path<Uuid>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Response, WebError> {
    let fallback = format!("/doctor/patients/{patient_id}");
    let back = local_path(form_value(&fields, "return_to"), &fallback).to_string();

    let parsed = parse_test_order(&fields, patient_id, staff.id());
    let conn = ctx.core.open_db()?;
    match parsed.and_then(|order| repo::create_test_request(&conn, &order)) {
        Ok(request) => {
            ctx.core
                .log_access(&staff.actor(), &format!("create_test_request {}", request.id), "success");
            Ok(redirect_with(
                &ctx,
                &staff,
                &format!("/doctor/test-requests/{}", request.id),
                Flash::success("Tests ordered"),
            ))
        }
        Err(e) => fail_back(&ctx, &staff, e, &back),
    }
}

fn parse_test_order(
    fields: &[(String, String)],
    patient_id: Uuid,
    doctor_id: Uuid,
) -> Result<NewTestRequest, DatabaseError> {
    let lab_test_ids = form_values(fields, "lab_test_id")
        .map(|v| {
            Uuid::parse_str(v.trim())
                .map_err(|_| DatabaseError::Validation("Unknown test selected".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let priority = match form_value(fields, "priority").map(str::trim).filter(|p| !p.is_empty()) {
        Some(p) => p
            .parse()
            .map_err(|_| DatabaseError::Validation(format!("Unknown priority '{p}'")))?,
        None => TestPriority::Routine,
    };
    Ok(NewTestRequest {
        patient_id,
        doctor_id,
        priority,
        clinical_notes: form_value(fields, "clinical_notes")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        lab_test_ids,
    })
}

/// `GET /doctor/test-requests/:id`
pub async fn test_request(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let detail = repo::get_test_request(&conn, &id)?;
    let req = &detail.request;

    let rows: String = if detail.items.is_empty() {
        empty_row(5, "No tests on this request")
    } else {
        detail
            .items
            .iter()
            .map(|item| {
                let flag = match item.result_flag {
                    Some(f) => badge(f.label(), flag_class(f)),
                    None => String::new(),
                };
                let unit = item.unit.as_deref().map(escape_html).unwrap_or_default();
                let value = match item.result_value.as_deref() {
                    Some(v) => format!("{} {unit}", escape_html(v)),
                    None => r#"<span class="text-muted">Pending</span>"#.to_string(),
                };
                format!(
                    "<tr><td>{name}<div class=\"small text-muted\">{code} &middot; {sample}</div></td><td>{value}</td>\
                     <td>{flag}</td><td>{range}</td><td>{comment}</td></tr>",
                    name = escape_html(&item.test_name),
                    code = escape_html(&item.test_code),
                    sample = escape_html(&item.sample_type),
                    range = opt_text(item.reference_range.as_deref()),
                    comment = opt_text(item.result_comment.as_deref()),
                )
            })
            .collect()
    };

    let can_cancel = matches!(req.status, TestRequestStatus::Pending | TestRequestStatus::SampleCollected)
        && (staff.is_admin() || req.doctor_id == staff.id());
    let cancel = if can_cancel {
        action_button(
            &format!("/doctor/test-requests/{id}/cancel"),
            &staff.csrf_token,
            "Cancel request",
            "btn-outline-danger",
            Some("Cancel this test request?"),
        )
    } else {
        String::new()
    };

    let body = format!(
        r#"<div class="card mb-3"><div class="card-body">
<div class="d-flex justify-content-between"><div><a href="/doctor/patients/{patient_id}"><strong>{patient}</strong></a> <span class="text-muted">{hn}</span></div>{status}</div>
<div class="small text-muted">Requested {requested} by {doctor} &middot; {priority}</div>
<p class="mb-0 mt-2">{notes}</p></div></div>
<div class="table-responsive"><table class="table table-sm bg-white">
<thead><tr><th>Test</th><th>Result</th><th>Flag</th><th>Reference</th><th>Comment</th></tr></thead>
<tbody>{rows}</tbody></table></div>{cancel}"#,
        patient_id = req.patient_id,
        patient = escape_html(&detail.patient_name),
        hn = escape_html(&detail.hospital_number),
        status = badge(req.status.label(), req.status.badge_class()),
        requested = fmt_datetime(&req.requested_at),
        doctor = escape_html(&detail.doctor_name),
        priority = req.priority.label(),
        notes = opt_text(req.clinical_notes.as_deref()),
    );
    Ok(layout("Test request", &staff, &body))
}

pub(crate) fn flag_class(flag: ResultFlag) -> &'static str {
    match flag {
        ResultFlag::Normal => "bg-success",
        ResultFlag::Low | ResultFlag::High => "bg-warning text-dark",
        ResultFlag::Critical => "bg-danger",
    }
}

/// `POST /doctor/test-requests/:id/cancel`
pub async fn cancel_test_request(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let detail = repo::get_test_request(&conn, &id)?;
    ensure_owner(&staff, &detail.request.doctor_id)?;
    let result = repo::cancel_test_request(&conn, &id);
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Test request cancelled".to_string(),
        &format!("/doctor/test-requests/{id}"),
    )
}

#[derive(Debug, Deserialize)]
pub struct PrescriptionForm {
    pub appointment_id: Option<Uuid>,
    #[serde(default)]
    pub medication: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    pub duration: Option<String>,
    pub instructions: Option<String>,
    pub return_to: Option<String>,
}

/// `POST /doctor/patients/:id/prescriptions`
pub async fn create_prescription(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(patient_id): Path<Uuid>,
    Form(form): Form<PrescriptionForm>,
) -> Result<Response, WebError> {
    let fallback = format!("/doctor/patients/{patient_id}");
    let conn = ctx.core.open_db()?;
    let result = repo::create_prescription(
        &conn,
        &NewPrescription {
            patient_id,
            doctor_id: staff.id(),
            appointment_id: form.appointment_id,
            medication: form.medication.clone(),
            dosage: form.dosage.clone(),
            frequency: form.frequency.clone(),
            duration: form.duration.clone(),
            instructions: form.instructions.clone(),
        },
    );
    after_action(
        &ctx,
        &staff,
        result,
        |p| format!("Prescribed {}", p.medication),
        &format!("{}#prescriptions", local_path(form.return_to.as_deref(), &fallback)),
    )
}

#[derive(Debug, Deserialize)]
pub struct PrescriptionStatusForm {
    pub status: String,
    pub return_to: Option<String>,
}

/// `POST /doctor/prescriptions/:id/status`
pub async fn prescription_status(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<PrescriptionStatusForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let rx = repo::get_prescription(&conn, &id)?;
    ensure_owner(&staff, &rx.doctor_id)?;
    let fallback = format!("/doctor/patients/{}", rx.patient_id);
    let back = format!("{}#prescriptions", local_path(form.return_to.as_deref(), &fallback));
    let result = form
        .status
        .parse::<PrescriptionStatus>()
        .map_err(|_| DatabaseError::Validation("Unknown prescription status".into()))
        .and_then(|to| repo::update_prescription_status(&conn, &id, to));
    after_action(
        &ctx,
        &staff,
        result,
        |p| format!("{} marked {}", p.medication, p.status.label().to_lowercase()),
        &back,
    )
}

#[derive(Debug, Deserialize)]
pub struct BloodRequestForm {
    #[serde(default)]
    pub blood_group: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub indication: String,
    pub return_to: Option<String>,
}

/// `POST /doctor/patients/:id/blood-requests`
pub async fn create_blood_request(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(patient_id): Path<Uuid>,
    Form(form): Form<BloodRequestForm>,
) -> Result<Response, WebError> {
    let fallback = format!("/doctor/patients/{patient_id}");
    let back = format!("{}#blood", local_path(form.return_to.as_deref(), &fallback));
    let conn = ctx.core.open_db()?;
    let result = parse_blood_request(&form, patient_id, staff.id())
        .and_then(|new| repo::create_blood_request(&conn, &new));
    if let Ok(request) = &result {
        ctx.core
            .log_access(&staff.actor(), &format!("create_blood_request {}", request.id), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |r| format!("Requested {} unit(s) of {}", r.units, r.blood_group),
        &back,
    )
}

fn parse_blood_request(
    form: &BloodRequestForm,
    patient_id: Uuid,
    doctor_id: Uuid,
) -> Result<NewBloodRequest, DatabaseError> {
    let units: i64 = form
        .units
        .trim()
        .parse()
        .map_err(|_| DatabaseError::Validation("Units must be a whole number".into()))?;
    let urgency: BloodUrgency = form
        .urgency
        .trim()
        .parse()
        .map_err(|_| DatabaseError::Validation("Select an urgency".into()))?;
    Ok(NewBloodRequest {
        patient_id,
        doctor_id,
        blood_group: form.blood_group.clone(),
        units,
        urgency,
        indication: form.indication.clone(),
    })
}

/// `POST /doctor/blood-requests/:id/cancel`
pub async fn cancel_blood_request(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let view = repo::get_blood_request(&conn, &id)?;
    ensure_owner(&staff, &view.request.doctor_id)?;
    let result = repo::cancel_blood_request(&conn, &id);
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Blood request cancelled".to_string(),
        &format!("/doctor/patients/{}#blood", view.request.patient_id),
    )
}
