//! Records keeper dashboard: patient registration, demographics and the
//! appointment book.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::{Extension, Form};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use uuid::Uuid;

use super::shared::{
    appointments_table, blood_requests_table, day_picker, prescriptions_table, test_requests_table,
    vitals_table, DayQuery,
};
use super::{after_action, local_path, redirect_with, today};
use crate::db::repository as repo;
use crate::db::{DatabaseError, DATE_FORMAT};
use crate::models::{
    AppointmentStatus, Gender, NewAppointment, Patient, PatientDetails, StaffRole, BLOOD_GROUPS,
    GENOTYPES,
};
use crate::web::error::WebError;
use crate::web::render::{
    action_button, csrf_input, empty_row, escape_html, fmt_date, fmt_datetime, layout, opt_text,
    options, patient_banner, patient_search_box, stat_card, tabs,
};
use crate::web::types::{Flash, StaffContext, WebContext};

/// `GET /records`
pub async fn dashboard(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let day = today();
    let conn = ctx.core.open_db()?;
    let counts = repo::dashboard_counts(&conn, day)?;
    let appointments = repo::list_appointments_on(&conn, day, None)?;

    let cards = [
        stat_card("Registered patients", counts.patients_total, "primary"),
        stat_card("Registered today", counts.patients_registered_today, "success"),
        stat_card("Appointments today", counts.appointments_today, "info"),
        stat_card("Awaiting confirmation", counts.appointments_scheduled, "warning"),
    ]
    .concat();

    let table = appointments_table(&appointments, false, |a| appointment_actions(&staff, a, "/records"));
    let body = format!(
        r#"<div class="row g-3 mb-4">{cards}</div>
{search}
<div class="d-flex justify-content-between align-items-center mb-2">
<h2 class="h5 mb-0">Today's appointments</h2>
<a class="btn btn-primary btn-sm" href="/records/patients/new">Register patient</a>
</div>
{table}"#,
        search = patient_search_box(),
    );
    Ok(layout("Records", &staff, &body))
}

#[derive(Debug, Default, Deserialize)]
pub struct PatientListQuery {
    pub q: Option<String>,
    pub page: Option<i64>,
}

/// `GET /records/patients?q=&page=`
pub async fn patients(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Query(query): Query<PatientListQuery>,
) -> Result<Html<String>, WebError> {
    let search = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let conn = ctx.core.open_db()?;
    let total = repo::count_patients(&conn, search)?;
    let pages = ((total + repo::PATIENT_PAGE_SIZE - 1) / repo::PATIENT_PAGE_SIZE).max(1);
    let page = query.page.unwrap_or(1).clamp(1, pages);
    let rows = repo::list_patients(&conn, search, page)?;
    let today = today();

    let body_rows: String = if rows.is_empty() {
        empty_row(6, "No patients found")
    } else {
        rows.iter()
            .map(|p| {
                format!(
                    r#"<tr><td><a href="/records/patients/{id}">{hn}</a></td><td>{name}</td><td>{dob} ({age})</td><td>{gender}</td><td>{phone}</td><td>{registered}</td></tr>"#,
                    id = p.id,
                    hn = escape_html(&p.hospital_number),
                    name = escape_html(&p.full_name()),
                    dob = fmt_date(&p.date_of_birth),
                    age = p.age_on(today),
                    gender = p.gender.label(),
                    phone = opt_text(p.phone.as_deref()),
                    registered = fmt_datetime(&p.created_at),
                )
            })
            .collect()
    };

    let q = search.map(escape_html).unwrap_or_default();
    let q_param = search.map(url_component).unwrap_or_default();
    let prev = if page > 1 {
        format!(r#"<a class="btn btn-outline-secondary btn-sm" href="/records/patients?q={q_param}&page={}">&laquo; Previous</a>"#, page - 1)
    } else {
        String::new()
    };
    let next = if page < pages {
        format!(r#"<a class="btn btn-outline-secondary btn-sm" href="/records/patients?q={q_param}&page={}">Next &raquo;</a>"#, page + 1)
    } else {
        String::new()
    };

    let body = format!(
        r#"<form class="d-flex gap-2 mb-3" method="get" action="/records/patients">
<input class="form-control" type="search" name="q" value="{q}" placeholder="Name, hospital number or phone">
<button class="btn btn-primary" type="submit">Search</button>
<a class="btn btn-success text-nowrap" href="/records/patients/new">Register patient</a>
</form>
<div class="table-responsive"><table class="table table-sm table-hover bg-white">
<thead><tr><th>Hospital no.</th><th>Name</th><th>Date of birth</th><th>Gender</th><th>Phone</th><th>Registered</th></tr></thead>
<tbody>{body_rows}</tbody></table></div>
<div class="d-flex gap-2 align-items-center">{prev}<span class="text-muted small">Page {page} of {pages} &middot; {total} patients</span>{next}</div>"#
    );
    Ok(layout("Patients", &staff, &body))
}

/// Percent-encode a query value for an `href`.
fn url_component(value: &str) -> String {
    let mut out = String::new();
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn details_of(p: &Patient) -> PatientDetails {
    PatientDetails {
        first_name: p.first_name.clone(),
        last_name: p.last_name.clone(),
        date_of_birth: p.date_of_birth.format(DATE_FORMAT).to_string(),
        gender: p.gender.as_str().to_string(),
        phone: p.phone.clone(),
        address: p.address.clone(),
        blood_group: p.blood_group.clone(),
        genotype: p.genotype.clone(),
        allergies: p.allergies.clone(),
        emergency_contact_name: p.emergency_contact_name.clone(),
        emergency_contact_phone: p.emergency_contact_phone.clone(),
    }
}

fn patient_form(action: &str, csrf: &str, d: &PatientDetails, submit: &str, error: Option<&str>) -> String {
    let text = |v: &Option<String>| v.as_deref().map(escape_html).unwrap_or_default();
    let alert = error
        .map(|e| format!(r#"<div class="alert alert-danger">{}</div>"#, escape_html(e)))
        .unwrap_or_default();
    let genders = options(Gender::ALL.iter().map(|g| (g.as_str(), g.label())), Some(d.gender.as_str()));
    let blood = options(
        std::iter::once(("", "Unknown")).chain(BLOOD_GROUPS.iter().map(|g| (*g, *g))),
        d.blood_group.as_deref(),
    );
    let genotypes = options(
        std::iter::once(("", "Unknown")).chain(GENOTYPES.iter().map(|g| (*g, *g))),
        d.genotype.as_deref(),
    );
    format!(
        r#"{alert}<form method="post" action="{action}" class="card card-body">
{csrf}
<div class="row g-3">
<div class="col-md-6"><label class="form-label">First name</label><input class="form-control" name="first_name" value="{first}" required></div>
<div class="col-md-6"><label class="form-label">Last name</label><input class="form-control" name="last_name" value="{last}" required></div>
<div class="col-md-4"><label class="form-label">Date of birth</label><input class="form-control" type="date" name="date_of_birth" value="{dob}" required></div>
<div class="col-md-4"><label class="form-label">Gender</label><select class="form-select" name="gender" required><option value="">Select</option>{genders}</select></div>
<div class="col-md-4"><label class="form-label">Phone</label><input class="form-control" name="phone" value="{phone}"></div>
<div class="col-12"><label class="form-label">Address</label><input class="form-control" name="address" value="{address}"></div>
<div class="col-md-3"><label class="form-label">Blood group</label><select class="form-select" name="blood_group">{blood}</select></div>
<div class="col-md-3"><label class="form-label">Genotype</label><select class="form-select" name="genotype">{genotypes}</select></div>
<div class="col-md-6"><label class="form-label">Allergies</label><input class="form-control" name="allergies" value="{allergies}"></div>
<div class="col-md-6"><label class="form-label">Emergency contact</label><input class="form-control" name="emergency_contact_name" value="{ec_name}"></div>
<div class="col-md-6"><label class="form-label">Emergency contact phone</label><input class="form-control" name="emergency_contact_phone" value="{ec_phone}"></div>
</div>
<div class="mt-3"><button class="btn btn-primary" type="submit">{submit}</button></div>
</form>"#,
        action = escape_html(action),
        csrf = csrf_input(csrf),
        first = escape_html(&d.first_name),
        last = escape_html(&d.last_name),
        dob = escape_html(&d.date_of_birth),
        phone = text(&d.phone),
        address = text(&d.address),
        allergies = text(&d.allergies),
        ec_name = text(&d.emergency_contact_name),
        ec_phone = text(&d.emergency_contact_phone),
        submit = escape_html(submit),
    )
}

/// `GET /records/patients/new`
pub async fn new_patient(Extension(staff): Extension<StaffContext>) -> Html<String> {
    let form = patient_form("/records/patients", &staff.csrf_token, &PatientDetails::default(), "Register", None);
    layout("Register patient", &staff, &form)
}

/// `POST /records/patients`
pub async fn create_patient(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Form(details): Form<PatientDetails>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    match repo::register_patient(&conn, &details, Some(staff.id())) {
        Ok(patient) => {
            tracing::info!(hospital_number = %patient.hospital_number, "Patient registered");
            ctx.core
                .log_access(&staff.actor(), &format!("register_patient {}", patient.hospital_number), "success");
            Ok(redirect_with(
                &ctx,
                &staff,
                &format!("/records/patients/{}", patient.id),
                Flash::success(format!(
                    "Registered {} as {}",
                    patient.full_name(),
                    patient.hospital_number
                )),
            ))
        }
        Err(DatabaseError::Validation(msg)) => {
            let form = patient_form("/records/patients", &staff.csrf_token, &details, "Register", Some(&msg));
            Ok((StatusCode::UNPROCESSABLE_ENTITY, layout("Register patient", &staff, &form)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// `GET /records/patients/:id/edit`
pub async fn edit_patient(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let patient = repo::get_patient(&conn, &id)?;
    let form = patient_form(
        &format!("/records/patients/{id}/edit"),
        &staff.csrf_token,
        &details_of(&patient),
        "Save changes",
        None,
    );
    let body = format!(
        r#"<p class="text-muted">Hospital number <strong>{}</strong> cannot be changed.</p>{form}"#,
        escape_html(&patient.hospital_number)
    );
    Ok(layout(&format!("Edit {}", patient.full_name()), &staff, &body))
}

/// `POST /records/patients/:id/edit`
pub async fn update_patient(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(details): Form<PatientDetails>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    match repo::update_patient(&conn, &id, &details) {
        Ok(patient) => {
            ctx.core
                .log_access(&staff.actor(), &format!("update_patient {}", patient.hospital_number), "success");
            Ok(redirect_with(
                &ctx,
                &staff,
                &format!("/records/patients/{id}"),
                Flash::success("Patient details updated"),
            ))
        }
        Err(DatabaseError::Validation(msg)) => {
            let form = patient_form(
                &format!("/records/patients/{id}/edit"),
                &staff.csrf_token,
                &details,
                "Save changes",
                Some(&msg),
            );
            Ok((StatusCode::UNPROCESSABLE_ENTITY, layout("Edit patient", &staff, &form)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

fn details_card(p: &Patient) -> String {
    let row = |label: &str, value: String| {
        format!(r#"<tr><th class="w-25 text-muted fw-normal">{label}</th><td>{value}</td></tr>"#)
    };
    let rows = [
        row("Phone", opt_text(p.phone.as_deref())),
        row("Address", opt_text(p.address.as_deref())),
        row("Allergies", opt_text(p.allergies.as_deref())),
        row("Emergency contact", opt_text(p.emergency_contact_name.as_deref())),
        row("Emergency phone", opt_text(p.emergency_contact_phone.as_deref())),
        row("Registered", fmt_datetime(&p.created_at)),
        row("Last updated", fmt_datetime(&p.updated_at)),
    ]
    .concat();
    format!(r#"<table class="table table-sm bg-white">{rows}</table>"#)
}

fn schedule_form(csrf: &str, patient_id: Uuid, doctors: &[crate::models::Staff], day: NaiveDate) -> String {
    let ids: Vec<String> = doctors.iter().map(|d| d.id.to_string()).collect();
    let doctor_options = options(
        ids.iter().zip(doctors).map(|(id, d)| (id.as_str(), d.full_name.as_str())),
        None,
    );
    format!(
        r#"<form method="post" action="/records/appointments" class="card card-body mb-3">
{csrf}<input type="hidden" name="patient_id" value="{patient_id}">
<div class="row g-2 align-items-end">
<div class="col-md-3"><label class="form-label">Doctor</label><select class="form-select" name="doctor_id" required>{doctor_options}</select></div>
<div class="col-md-2"><label class="form-label">Date</label><input class="form-control" type="date" name="date" value="{day}" required></div>
<div class="col-md-2"><label class="form-label">Time</label><input class="form-control" type="time" name="time" required></div>
<div class="col-md-3"><label class="form-label">Reason</label><input class="form-control" name="reason" required></div>
<div class="col-md-2"><button class="btn btn-primary w-100" type="submit">Schedule</button></div>
</div></form>"#,
        csrf = csrf_input(csrf),
        day = day.format(DATE_FORMAT),
    )
}

/// `GET /records/patients/:id`, the full patient record. Clinical roles
/// can read it; only records keepers see the edit and scheduling forms.
pub async fn view_patient(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let patient = repo::get_patient(&conn, &id)?;
    let appointments = repo::list_patient_appointments(&conn, &id)?;
    let vitals = repo::list_vitals_for_patient(&conn, &id, 20)?;
    let tests = repo::list_test_requests_for_patient(&conn, &id)?;
    let prescriptions = repo::list_prescriptions_for_patient(&conn, &id)?;
    let blood = repo::list_blood_requests_for_patient(&conn, &id)?;
    let manages_records = matches!(staff.role(), StaffRole::RecordsKeeper | StaffRole::Admin);
    let today = today();

    let mut appointments_tab = String::new();
    if manages_records {
        let doctors = repo::list_staff_by_role(&conn, StaffRole::Doctor)?;
        appointments_tab.push_str(&schedule_form(&staff.csrf_token, id, &doctors, today));
    }
    let back = format!("/records/patients/{id}");
    appointments_tab.push_str(&appointments_table(&appointments, true, |a| {
        if manages_records {
            appointment_actions(&staff, a, &back)
        } else {
            String::new()
        }
    }));

    let test_link = |r: &crate::models::TestRequestSummary| match staff.role() {
        StaffRole::Doctor | StaffRole::Admin => Some(format!("/doctor/test-requests/{}", r.request.id)),
        StaffRole::LabScientist => Some(format!("/lab/test-requests/{}", r.request.id)),
        _ => None,
    };

    let edit = if manages_records {
        format!(r#"<a class="btn btn-outline-primary btn-sm mb-3" href="/records/patients/{id}/edit">Edit details</a>"#)
    } else {
        String::new()
    };

    let panes = [
        ("details", "Details", format!("{edit}{}", details_card(&patient))),
        ("appointments", "Appointments", appointments_tab),
        ("vitals", "Vitals", vitals_table(&vitals)),
        ("labs", "Lab tests", test_requests_table(&tests, test_link)),
        ("prescriptions", "Prescriptions", prescriptions_table(&prescriptions, |_| String::new())),
        ("blood", "Blood requests", blood_requests_table(&blood, |_| String::new())),
    ];
    let body = format!("{}{}", patient_banner(&patient, today), tabs(&panes));
    Ok(layout(&patient.full_name(), &staff, &body))
}

/// Confirm and cancel buttons for an open appointment.
fn appointment_actions(staff: &StaffContext, a: &crate::models::AppointmentView, back: &str) -> String {
    let id = a.appointment.id;
    let mut html = String::new();
    if a.appointment.status == AppointmentStatus::Scheduled {
        html.push_str(&return_form(
            &format!("/records/appointments/{id}/confirm"),
            &staff.csrf_token,
            back,
            "Confirm",
            "btn-success",
            None,
        ));
    }
    if a.appointment.status.is_open() {
        html.push(' ');
        html.push_str(&return_form(
            &format!("/records/appointments/{id}/cancel"),
            &staff.csrf_token,
            back,
            "Cancel",
            "btn-outline-danger",
            Some("Cancel this appointment?"),
        ));
    }
    html
}

/// One-button form that carries a `return_to` path.
fn return_form(action: &str, csrf: &str, back: &str, label: &str, class: &str, confirm: Option<&str>) -> String {
    let button = action_button(action, csrf, label, class, confirm);
    button.replacen(
        "<button",
        &format!(r#"<input type="hidden" name="return_to" value="{}"><button"#, escape_html(back)),
        1,
    )
}

/// `GET /records/appointments?date=&status=`
pub async fn appointments(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Query(query): Query<DayQuery>,
) -> Result<Html<String>, WebError> {
    let today = today();
    let day = query.day(today);
    let status: Option<AppointmentStatus> = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok());
    let conn = ctx.core.open_db()?;
    let rows = repo::list_appointments_on(&conn, day, status)?;
    let back = format!("/records/appointments?date={}", day.format(DATE_FORMAT));

    let filters: String = std::iter::once((None, "All"))
        .chain(AppointmentStatus::ALL.iter().map(|s| (Some(*s), s.label())))
        .map(|(s, label)| {
            let active = if s == status { " active" } else { "" };
            let param = s.map(|s| format!("&status={}", s.as_str())).unwrap_or_default();
            format!(
                r#"<a class="btn btn-outline-secondary btn-sm{active}" href="/records/appointments?date={day}{param}">{label}</a>"#,
                day = day.format(DATE_FORMAT),
            )
        })
        .collect();

    let body = format!(
        r#"{picker}<div class="btn-group mb-3">{filters}</div>
<p class="text-muted small">Schedule new appointments from the patient's record.</p>
{table}"#,
        picker = day_picker("/records/appointments", day, today),
        table = appointments_table(&rows, false, |a| appointment_actions(&staff, a, &back)),
    );
    Ok(layout("Appointments", &staff, &body))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleForm {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub reason: String,
}

fn parse_slot(date: &str, time: &str) -> Result<NaiveDateTime, DatabaseError> {
    let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
        .map_err(|_| DatabaseError::Validation("Pick an appointment date".into()))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .map_err(|_| DatabaseError::Validation("Pick an appointment time".into()))?;
    Ok(date.and_time(time))
}

/// `POST /records/appointments`
pub async fn schedule(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Form(form): Form<ScheduleForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let result = parse_slot(&form.date, &form.time).and_then(|scheduled_at| {
        repo::schedule_appointment(
            &conn,
            &NewAppointment {
                patient_id: form.patient_id,
                doctor_id: form.doctor_id,
                scheduled_at,
                reason: form.reason.clone(),
                created_by: staff.id(),
            },
        )
    });
    if result.is_ok() {
        ctx.core.log_access(&staff.actor(), "schedule_appointment", "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |a| format!("Appointment booked for {}", fmt_datetime(&a.scheduled_at)),
        &format!("/records/patients/{}#appointments", form.patient_id),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusChangeForm {
    pub return_to: Option<String>,
    pub reason: Option<String>,
}

/// `POST /records/appointments/:id/confirm`
pub async fn confirm(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<StatusChangeForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let result = repo::confirm_appointment(&conn, &id);
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Appointment confirmed".to_string(),
        local_path(form.return_to.as_deref(), "/records/appointments"),
    )
}

/// `POST /records/appointments/:id/cancel`
pub async fn cancel(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<StatusChangeForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let result = repo::cancel_appointment(&conn, &id, form.reason.as_deref());
    if result.is_ok() {
        ctx.core.log_access(&staff.actor(), &format!("cancel_appointment {id}"), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Appointment cancelled".to_string(),
        local_path(form.return_to.as_deref(), "/records/appointments"),
    )
}
