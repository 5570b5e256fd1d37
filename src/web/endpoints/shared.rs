//! Tables and fragments reused across dashboards.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::DATE_FORMAT;
use crate::models::{
    AppointmentView, BloodRequestView, PrescriptionView, TestRequestSummary, VitalsView,
};
use crate::web::render::{badge, empty_row, escape_html, fmt_date, fmt_datetime, fmt_time, opt_text};

/// `?date=YYYY-MM-DD` query, defaulting to today.
#[derive(Debug, Default, Deserialize)]
pub struct DayQuery {
    pub date: Option<String>,
    pub status: Option<String>,
}

impl DayQuery {
    pub fn day(&self, today: NaiveDate) -> NaiveDate {
        self.date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d.trim(), DATE_FORMAT).ok())
            .unwrap_or(today)
    }
}

/// Previous / today / next links plus a date picker for a day listing.
pub fn day_picker(base: &str, day: NaiveDate, today: NaiveDate) -> String {
    let prev = day.pred_opt().unwrap_or(day);
    let next = day.succ_opt().unwrap_or(day);
    format!(
        r#"<form class="d-flex flex-wrap gap-2 align-items-center mb-3" method="get" action="{base}">
<a class="btn btn-outline-secondary btn-sm" href="{base}?date={prev}">&laquo; Previous</a>
<a class="btn btn-outline-secondary btn-sm" href="{base}?date={today}">Today</a>
<a class="btn btn-outline-secondary btn-sm" href="{base}?date={next}">Next &raquo;</a>
<input class="form-control form-control-sm w-auto" type="date" name="date" value="{day}">
<button class="btn btn-sm btn-primary" type="submit">Go</button>
<span class="ms-2 fw-semibold">{label}</span>
</form>"#,
        prev = prev.format(DATE_FORMAT),
        next = next.format(DATE_FORMAT),
        today = today.format(DATE_FORMAT),
        day = day.format(DATE_FORMAT),
        label = fmt_date(&day),
    )
}

/// Appointment rows. `actions` renders the last column for each row.
pub fn appointments_table(
    rows: &[AppointmentView],
    show_date: bool,
    actions: impl Fn(&AppointmentView) -> String,
) -> String {
    let body: String = if rows.is_empty() {
        empty_row(6, "No appointments")
    } else {
        rows.iter()
            .map(|a| {
                let when = if show_date {
                    fmt_datetime(&a.appointment.scheduled_at)
                } else {
                    fmt_time(&a.appointment.scheduled_at)
                };
                format!(
                    "<tr><td>{when}</td><td>{patient}<div class=\"small text-muted\">{hn}</div></td>\
                     <td>{doctor}</td><td>{reason}</td><td>{status}</td><td class=\"text-end\">{actions}</td></tr>",
                    patient = escape_html(&a.patient_name),
                    hn = escape_html(&a.hospital_number),
                    doctor = escape_html(&a.doctor_name),
                    reason = escape_html(&a.appointment.reason),
                    status = badge(a.appointment.status.label(), a.appointment.status.badge_class()),
                    actions = actions(a),
                )
            })
            .collect()
    };
    format!(
        r#"<div class="table-responsive"><table class="table table-sm align-middle bg-white">
<thead><tr><th>When</th><th>Patient</th><th>Doctor</th><th>Reason</th><th>Status</th><th></th></tr></thead>
<tbody>{body}</tbody></table></div>"#
    )
}

pub fn vitals_table(rows: &[VitalsView]) -> String {
    let body: String = if rows.is_empty() {
        empty_row(9, "No vitals recorded")
    } else {
        rows.iter()
            .map(|row| {
                let v = &row.vitals;
                format!(
                    "<tr><td>{when}</td><td>{temp}</td><td>{bp}</td><td>{pulse}</td><td>{rr}</td>\
                     <td>{spo2}</td><td>{weight}</td><td>{bmi}</td><td>{by}<div class=\"small text-muted\">{notes}</div></td></tr>",
                    when = fmt_datetime(&v.recorded_at),
                    temp = num(v.temperature_c.map(|t| format!("{t:.1} °C"))),
                    bp = num(v.blood_pressure()),
                    pulse = num(v.pulse_bpm.map(|p| p.to_string())),
                    rr = num(v.respiratory_rate.map(|r| r.to_string())),
                    spo2 = num(v.oxygen_saturation.map(|s| format!("{s}%"))),
                    weight = num(v.weight_kg.map(|w| format!("{w:.1} kg"))),
                    bmi = num(v.bmi().map(|b| format!("{b:.1}"))),
                    by = escape_html(&row.recorded_by_name),
                    notes = v.notes.as_deref().map(escape_html).unwrap_or_default(),
                )
            })
            .collect()
    };
    format!(
        r#"<div class="table-responsive"><table class="table table-sm bg-white">
<thead><tr><th>Recorded</th><th>Temp</th><th>BP</th><th>Pulse</th><th>Resp.</th><th>SpO2</th><th>Weight</th><th>BMI</th><th>By</th></tr></thead>
<tbody>{body}</tbody></table></div>"#
    )
}

fn num(value: Option<String>) -> String {
    opt_text(value.as_deref())
}

/// Test request rows; `link` gives the page each row opens, if any.
pub fn test_requests_table(
    rows: &[TestRequestSummary],
    link: impl Fn(&TestRequestSummary) -> Option<String>,
) -> String {
    let body: String = if rows.is_empty() {
        empty_row(6, "No test requests")
    } else {
        rows.iter()
            .map(|r| {
                let priority = match r.request.priority {
                    crate::models::TestPriority::Urgent => badge("Urgent", "bg-danger"),
                    crate::models::TestPriority::Routine => String::new(),
                };
                format!(
                    "<tr><td>{when}</td><td>{patient}<div class=\"small text-muted\">{hn}</div></td>\
                     <td>{tests} {priority}</td><td>{doctor}</td><td>{status}</td>\
                     <td class=\"text-end\">{open}</td></tr>",
                    when = fmt_datetime(&r.request.requested_at),
                    patient = escape_html(&r.patient_name),
                    hn = escape_html(&r.hospital_number),
                    tests = escape_html(&r.test_names),
                    doctor = escape_html(&r.doctor_name),
                    status = badge(r.request.status.label(), r.request.status.badge_class()),
                    open = link(r)
                        .map(|href| format!(
                            "<a class=\"btn btn-sm btn-outline-primary\" href=\"{}\">Open</a>",
                            escape_html(&href)
                        ))
                        .unwrap_or_default(),
                )
            })
            .collect()
    };
    format!(
        r#"<div class="table-responsive"><table class="table table-sm align-middle bg-white">
<thead><tr><th>Requested</th><th>Patient</th><th>Tests</th><th>Doctor</th><th>Status</th><th></th></tr></thead>
<tbody>{body}</tbody></table></div>"#
    )
}

pub fn prescriptions_table(rows: &[PrescriptionView], actions: impl Fn(&PrescriptionView) -> String) -> String {
    let body: String = if rows.is_empty() {
        empty_row(6, "No prescriptions")
    } else {
        rows.iter()
            .map(|row| {
                let p = &row.prescription;
                let status_class = match p.status {
                    crate::models::PrescriptionStatus::Active => "bg-success",
                    crate::models::PrescriptionStatus::Completed => "bg-secondary",
                    crate::models::PrescriptionStatus::Discontinued => "bg-danger",
                };
                format!(
                    "<tr><td>{when}</td><td>{patient}<div class=\"small text-muted\">{hn}</div></td>\
                     <td><strong>{med}</strong> {dosage}<div class=\"small\">{freq} {duration}</div>\
                     <div class=\"small text-muted\">{instructions}</div></td><td>{doctor}</td>\
                     <td>{status}</td><td class=\"text-end\">{actions}</td></tr>",
                    when = fmt_datetime(&p.prescribed_at),
                    patient = escape_html(&row.patient_name),
                    hn = escape_html(&row.hospital_number),
                    med = escape_html(&p.medication),
                    dosage = escape_html(&p.dosage),
                    freq = escape_html(&p.frequency),
                    duration = p.duration.as_deref().map(|d| format!("for {}", escape_html(d))).unwrap_or_default(),
                    instructions = p.instructions.as_deref().map(escape_html).unwrap_or_default(),
                    doctor = escape_html(&row.doctor_name),
                    status = badge(p.status.label(), status_class),
                    actions = actions(row),
                )
            })
            .collect()
    };
    format!(
        r#"<div class="table-responsive"><table class="table table-sm align-middle bg-white">
<thead><tr><th>Prescribed</th><th>Patient</th><th>Medication</th><th>Doctor</th><th>Status</th><th></th></tr></thead>
<tbody>{body}</tbody></table></div>"#
    )
}

pub fn blood_requests_table(rows: &[BloodRequestView], actions: impl Fn(&BloodRequestView) -> String) -> String {
    let body: String = if rows.is_empty() {
        empty_row(7, "No blood requests")
    } else {
        rows.iter()
            .map(|row| {
                let r = &row.request;
                let urgency_class = match r.urgency {
                    crate::models::BloodUrgency::Emergency => "bg-danger",
                    crate::models::BloodUrgency::Urgent => "bg-warning text-dark",
                    crate::models::BloodUrgency::Routine => "bg-light text-dark",
                };
                format!(
                    "<tr><td>{when}</td><td>{patient}<div class=\"small text-muted\">{hn}</div></td>\
                     <td><strong>{group}</strong> &times; {units}</td><td>{urgency}<div class=\"small\">{indication}</div></td>\
                     <td>{doctor}</td><td>{status}<div class=\"small text-muted\">{notes}</div></td>\
                     <td class=\"text-end\">{actions}</td></tr>",
                    when = fmt_datetime(&r.requested_at),
                    patient = escape_html(&row.patient_name),
                    hn = escape_html(&row.hospital_number),
                    group = escape_html(&r.blood_group),
                    units = r.units,
                    urgency = badge(r.urgency.label(), urgency_class),
                    indication = escape_html(&r.indication),
                    doctor = escape_html(&row.doctor_name),
                    status = badge(r.status.label(), r.status.badge_class()),
                    notes = r.lab_notes.as_deref().map(escape_html).unwrap_or_default(),
                    actions = actions(row),
                )
            })
            .collect()
    };
    format!(
        r#"<div class="table-responsive"><table class="table table-sm align-middle bg-white">
<thead><tr><th>Requested</th><th>Patient</th><th>Blood</th><th>Urgency</th><th>Doctor</th><th>Status</th><th></th></tr></thead>
<tbody>{body}</tbody></table></div>"#
    )
}

/// Collapse a multi-value form body into a list of values for `name`.
pub fn form_values<'a>(fields: &'a [(String, String)], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    fields
        .iter()
        .filter(move |(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// First value of `name` in a multi-value form body.
pub fn form_value<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_query_falls_back_to_today() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(DayQuery::default().day(today), today);
        let q = DayQuery {
            date: Some("2024-05-09".into()),
            status: None,
        };
        assert_eq!(q.day(today), NaiveDate::from_ymd_opt(2024, 5, 9).unwrap());
        let bad = DayQuery {
            date: Some("09/05/2024".into()),
            status: None,
        };
        assert_eq!(bad.day(today), today);
    }

    #[test]
    fn day_picker_links_neighbours() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let html = day_picker("/records/appointments", day, day);
        assert!(html.contains("?date=2024-02-29"));
        assert!(html.contains("?date=2024-03-02"));
    }

    #[test]
    fn multi_value_fields() {
        let fields = vec![
            ("lab_test_id".to_string(), "a".to_string()),
            ("priority".to_string(), "urgent".to_string()),
            ("lab_test_id".to_string(), "b".to_string()),
        ];
        assert_eq!(form_values(&fields, "lab_test_id").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(form_value(&fields, "priority"), Some("urgent"));
        assert_eq!(form_value(&fields, "missing"), None);
    }

    #[test]
    fn empty_tables_say_so() {
        assert!(vitals_table(&[]).contains("No vitals recorded"));
        assert!(appointments_table(&[], false, |_| String::new()).contains("No appointments"));
    }
}
