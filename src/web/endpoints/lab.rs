//! Lab scientist dashboard: work queues, sample collection, result entry,
//! the test catalog and blood request handling.

use axum::extract::{Path, State};
use axum::response::{Html, Response};
use axum::{Extension, Form};
use serde::Deserialize;
use uuid::Uuid;

use super::doctor::flag_class;
use super::shared::{blood_requests_table, form_value, test_requests_table};
use super::after_action;
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::{
    BloodRequestStatus, BloodRequestView, ItemResult, NewLabTest, ResultFlag, TestRequestDetail,
    TestRequestStatus,
};
use crate::web::error::WebError;
use crate::web::render::{
    action_button, badge, csrf_input, empty_row, escape_html, fmt_datetime, layout, opt_text, options,
    stat_card, tabs,
};
use crate::web::types::{StaffContext, WebContext};

const QUEUE_LIMIT: u32 = 100;

fn worksheet_link(r: &crate::models::TestRequestSummary) -> Option<String> {
    Some(format!("/lab/test-requests/{}", r.request.id))
}

/// `GET /lab`
pub async fn dashboard(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let pending = repo::list_test_requests_by_status(&conn, TestRequestStatus::Pending, QUEUE_LIMIT)?;
    let collected = repo::list_test_requests_by_status(&conn, TestRequestStatus::SampleCollected, QUEUE_LIMIT)?;
    let completed = repo::list_test_requests_by_status(&conn, TestRequestStatus::Completed, 20)?;
    let blood_pending = repo::list_blood_requests_by_status(&conn, BloodRequestStatus::Pending, QUEUE_LIMIT)?;
    let blood_approved = repo::list_blood_requests_by_status(&conn, BloodRequestStatus::Approved, QUEUE_LIMIT)?;
    let counts = repo::dashboard_counts(&conn, super::today())?;

    let cards = [
        stat_card("Awaiting sample", pending.len() as i64, "warning"),
        stat_card("In progress", collected.len() as i64, "info"),
        stat_card("Completed today", counts.tests_completed_today, "success"),
        stat_card("Blood requests open", (blood_pending.len() + blood_approved.len()) as i64, "danger"),
    ]
    .concat();

    let mut blood = blood_pending;
    blood.extend(blood_approved);

    let panes = [
        ("pending", "Awaiting sample", test_requests_table(&pending, worksheet_link)),
        ("collected", "Sample collected", test_requests_table(&collected, worksheet_link)),
        ("completed", "Recently completed", test_requests_table(&completed, worksheet_link)),
        ("blood", "Blood requests", blood_requests_table(&blood, |b| blood_actions(&staff, b))),
    ];
    let body = format!(r#"<div class="row g-3 mb-4">{cards}</div>{}"#, tabs(&panes));
    Ok(layout("Laboratory", &staff, &body))
}

fn blood_actions(staff: &StaffContext, b: &BloodRequestView) -> String {
    let id = b.request.id;
    let form = |action: &str, label: &str, class: &str, notes_placeholder: &str, confirm: &str| {
        format!(
            r#"<form method="post" action="/lab/blood-requests/{id}/{action}" class="d-flex gap-1 mb-1" data-confirm="{confirm}">{csrf}<input class="form-control form-control-sm" name="notes" placeholder="{notes_placeholder}"><button class="btn btn-sm {class} text-nowrap" type="submit">{label}</button></form>"#,
            csrf = csrf_input(&staff.csrf_token),
        )
    };
    match b.request.status {
        BloodRequestStatus::Pending => format!(
            "{}{}",
            form("approve", "Approve", "btn-success", "Crossmatch notes", "Approve this request?"),
            form("reject", "Reject", "btn-outline-danger", "Reason (required)", "Reject this request?"),
        ),
        BloodRequestStatus::Approved => {
            form("issue", "Issue", "btn-primary", "Unit numbers", "Issue blood for this request?")
        }
        _ => String::new(),
    }
}

/// `GET /lab/test-requests/:id`: the worksheet.
pub async fn worksheet(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let detail = repo::get_test_request(&conn, &id)?;
    let req = &detail.request;

    let action = match req.status {
        TestRequestStatus::Pending => action_button(
            &format!("/lab/test-requests/{id}/collect"),
            &staff.csrf_token,
            "Mark sample collected",
            "btn-primary",
            None,
        ),
        TestRequestStatus::SampleCollected => results_form(&staff, &detail),
        _ => String::new(),
    };

    let rows: String = detail
        .items
        .iter()
        .map(|item| {
            format!(
                "<tr><td>{name}<div class=\"small text-muted\">{code}</div></td><td>{sample}</td><td>{value}</td><td>{flag}</td><td>{range}</td></tr>",
                name = escape_html(&item.test_name),
                code = escape_html(&item.test_code),
                sample = escape_html(&item.sample_type),
                value = opt_text(item.result_value.as_deref()),
                flag = item.result_flag.map(|f| badge(f.label(), flag_class(f))).unwrap_or_default(),
                range = opt_text(item.reference_range.as_deref()),
            )
        })
        .collect();

    let collected = req
        .sample_collected_at
        .map(|t| format!(" &middot; sample collected {}", fmt_datetime(&t)))
        .unwrap_or_default();
    let body = format!(
        r#"<div class="card mb-3"><div class="card-body">
<div class="d-flex justify-content-between"><div><strong>{patient}</strong> <span class="text-muted">{hn}</span></div>{status}</div>
<div class="small text-muted">Requested {requested} by {doctor} &middot; {priority}{collected}</div>
<p class="mb-0 mt-2">{notes}</p></div></div>
<div class="table-responsive"><table class="table table-sm bg-white">
<thead><tr><th>Test</th><th>Sample</th><th>Result</th><th>Flag</th><th>Reference</th></tr></thead>
<tbody>{rows}</tbody></table></div>
{action}"#,
        patient = escape_html(&detail.patient_name),
        hn = escape_html(&detail.hospital_number),
        status = badge(req.status.label(), req.status.badge_class()),
        requested = fmt_datetime(&req.requested_at),
        doctor = escape_html(&detail.doctor_name),
        priority = req.priority.label(),
        notes = opt_text(req.clinical_notes.as_deref()),
    );
    Ok(layout("Worksheet", &staff, &body))
}

fn results_form(staff: &StaffContext, detail: &TestRequestDetail) -> String {
    let rows: String = detail
        .items
        .iter()
        .map(|item| {
            let flags = options(
                ResultFlag::ALL.iter().map(|f| (f.as_str(), f.label())),
                item.result_flag.map(|f| f.as_str()),
            );
            format!(
                r#"<tr><td>{name}<div class="small text-muted">{range} {unit}</div></td>
<td><input class="form-control form-control-sm" name="value_{id}" value="{value}"></td>
<td><select class="form-select form-select-sm" name="flag_{id}">{flags}</select></td>
<td><input class="form-control form-control-sm" name="comment_{id}" value="{comment}"></td></tr>"#,
                id = item.id,
                name = escape_html(&item.test_name),
                range = item.reference_range.as_deref().map(escape_html).unwrap_or_default(),
                unit = item.unit.as_deref().map(escape_html).unwrap_or_default(),
                value = item.result_value.as_deref().map(escape_html).unwrap_or_default(),
                comment = item.result_comment.as_deref().map(escape_html).unwrap_or_default(),
            )
        })
        .collect();
    format!(
        r#"<form method="post" action="/lab/test-requests/{id}/results" class="card card-body">{csrf}
<h2 class="h6">Enter results</h2>
<p class="small text-muted">Leave a value blank to enter it later. The request completes once every test has a result.</p>
<table class="table table-sm"><thead><tr><th>Test</th><th>Value</th><th>Flag</th><th>Comment</th></tr></thead><tbody>{rows}</tbody></table>
<div><button class="btn btn-success" type="submit">Save results</button></div></form>"#,
        id = detail.request.id,
        csrf = csrf_input(&staff.csrf_token),
    )
}

/// `POST /lab/test-requests/:id/collect`
pub async fn collect(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let result = repo::collect_sample(&conn, &id, &staff.id());
    after_action(
        &ctx,
        &staff,
        result,
        |_| "Sample collected".to_string(),
        &format!("/lab/test-requests/{id}"),
    )
}

/// Pick the filled-in result rows out of the worksheet form.
fn parse_results(detail: &TestRequestDetail, fields: &[(String, String)]) -> Result<Vec<ItemResult>, DatabaseError> {
    let mut results = Vec::new();
    for item in &detail.items {
        let value = match form_value(fields, &format!("value_{}", item.id)).map(str::trim) {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => continue,
        };
        let flag = match form_value(fields, &format!("flag_{}", item.id)).map(str::trim) {
            Some(f) if !f.is_empty() => f
                .parse()
                .map_err(|_| DatabaseError::Validation(format!("Unknown flag '{f}'")))?,
            _ => ResultFlag::Normal,
        };
        results.push(ItemResult {
            item_id: item.id,
            value,
            flag,
            comment: form_value(fields, &format!("comment_{}", item.id))
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        });
    }
    Ok(results)
}

/// `POST /lab/test-requests/:id/results`
pub async fn record_results(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(fields): Form<Vec<(String, String)>>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let detail = repo::get_test_request(&conn, &id)?;
    let result = parse_results(&detail, &fields)
        .and_then(|results| repo::record_results(&conn, &id, &staff.id(), &results));
    if result.is_ok() {
        ctx.core.log_access(&staff.actor(), &format!("record_results {id}"), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |d| {
            if d.request.status == TestRequestStatus::Completed {
                "Results saved; request completed".to_string()
            } else {
                "Results saved".to_string()
            }
        },
        &format!("/lab/test-requests/{id}"),
    )
}

/// `GET /lab/catalog`
pub async fn catalog(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let tests = repo::list_lab_tests(&conn, false)?;
    let rows: String = if tests.is_empty() {
        empty_row(6, "The catalog is empty")
    } else {
        tests
            .iter()
            .map(|t| {
                let (status, label, class) = if t.active {
                    (badge("Active", "bg-success"), "Retire", "btn-outline-secondary")
                } else {
                    (badge("Retired", "bg-secondary"), "Reactivate", "btn-outline-success")
                };
                format!(
                    "<tr><td><code>{code}</code></td><td>{name}</td><td>{sample}</td><td>{unit}</td><td>{range}</td><td>{status}</td><td class=\"text-end\">{toggle}</td></tr>",
                    code = escape_html(&t.code),
                    name = escape_html(&t.name),
                    sample = escape_html(&t.sample_type),
                    unit = opt_text(t.unit.as_deref()),
                    range = opt_text(t.reference_range.as_deref()),
                    toggle = action_button(&format!("/lab/catalog/{}/toggle", t.id), &staff.csrf_token, label, class, None),
                )
            })
            .collect()
    };
    let body = format!(
        r#"<form method="post" action="/lab/catalog" class="card card-body mb-3">{csrf}
<div class="row g-2 align-items-end">
<div class="col-md-2"><label class="form-label">Code</label><input class="form-control" name="code" maxlength="16" required></div>
<div class="col-md-3"><label class="form-label">Name</label><input class="form-control" name="name" required></div>
<div class="col-md-2"><label class="form-label">Sample</label><input class="form-control" name="sample_type" required></div>
<div class="col-md-1"><label class="form-label">Unit</label><input class="form-control" name="unit"></div>
<div class="col-md-2"><label class="form-label">Reference</label><input class="form-control" name="reference_range"></div>
<div class="col-md-2"><button class="btn btn-primary w-100" type="submit">Add test</button></div>
</div></form>
<div class="table-responsive"><table class="table table-sm align-middle bg-white">
<thead><tr><th>Code</th><th>Name</th><th>Sample</th><th>Unit</th><th>Reference</th><th>Status</th><th></th></tr></thead>
<tbody>{rows}</tbody></table></div>"#,
        csrf = csrf_input(&staff.csrf_token),
    );
    Ok(layout("Test catalog", &staff, &body))
}

#[derive(Debug, Deserialize)]
pub struct LabTestForm {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sample_type: String,
    pub unit: Option<String>,
    pub reference_range: Option<String>,
}

/// `POST /lab/catalog`
pub async fn add_test(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Form(form): Form<LabTestForm>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let result = repo::insert_lab_test(
        &conn,
        &NewLabTest {
            code: form.code,
            name: form.name,
            sample_type: form.sample_type,
            unit: form.unit,
            reference_range: form.reference_range,
        },
    );
    after_action(&ctx, &staff, result, |t| format!("Added {} to the catalog", t.code), "/lab/catalog")
}

/// `POST /lab/catalog/:id/toggle`
pub async fn toggle_test(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, WebError> {
    let conn = ctx.core.open_db()?;
    let test = repo::get_lab_test(&conn, &id)?;
    let result = repo::set_lab_test_active(&conn, &id, !test.active);
    after_action(
        &ctx,
        &staff,
        result,
        |_| {
            if test.active {
                format!("{} retired", test.code)
            } else {
                format!("{} reactivated", test.code)
            }
        },
        "/lab/catalog",
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct BloodDecisionForm {
    pub notes: Option<String>,
}

fn blood_target(action: &str) -> Option<BloodRequestStatus> {
    match action {
        "approve" => Some(BloodRequestStatus::Approved),
        "issue" => Some(BloodRequestStatus::Issued),
        "reject" => Some(BloodRequestStatus::Rejected),
        _ => None,
    }
}

/// `POST /lab/blood-requests/:id/:action` for approve, issue and reject.
pub async fn blood_transition(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path((id, action)): Path<(Uuid, String)>,
    Form(form): Form<BloodDecisionForm>,
) -> Result<Response, WebError> {
    let to = blood_target(&action).ok_or_else(|| WebError::NotFound("Unknown blood request action.".into()))?;
    let notes = form.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let conn = ctx.core.open_db()?;
    let result = if to == BloodRequestStatus::Rejected && notes.is_none() {
        Err(DatabaseError::Validation("Give a reason when rejecting a blood request".into()))
    } else {
        repo::transition_blood_request(&conn, &id, to, &staff.id(), notes)
    };
    if result.is_ok() {
        ctx.core
            .log_access(&staff.actor(), &format!("blood_request {id} {}", to.as_str()), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |r| format!("Blood request {}", r.status.label().to_lowercase()),
        "/lab#blood",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestPriority, TestRequest, TestRequestItem};

    fn detail_with(items: Vec<TestRequestItem>) -> TestRequestDetail {
        let now = chrono::NaiveDateTime::default();
        TestRequestDetail {
            request: TestRequest {
                id: Uuid::new_v4(),
                patient_id: Uuid::new_v4(),
                doctor_id: Uuid::new_v4(),
                priority: TestPriority::Routine,
                clinical_notes: None,
                status: TestRequestStatus::SampleCollected,
                requested_at: now,
                sample_collected_at: Some(now),
                collected_by: None,
                completed_at: None,
                completed_by: None,
            },
            patient_name: "Ada Obi".into(),
            hospital_number: "HN-2024-00001".into(),
            doctor_name: "Dr".into(),
            items,
        }
    }

    fn item(code: &str) -> TestRequestItem {
        TestRequestItem {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            lab_test_id: Uuid::new_v4(),
            test_code: code.into(),
            test_name: code.into(),
            sample_type: "Serum".into(),
            unit: None,
            reference_range: None,
            result_value: None,
            result_flag: None,
            result_comment: None,
            resulted_at: None,
        }
    }

    #[test]
    fn blank_values_are_skipped() {
        let detail = detail_with(vec![item("HB"), item("MP")]);
        let hb = detail.items[0].id;
        let mp = detail.items[1].id;
        let fields = vec![
            (format!("value_{hb}"), "13.1".to_string()),
            (format!("flag_{hb}"), "normal".to_string()),
            (format!("comment_{hb}"), "".to_string()),
            (format!("value_{mp}"), "  ".to_string()),
            (format!("flag_{mp}"), "high".to_string()),
        ];
        let results = parse_results(&detail, &fields).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item_id, hb);
        assert_eq!(results[0].flag, ResultFlag::Normal);
        assert_eq!(results[0].comment, None);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let detail = detail_with(vec![item("HB")]);
        let hb = detail.items[0].id;
        let fields = vec![
            (format!("value_{hb}"), "3".to_string()),
            (format!("flag_{hb}"), "weird".to_string()),
        ];
        assert!(matches!(parse_results(&detail, &fields), Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn blood_actions_map_to_statuses() {
        assert_eq!(blood_target("approve"), Some(BloodRequestStatus::Approved));
        assert_eq!(blood_target("issue"), Some(BloodRequestStatus::Issued));
        assert_eq!(blood_target("reject"), Some(BloodRequestStatus::Rejected));
        assert_eq!(blood_target("cancel"), None);
    }
}
