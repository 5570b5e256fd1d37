//! Server-side HTML building blocks shared by every page.
//!
//! Pages are plain `format!` strings. Anything that came from a user or
//! the database goes through [`escape_html`] before interpolation.

use axum::http::StatusCode;
use axum::response::Html;
use chrono::{NaiveDate, NaiveDateTime};

use crate::config::APP_NAME;
use crate::models::{Patient, StaffRole};
use crate::web::types::{Flash, FlashKind, StaffContext, CSRF_FIELD};

const BOOTSTRAP_CSS: &str = "https://cdn.jsdelivr.net/npm/bootstrap@5.3.3/dist/css/bootstrap.min.css";

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escaped value or a muted placeholder.
pub fn opt_text(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => escape_html(v),
        None => r#"<span class="text-muted">-</span>"#.to_string(),
    }
}

pub fn fmt_datetime(dt: &NaiveDateTime) -> String {
    dt.format("%d %b %Y %H:%M").to_string()
}

pub fn fmt_time(dt: &NaiveDateTime) -> String {
    dt.format("%H:%M").to_string()
}

pub fn fmt_date(d: &NaiveDate) -> String {
    d.format("%d %b %Y").to_string()
}

pub fn badge(label: &str, class: &str) -> String {
    format!(r#"<span class="badge {class}">{}</span>"#, escape_html(label))
}

pub fn csrf_input(token: &str) -> String {
    format!(
        r#"<input type="hidden" name="{CSRF_FIELD}" value="{}">"#,
        escape_html(token)
    )
}

/// `<option>` list; `selected` is compared against each value.
pub fn options<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>, selected: Option<&str>) -> String {
    items
        .into_iter()
        .map(|(value, label)| {
            let sel = if Some(value) == selected { " selected" } else { "" };
            format!(
                r#"<option value="{}"{sel}>{}</option>"#,
                escape_html(value),
                escape_html(label)
            )
        })
        .collect()
}

/// A small POST form rendering as one button, with optional confirm prompt.
pub fn action_button(
    action: &str,
    csrf_token: &str,
    label: &str,
    class: &str,
    confirm: Option<&str>,
) -> String {
    let confirm = confirm
        .map(|msg| format!(r#" data-confirm="{}""#, escape_html(msg)))
        .unwrap_or_default();
    format!(
        r#"<form method="post" action="{action}" class="d-inline"{confirm}>{csrf}<button type="submit" class="btn btn-sm {class}">{label}</button></form>"#,
        action = escape_html(action),
        csrf = csrf_input(csrf_token),
        label = escape_html(label),
    )
}

pub fn empty_row(colspan: usize, text: &str) -> String {
    format!(
        r#"<tr><td colspan="{colspan}" class="text-center text-muted py-3">{}</td></tr>"#,
        escape_html(text)
    )
}

/// Card with a headline number, for dashboards.
pub fn stat_card(label: &str, value: i64, class: &str) -> String {
    format!(
        r#"<div class="col-6 col-md-3"><div class="card border-{class} h-100"><div class="card-body">
<div class="text-muted small">{}</div><div class="fs-3 fw-semibold text-{class}">{value}</div>
</div></div></div>"#,
        escape_html(label)
    )
}

/// Live patient search. `app.js` fills the result list from
/// `/api/patients/search`.
pub fn patient_search_box() -> String {
    r#"<div class="position-relative mb-3">
<input type="search" class="form-control" placeholder="Search patients by name, hospital number or phone"
  autocomplete="off" data-patient-search data-results="patient-search-results">
<div id="patient-search-results" class="list-group position-absolute w-100 shadow-sm" style="z-index:10"></div>
</div>"#
        .to_string()
}

/// Tabbed panes. The first tab is shown unless the URL hash names another.
pub fn tabs(panes: &[(&str, &str, String)]) -> String {
    let mut nav = String::from(r#"<ul class="nav nav-tabs mb-3" role="tablist">"#);
    let mut body = String::new();
    for (i, (key, label, content)) in panes.iter().enumerate() {
        let active = if i == 0 { " active" } else { "" };
        let hidden = if i == 0 { "" } else { " d-none" };
        nav.push_str(&format!(
            r##"<li class="nav-item"><a class="nav-link{active}" href="#{key}" data-tab-target="tab-{key}">{label}</a></li>"##,
            label = escape_html(label),
        ));
        body.push_str(&format!(
            r#"<div class="tab-pane-panel{hidden}" id="tab-{key}" data-tab-pane>{content}</div>"#
        ));
    }
    nav.push_str("</ul>");
    format!("{nav}{body}")
}

/// Demographic banner shown on every patient page.
pub fn patient_banner(patient: &Patient, today: NaiveDate) -> String {
    let allergies = match patient.allergies.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        Some(a) => format!(
            r#"<div class="mt-2"><span class="badge bg-danger">Allergies</span> {}</div>"#,
            escape_html(a)
        ),
        None => String::new(),
    };
    format!(
        r#"<div class="card mb-3"><div class="card-body">
<div class="d-flex flex-wrap justify-content-between align-items-start gap-2">
<div><h2 class="h4 mb-1">{name}</h2>
<div class="text-muted">{hn} &middot; {age} yrs &middot; {gender} &middot; DOB {dob}</div></div>
<div class="text-end small"><div>Blood group: <strong>{blood}</strong></div><div>Genotype: <strong>{genotype}</strong></div></div>
</div>{allergies}</div></div>"#,
        name = escape_html(&patient.full_name()),
        hn = escape_html(&patient.hospital_number),
        age = patient.age_on(today),
        gender = patient.gender.label(),
        dob = fmt_date(&patient.date_of_birth),
        blood = opt_text(patient.blood_group.as_deref()),
        genotype = opt_text(patient.genotype.as_deref()),
    )
}

fn nav_links(role: StaffRole) -> &'static [(&'static str, &'static str)] {
    match role {
        StaffRole::RecordsKeeper => &[
            ("/records", "Dashboard"),
            ("/records/patients", "Patients"),
            ("/records/appointments", "Appointments"),
        ],
        StaffRole::Doctor => &[("/doctor", "Dashboard"), ("/doctor/appointments", "My appointments")],
        StaffRole::Nurse => &[("/nurse", "Dashboard"), ("/nurse/prescriptions", "Prescriptions")],
        StaffRole::LabScientist => &[("/lab", "Dashboard"), ("/lab/catalog", "Test catalog")],
        StaffRole::Admin => &[
            ("/admin", "Staff"),
            ("/records", "Records"),
            ("/doctor", "Doctor"),
            ("/nurse", "Nurse"),
            ("/lab", "Lab"),
        ],
    }
}

fn navbar(staff: &StaffContext) -> String {
    let links: String = nav_links(staff.role())
        .iter()
        .map(|(href, label)| {
            format!(r#"<li class="nav-item"><a class="nav-link" href="{href}">{label}</a></li>"#)
        })
        .collect();
    format!(
        r#"<nav class="navbar navbar-expand-md navbar-dark bg-primary mb-4">
<div class="container-fluid">
<a class="navbar-brand" href="/">{APP_NAME}</a>
<ul class="navbar-nav me-auto">{links}</ul>
<span class="navbar-text me-3"><a class="link-light" href="/account">{name}</a> &middot; {role}</span>
<form method="post" action="/logout" class="d-inline">{csrf}<button class="btn btn-outline-light btn-sm" type="submit">Sign out</button></form>
</div></nav>"#,
        name = escape_html(&staff.staff.full_name),
        role = staff.role().label(),
        csrf = csrf_input(&staff.csrf_token),
    )
}

pub fn flash_alert(flash: Option<&Flash>) -> String {
    match flash {
        Some(f) => {
            let class = match f.kind {
                FlashKind::Success => "alert-success",
                FlashKind::Error => "alert-danger",
            };
            format!(
                r#"<div class="alert {class}" role="alert">{}</div>"#,
                escape_html(&f.message)
            )
        }
        None => String::new(),
    }
}

fn document(title: &str, csrf: Option<&str>, header: &str, body: &str) -> String {
    let csrf_meta = csrf
        .map(|t| format!(r#"<meta name="csrf-token" content="{}">"#, escape_html(t)))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
{csrf_meta}
<title>{title} - {APP_NAME}</title>
<link rel="stylesheet" href="{BOOTSTRAP_CSS}">
</head>
<body class="bg-light">
{header}
<main class="container pb-5">
{body}
</main>
<script src="/static/app.js" defer></script>
</body>
</html>"#,
        title = escape_html(title),
    )
}

/// Full page for a signed-in user.
pub fn layout(title: &str, staff: &StaffContext, body: &str) -> Html<String> {
    let content = format!(
        r#"{flash}<h1 class="h3 mb-3">{title}</h1>{body}"#,
        flash = flash_alert(staff.flash.as_ref()),
        title = escape_html(title),
    );
    Html(document(title, Some(&staff.csrf_token), &navbar(staff), &content))
}

/// Page without navigation, used for sign-in.
pub fn bare_layout(title: &str, body: &str) -> Html<String> {
    Html(document(title, None, "", body))
}

pub fn error_page(status: StatusCode, title: &str, message: &str) -> String {
    let body = format!(
        r#"<div class="row justify-content-center mt-5"><div class="col-md-6">
<div class="card shadow-sm"><div class="card-body">
<h1 class="h4">{title}</h1>
<p class="text-muted mb-1">Error {code}</p>
<p>{message}</p>
<a class="btn btn-primary" href="/">Back to my dashboard</a>
</div></div></div></div>"#,
        title = escape_html(title),
        code = status.as_u16(),
        message = escape_html(message),
    );
    document(title, None, "", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::types::StaffIdentity;
    use uuid::Uuid;

    fn staff(role: StaffRole) -> StaffContext {
        StaffContext {
            session_id: "s".into(),
            staff: StaffIdentity {
                staff_id: Uuid::new_v4(),
                username: "ngozi".into(),
                full_name: "Ngozi <Eze>".into(),
                role,
            },
            csrf_token: "tok123".into(),
            flash: Some(Flash::error("Nope & nope")),
        }
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn layout_carries_csrf_nav_and_flash() {
        let Html(page) = layout("Dashboard", &staff(StaffRole::Nurse), "<p>body</p>");
        assert!(page.contains(r#"<meta name="csrf-token" content="tok123">"#));
        assert!(page.contains(r#"href="/nurse/prescriptions""#));
        assert!(page.contains("Ngozi &lt;Eze&gt;"));
        assert!(page.contains("alert-danger"));
        assert!(page.contains("Nope &amp; nope"));
        assert!(page.contains("/static/app.js"));
        assert!(page.contains("bootstrap"));
    }

    #[test]
    fn admin_nav_reaches_every_dashboard() {
        let Html(page) = layout("Staff", &staff(StaffRole::Admin), "");
        for path in ["/records", "/doctor", "/nurse", "/lab", "/admin"] {
            assert!(page.contains(&format!(r#"href="{path}""#)), "missing {path}");
        }
    }

    #[test]
    fn options_mark_selection() {
        let html = options([("a", "A"), ("b", "B")], Some("b"));
        assert!(html.contains(r#"<option value="b" selected>B</option>"#));
        assert!(html.contains(r#"<option value="a">A</option>"#));
    }

    #[test]
    fn action_button_has_csrf_and_confirm() {
        let html = action_button("/x/1/cancel", "tok", "Cancel", "btn-danger", Some("Sure?"));
        assert!(html.contains(r#"name="csrf_token" value="tok""#));
        assert!(html.contains(r#"data-confirm="Sure?""#));
        assert!(html.contains(r#"action="/x/1/cancel""#));
    }

    #[test]
    fn tabs_show_first_pane_only() {
        let html = tabs(&[("details", "Details", "A".into()), ("labs", "Labs", "B".into())]);
        assert!(html.contains(r#"id="tab-details" data-tab-pane>A"#));
        assert!(html.contains(r#"class="tab-pane-panel d-none" id="tab-labs""#));
    }

    #[test]
    fn opt_text_placeholder() {
        assert!(opt_text(None).contains("text-muted"));
        assert!(opt_text(Some("  ")).contains("text-muted"));
        assert_eq!(opt_text(Some("O+")), "O+");
    }
}
