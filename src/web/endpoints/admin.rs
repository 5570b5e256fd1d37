//! Administration: staff accounts and the access log.

use axum::extract::{Path, State};
use axum::response::{Html, Response};
use axum::{Extension, Form};
use serde::Deserialize;
use uuid::Uuid;

use super::{after_action, redirect_with};
use crate::crypto;
use crate::db::repository as repo;
use crate::db::DatabaseError;
use crate::models::{NewStaff, StaffRole};
use crate::web::error::WebError;
use crate::web::render::{
    action_button, badge, csrf_input, empty_row, escape_html, fmt_datetime, layout, opt_text, options, tabs,
};
use crate::web::types::{Flash, StaffContext, WebContext};

const AUDIT_PAGE: u32 = 200;

/// Hash a password off the async runtime.
pub(crate) async fn hash_blocking(password: String) -> Result<String, WebError> {
    tokio::task::spawn_blocking(move || crypto::hash_password(&password))
        .await
        .map_err(|e| WebError::Internal(format!("hash task failed: {e}")))?
        .map_err(WebError::from)
}

/// `GET /admin`
pub async fn dashboard(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    if let Err(e) = ctx.core.flush_and_prune_audit() {
        tracing::warn!("Audit flush before listing failed: {e}");
    }
    let conn = ctx.core.open_db()?;
    let accounts = repo::list_staff(&conn)?;
    let audit = repo::recent_audit_entries(&conn, AUDIT_PAGE)?;
    let csrf = &staff.csrf_token;

    let staff_rows: String = accounts
        .iter()
        .map(|s| {
            let status = if s.active {
                badge("Active", "bg-success")
            } else {
                badge("Disabled", "bg-secondary")
            };
            let toggle = if s.id == staff.id() {
                String::new()
            } else if s.active {
                action_button(
                    &format!("/admin/staff/{}/active", s.id),
                    csrf,
                    "Disable",
                    "btn-outline-danger",
                    Some("Disable this account and sign it out everywhere?"),
                )
            } else {
                action_button(&format!("/admin/staff/{}/active", s.id), csrf, "Enable", "btn-outline-success", None)
            };
            format!(
                r#"<tr><td>{name}<div class="small text-muted">{username}</div></td><td>{role}</td><td>{status}</td><td>{last}</td>
<td class="text-end">{toggle}
<form method="post" action="/admin/staff/{id}/password" class="d-inline-flex gap-1 ms-1" data-confirm="Reset this password?">{csrf_field}<input class="form-control form-control-sm" type="password" name="password" placeholder="New password" minlength="{min}" required><button class="btn btn-sm btn-outline-primary text-nowrap" type="submit">Reset</button></form></td></tr>"#,
                id = s.id,
                name = escape_html(&s.full_name),
                username = escape_html(&s.username),
                role = s.role.label(),
                last = s
                    .last_login_at
                    .map(|t| fmt_datetime(&t))
                    .unwrap_or_else(|| opt_text(None)),
                csrf_field = csrf_input(csrf),
                min = crypto::MIN_PASSWORD_LENGTH,
            )
        })
        .collect();

    let roles = options(StaffRole::ALL.iter().map(|r| (r.as_str(), r.label())), None);
    let staff_tab = format!(
        r#"<form method="post" action="/admin/staff" class="card card-body mb-3">{csrf_field}
<div class="row g-2 align-items-end">
<div class="col-md-2"><label class="form-label">Username</label><input class="form-control" name="username" required></div>
<div class="col-md-3"><label class="form-label">Full name</label><input class="form-control" name="full_name" required></div>
<div class="col-md-2"><label class="form-label">Role</label><select class="form-select" name="role">{roles}</select></div>
<div class="col-md-3"><label class="form-label">Initial password</label><input class="form-control" type="password" name="password" minlength="{min}" required></div>
<div class="col-md-2"><button class="btn btn-primary w-100" type="submit">Create</button></div>
</div></form>
<div class="table-responsive"><table class="table table-sm align-middle bg-white">
<thead><tr><th>Name</th><th>Role</th><th>Status</th><th>Last sign-in</th><th></th></tr></thead>
<tbody>{staff_rows}</tbody></table></div>"#,
        csrf_field = csrf_input(csrf),
        min = crypto::MIN_PASSWORD_LENGTH,
    );

    let audit_rows: String = if audit.is_empty() {
        empty_row(4, "No access recorded yet")
    } else {
        audit
            .iter()
            .map(|e| {
                format!(
                    "<tr><td class=\"text-nowrap\">{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape_html(&e.timestamp),
                    escape_html(&e.username),
                    escape_html(&e.action),
                    escape_html(&e.outcome),
                )
            })
            .collect()
    };
    let audit_tab = format!(
        r#"<div class="table-responsive"><table class="table table-sm small bg-white">
<thead><tr><th>Time</th><th>Staff</th><th>Action</th><th>Outcome</th></tr></thead>
<tbody>{audit_rows}</tbody></table></div>"#
    );

    let body = tabs(&[("staff", "Staff", staff_tab), ("audit", "Access log", audit_tab)]);
    Ok(layout("Administration", &staff, &body))
}

#[derive(Debug, Deserialize)]
pub struct NewStaffForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub password: String,
}

/// `POST /admin/staff`
pub async fn create_staff(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Form(form): Form<NewStaffForm>,
) -> Result<Response, WebError> {
    let role: StaffRole = match form.role.parse() {
        Ok(role) => role,
        Err(_) => return Ok(redirect_with(&ctx, &staff, "/admin", Flash::error("Select a role"))),
    };
    if let Err(e) = crypto::check_password_strength(&form.password) {
        return Ok(redirect_with(&ctx, &staff, "/admin", Flash::error(e.to_string())));
    }
    let password_hash = hash_blocking(form.password).await?;

    let conn = ctx.core.open_db()?;
    let result = repo::insert_staff(
        &conn,
        &NewStaff {
            username: form.username,
            full_name: form.full_name,
            role,
            password_hash,
        },
    );
    if let Ok(created) = &result {
        ctx.core
            .log_access(&staff.actor(), &format!("create_staff {}", created.username), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |s| format!("Created {} ({})", s.username, s.role.label()),
        "/admin",
    )
}

/// `POST /admin/staff/:id/active`: flip an account on or off. Disabling
/// ends the account's sessions.
pub async fn toggle_active(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, WebError> {
    if id == staff.id() {
        return Ok(redirect_with(
            &ctx,
            &staff,
            "/admin",
            Flash::error("You cannot disable your own account"),
        ));
    }
    let conn = ctx.core.open_db()?;
    let target = repo::get_staff(&conn, &id)?;
    let active = !target.active;
    let result = repo::set_staff_active(&conn, &id, active);
    if result.is_ok() && !active {
        let revoked = ctx
            .sessions
            .lock()
            .map(|mut s| s.revoke_staff(&id))
            .unwrap_or(0);
        tracing::info!(username = %target.username, revoked, "Staff account disabled");
    }
    if result.is_ok() {
        let action = if active { "enable_staff" } else { "disable_staff" };
        ctx.core
            .log_access(&staff.actor(), &format!("{action} {}", target.username), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |_| {
            if active {
                format!("{} enabled", target.username)
            } else {
                format!("{} disabled", target.username)
            }
        },
        "/admin",
    )
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub password: String,
}

/// `POST /admin/staff/:id/password`: set a new password and sign the
/// account out everywhere.
pub async fn reset_password(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Path(id): Path<Uuid>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Response, WebError> {
    if let Err(e) = crypto::check_password_strength(&form.password) {
        return Ok(redirect_with(&ctx, &staff, "/admin", Flash::error(e.to_string())));
    }
    let target = {
        let conn = ctx.core.open_db()?;
        repo::get_staff(&conn, &id)?
    };
    let password_hash = hash_blocking(form.password).await?;
    let conn = ctx.core.open_db()?;
    let result: Result<(), DatabaseError> = repo::update_staff_password(&conn, &id, &password_hash);
    if result.is_ok() {
        if let Ok(mut sessions) = ctx.sessions.lock() {
            sessions.revoke_staff(&id);
        }
        ctx.core
            .log_access(&staff.actor(), &format!("reset_password {}", target.username), "success");
    }
    after_action(
        &ctx,
        &staff,
        result,
        |_| format!("Password reset for {}", target.username),
        "/admin",
    )
}
