//! The signed-in user's own account.

use axum::extract::State;
use axum::response::{Html, Response};
use axum::{Extension, Form};
use serde::Deserialize;

use super::admin::hash_blocking;
use super::redirect_with;
use crate::crypto;
use crate::db::repository as repo;
use crate::web::error::WebError;
use crate::web::render::{csrf_input, escape_html, fmt_datetime, layout, opt_text};
use crate::web::types::{Flash, StaffContext, WebContext};

/// `GET /account`
pub async fn show(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
) -> Result<Html<String>, WebError> {
    let conn = ctx.core.open_db()?;
    let me = repo::get_staff(&conn, &staff.id())?;

    let body = format!(
        r#"<div class="row g-4">
<div class="col-md-5"><div class="card"><div class="card-body">
<dl class="row mb-0">
<dt class="col-5">Name</dt><dd class="col-7">{name}</dd>
<dt class="col-5">Username</dt><dd class="col-7">{username}</dd>
<dt class="col-5">Role</dt><dd class="col-7">{role}</dd>
<dt class="col-5">Last sign-in</dt><dd class="col-7">{last}</dd>
</dl></div></div></div>
<div class="col-md-7"><form method="post" action="/account/password" class="card card-body">{csrf}
<h2 class="h5">Change password</h2>
<div class="mb-2"><label class="form-label">Current password</label><input class="form-control" type="password" name="current_password" autocomplete="current-password" required></div>
<div class="mb-2"><label class="form-label">New password</label><input class="form-control" type="password" name="new_password" minlength="{min}" autocomplete="new-password" required></div>
<div class="mb-3"><label class="form-label">Confirm new password</label><input class="form-control" type="password" name="confirm_password" minlength="{min}" autocomplete="new-password" required></div>
<div><button class="btn btn-primary" type="submit">Update password</button></div>
</form></div></div>"#,
        name = escape_html(&me.full_name),
        username = escape_html(&me.username),
        role = me.role.label(),
        last = me
            .last_login_at
            .map(|t| fmt_datetime(&t))
            .unwrap_or_else(|| opt_text(None)),
        csrf = csrf_input(&staff.csrf_token),
        min = crypto::MIN_PASSWORD_LENGTH,
    );
    Ok(layout("My account", &staff, &body))
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// `POST /account/password`
pub async fn change_password(
    State(ctx): State<WebContext>,
    Extension(staff): Extension<StaffContext>,
    Form(form): Form<PasswordForm>,
) -> Result<Response, WebError> {
    let fail = |msg: String| -> Result<Response, WebError> {
        Ok(redirect_with(&ctx, &staff, "/account", Flash::error(msg)))
    };

    if form.new_password != form.confirm_password {
        return fail("New passwords do not match".into());
    }
    if let Err(e) = crypto::check_password_strength(&form.new_password) {
        return fail(e.to_string());
    }

    let stored = {
        let conn = ctx.core.open_db()?;
        repo::get_staff(&conn, &staff.id())?.password_hash
    };
    let current = form.current_password;
    let matches = tokio::task::spawn_blocking(move || crypto::verify_password(&current, &stored))
        .await
        .map_err(|e| WebError::Internal(format!("verify task failed: {e}")))??;
    if !matches {
        ctx.core
            .log_access(&staff.actor(), "change_password", "wrong_current_password");
        return fail("Current password is incorrect".into());
    }

    let hash = hash_blocking(form.new_password).await?;
    let conn = ctx.core.open_db()?;
    repo::update_staff_password(&conn, &staff.id(), &hash)?;
    ctx.core.log_access(&staff.actor(), "change_password", "success");
    Ok(redirect_with(
        &ctx,
        &staff,
        "/account",
        Flash::success("Password updated"),
    ))
}
