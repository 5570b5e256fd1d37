//! Sign-in and sign-out.
//!
//! The login form is protected by a CSRF token held in an anonymous
//! session. A successful sign-in discards that session and issues a new
//! id, so a session id seen before authentication is never reused.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::core_state::{Actor, CoreError};
use crate::crypto;
use crate::db::repository as repo;
use crate::models::Staff;
use crate::web::error::WebError;
use crate::web::render::{bare_layout, csrf_input, escape_html};
use crate::web::types::{clear_session_cookie, session_id_from_headers, StaffIdentity, WebContext};

const BAD_CREDENTIALS: &str = "Invalid username or password";

fn login_page(csrf_token: &str, username: &str, error: Option<&str>) -> String {
    let alert = error
        .map(|e| format!(r#"<div class="alert alert-danger" role="alert">{}</div>"#, escape_html(e)))
        .unwrap_or_default();
    let body = format!(
        r#"<div class="row justify-content-center mt-5"><div class="col-sm-8 col-md-5 col-lg-4">
<div class="card shadow-sm"><div class="card-body p-4">
<h1 class="h4 mb-3 text-center">{app}</h1>
{alert}
<form method="post" action="/login">{csrf}
<div class="mb-3"><label class="form-label" for="username">Username</label>
<input class="form-control" id="username" name="username" value="{username}" autocomplete="username" required autofocus></div>
<div class="mb-3"><label class="form-label" for="password">Password</label>
<input class="form-control" id="password" type="password" name="password" autocomplete="current-password" required></div>
<button class="btn btn-primary w-100" type="submit">Sign in</button>
</form>
</div></div></div></div>"#,
        app = crate::config::APP_NAME,
        csrf = csrf_input(csrf_token),
        username = escape_html(username),
    );
    bare_layout("Sign in", &body).0
}

/// `GET /login`
///
/// Signed-in staff go straight to their dashboard. Everyone else gets
/// the form, bound to a (possibly new) anonymous session.
pub async fn login_form(State(ctx): State<WebContext>, headers: HeaderMap) -> Result<Response, WebError> {
    let existing = session_id_from_headers(&headers);
    let (session_id, csrf_token, is_new) = {
        let mut sessions = ctx.sessions.lock().map_err(|_| CoreError::LockPoisoned)?;
        match existing.as_deref().and_then(|id| sessions.touch(id).map(|s| (id, s))) {
            Some((_, session)) if session.staff.is_some() => {
                let path = session.staff.as_ref().map(|s| s.role.dashboard_path()).unwrap_or("/");
                return Ok(Redirect::to(path).into_response());
            }
            Some((id, session)) => (id.to_string(), session.csrf_token.clone(), false),
            None => {
                let id = sessions.create_anonymous();
                let token = sessions
                    .touch(&id)
                    .map(|s| s.csrf_token.clone())
                    .ok_or_else(|| WebError::Internal("new session vanished".into()))?;
                (id, token, true)
            }
        }
    };

    let page = login_page(&csrf_token, "", None);
    let mut response = axum::response::Html(page).into_response();
    if is_new {
        response
            .headers_mut()
            .insert(header::SET_COOKIE, ctx.session_cookie(&session_id));
    }
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, axum::http::HeaderValue::from_static("no-store"));
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub csrf_token: String,
}

async fn verify_blocking(password: String, stored: String) -> Result<bool, WebError> {
    let outcome = tokio::task::spawn_blocking(move || crypto::verify_password(&password, &stored))
        .await
        .map_err(|e| WebError::Internal(format!("verify task failed: {e}")))?;
    match outcome {
        Ok(ok) => Ok(ok),
        Err(e) => {
            tracing::warn!("Password check failed: {e}");
            Ok(false)
        }
    }
}

/// `POST /login`
pub async fn login(
    State(ctx): State<WebContext>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, WebError> {
    let session_id = session_id_from_headers(&headers).ok_or(WebError::CsrfInvalid)?;
    let csrf_token = {
        let mut sessions = ctx.sessions.lock().map_err(|_| CoreError::LockPoisoned)?;
        let session = sessions.touch(&session_id).ok_or(WebError::CsrfInvalid)?;
        if !session.csrf_matches(&form.csrf_token) {
            tracing::warn!("Login form CSRF token rejected");
            return Err(WebError::CsrfInvalid);
        }
        session.csrf_token.clone()
    };

    let username = form.username.trim().to_lowercase();
    let rejected = |status: StatusCode, message: &str| {
        (status, axum::response::Html(login_page(&csrf_token, &username, Some(message)))).into_response()
    };

    let locked = ctx
        .login_lockout
        .lock()
        .map_err(|_| CoreError::LockPoisoned)?
        .locked_for(&username);
    if let Some(secs) = locked {
        ctx.core
            .log_access(&Actor::Anonymous, &format!("login {username}"), "locked");
        let minutes = secs.div_ceil(60);
        return Ok(rejected(
            StatusCode::TOO_MANY_REQUESTS,
            &format!("Too many failed attempts. Try again in {minutes} minute(s)."),
        ));
    }

    let staff: Option<Staff> = {
        let conn = ctx.core.open_db()?;
        repo::find_staff_by_username(&conn, &username)?
    };
    let verified = match &staff {
        Some(s) if s.active => verify_blocking(form.password, s.password_hash.clone()).await?,
        _ => false,
    };

    let Some(staff) = staff.filter(|_| verified) else {
        let now_locked = ctx
            .login_lockout
            .lock()
            .map_err(|_| CoreError::LockPoisoned)?
            .record_failure(&username);
        if now_locked {
            tracing::warn!(username = %username, "Username locked after repeated failures");
        }
        ctx.core
            .log_access(&Actor::Anonymous, &format!("login {username}"), "failed");
        return Ok(rejected(StatusCode::UNAUTHORIZED, BAD_CREDENTIALS));
    };

    {
        let conn = ctx.core.open_db()?;
        repo::record_login(&conn, &staff.id)?;
    }
    if let Ok(mut lockout) = ctx.login_lockout.lock() {
        lockout.clear(&username);
    }

    let identity = StaffIdentity {
        staff_id: staff.id,
        username: staff.username.clone(),
        full_name: staff.full_name.clone(),
        role: staff.role,
    };
    let new_id = ctx
        .sessions
        .lock()
        .map_err(|_| CoreError::LockPoisoned)?
        .login(Some(&session_id), identity);

    let actor = Actor::Staff {
        id: staff.id,
        username: staff.username.clone(),
    };
    ctx.core.log_access(&actor, "login", "success");
    tracing::info!(username = %staff.username, role = staff.role.as_str(), "Staff signed in");

    let mut response = Redirect::to(staff.role.dashboard_path()).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, ctx.session_cookie(&new_id));
    Ok(response)
}

/// `POST /logout`: runs behind the session middleware, so the CSRF token
/// has already been checked.
pub async fn logout(
    State(ctx): State<WebContext>,
    axum::Extension(staff): axum::Extension<crate::web::types::StaffContext>,
) -> Result<Response, WebError> {
    ctx.sessions
        .lock()
        .map_err(|_| CoreError::LockPoisoned)?
        .remove(&staff.session_id);
    ctx.core.log_access(&staff.actor(), "logout", "success");

    let mut response = Redirect::to("/login").into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_page_escapes_username_and_carries_token() {
        let page = login_page("tok", "<b>x</b>", Some("Bad & wrong"));
        assert!(page.contains(r#"name="csrf_token" value="tok""#));
        assert!(page.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(page.contains("Bad &amp; wrong"));
    }

    #[test]
    fn login_page_without_error_has_no_alert() {
        let page = login_page("tok", "", None);
        assert!(!page.contains("alert-danger"));
    }
}
