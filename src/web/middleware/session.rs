//! Session authentication middleware.
//!
//! Resolves the `clinicdesk_session` cookie to a signed-in staff member,
//! verifies the CSRF token on state-changing requests, and injects
//! `StaffContext` into request extensions for downstream handlers.

use axum::body::Body;
use axum::extract::FromRequest;
use axum::http::{header, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use crate::core_state::CoreError;
use crate::crypto::tokens_match;
use crate::web::error::WebError;
use crate::web::types::{session_id_from_headers, StaffContext, WebContext, CSRF_HEADER};

/// Largest form body accepted on protected routes.
const MAX_FORM_BYTES: usize = 64 * 1024;

#[derive(Deserialize)]
struct CsrfField {
    #[serde(default)]
    csrf_token: String,
}

/// Require a signed-in staff member.
///
/// Anonymous or expired sessions are redirected to `/login`. Pages get
/// `Cache-Control: no-store`.
pub async fn require_staff(req: Request<Body>, next: Next) -> Response {
    match require_staff_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_staff_inner(req: Request<Body>, next: Next) -> Result<Response, WebError> {
    let ctx: WebContext = req
        .extensions()
        .get::<WebContext>()
        .cloned()
        .ok_or(WebError::Internal("missing web context".into()))?;

    let session_id = session_id_from_headers(req.headers()).ok_or(WebError::Unauthenticated)?;
    let takes_flash = req.method() == Method::GET && !req.uri().path().starts_with("/api/");

    let staff_ctx = {
        let mut sessions = ctx.sessions.lock().map_err(|_| CoreError::LockPoisoned)?;
        let session = sessions
            .touch(&session_id)
            .ok_or(WebError::Unauthenticated)?;
        let staff = session.staff.clone().ok_or(WebError::Unauthenticated)?;
        StaffContext {
            session_id: session_id.clone(),
            staff,
            csrf_token: session.csrf_token.clone(),
            flash: if takes_flash { session.flash.take() } else { None },
        }
    }; // MutexGuard dropped here, before any .await

    let mut req = if is_state_changing(req.method()) {
        verify_csrf(req, &staff_ctx.csrf_token).await?
    } else {
        req
    };

    req.extensions_mut().insert(staff_ctx);

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(response)
}

fn is_state_changing(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Check the CSRF token of a write request against the session's token.
///
/// The token is taken from the `X-CSRF-Token` header when present,
/// otherwise from the `csrf_token` form field. The body is buffered and
/// handed back unchanged for the handler.
pub(crate) async fn verify_csrf(req: Request<Body>, expected: &str) -> Result<Request<Body>, WebError> {
    if let Some(token) = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
        return if tokens_match(expected, token) {
            Ok(req)
        } else {
            Err(WebError::CsrfInvalid)
        };
    }

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| WebError::BadRequest("Form is too large".into()))?;

    let mut probe = Request::builder().method(Method::POST);
    if let Some(content_type) = parts.headers.get(header::CONTENT_TYPE) {
        probe = probe.header(header::CONTENT_TYPE, content_type);
    }
    let probe = probe
        .body(Body::from(bytes.clone()))
        .map_err(|e| WebError::Internal(e.to_string()))?;

    let submitted = match Form::<CsrfField>::from_request(probe, &()).await {
        Ok(Form(field)) => field.csrf_token,
        Err(_) => String::new(),
    };
    if submitted.is_empty() || !tokens_match(expected, &submitted) {
        tracing::warn!(path = parts.uri.path(), "CSRF token rejected");
        return Err(WebError::CsrfInvalid);
    }

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/records/patients")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_matching_form_token_and_keeps_body() {
        let req = form_request("first_name=Ada&csrf_token=tok123");
        let req = verify_csrf(req, "tok123").await.unwrap();
        let bytes = axum::body::to_bytes(req.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"first_name=Ada&csrf_token=tok123");
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_token() {
        assert!(matches!(
            verify_csrf(form_request("first_name=Ada"), "tok123").await,
            Err(WebError::CsrfInvalid)
        ));
        assert!(matches!(
            verify_csrf(form_request("csrf_token=nope"), "tok123").await,
            Err(WebError::CsrfInvalid)
        ));
    }

    #[tokio::test]
    async fn header_token_is_accepted() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/x")
            .header(CSRF_HEADER, "tok123")
            .body(Body::empty())
            .unwrap();
        assert!(verify_csrf(req, "tok123").await.is_ok());
    }

    #[test]
    fn safe_methods_skip_csrf() {
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::DELETE));
    }
}
