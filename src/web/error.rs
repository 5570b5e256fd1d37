//! Web error type. Every variant renders a small HTML page; internal
//! details are logged and never sent to the browser.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};

use crate::core_state::CoreError;
use crate::crypto::CryptoError;
use crate::db::DatabaseError;
use crate::web::render;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Sign-in required")]
    Unauthenticated,
    #[error("Access denied")]
    Forbidden,
    #[error("Form expired or invalid")]
    CsrfInvalid,
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, title, message) = match &self {
            WebError::Unauthenticated => return Redirect::to("/login").into_response(),
            WebError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Access denied",
                "Your role does not have access to this page.".to_string(),
            ),
            WebError::CsrfInvalid => (
                StatusCode::FORBIDDEN,
                "Form expired",
                "This form has expired or was not sent from ClinicDesk. Go back, reload the page and try again."
                    .to_string(),
            ),
            WebError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests",
                format!("Please slow down and retry in {retry_after} seconds."),
            ),
            WebError::NotFound(detail) => (StatusCode::NOT_FOUND, "Not found", detail.clone()),
            WebError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "Invalid request", detail.clone()),
            WebError::Conflict(detail) => (StatusCode::CONFLICT, "Action not allowed", detail.clone()),
            WebError::Internal(detail) => {
                tracing::error!(detail = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong",
                    "An internal error occurred. The problem has been logged.".to_string(),
                )
            }
        };

        let mut response = (status, Html(render::error_page(status, title, &message))).into_response();
        if let WebError::RateLimited { retry_after } = &self {
            if let Ok(val) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, val);
            }
        }
        response
    }
}

impl From<CoreError> for WebError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::LockPoisoned => WebError::Internal("lock poisoned".into()),
            CoreError::Database(e) => e.into(),
        }
    }
}

impl From<DatabaseError> for WebError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, .. } => {
                WebError::NotFound(format!("The requested {} does not exist.", entity_type.replace('_', " ")))
            }
            DatabaseError::Validation(msg) => WebError::BadRequest(msg),
            e @ DatabaseError::InvalidTransition { .. } => WebError::Conflict(e.to_string()),
            DatabaseError::ConstraintViolation(msg) => WebError::Conflict(msg),
            other => WebError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for WebError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::WeakPassword { .. } => WebError::BadRequest(err.to_string()),
            CryptoError::MalformedHash => WebError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), 65536).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_redirects_to_login() {
        let response = WebError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login");
    }

    #[tokio::test]
    async fn rate_limited_returns_429_with_retry_after() {
        let response = WebError::RateLimited { retry_after: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "60");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = WebError::Internal("disk on fire".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(!body.contains("disk on fire"));
        assert!(body.contains("internal error"));
    }

    #[tokio::test]
    async fn messages_are_escaped() {
        let response = WebError::BadRequest("<script>x</script>".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_text(response).await;
        assert!(body.contains("&lt;script&gt;"));
        assert!(!body.contains("<script>x"));
    }

    #[test]
    fn database_errors_map_to_statuses() {
        let not_found: WebError = DatabaseError::NotFound {
            entity_type: "test_request".into(),
            id: "x".into(),
        }
        .into();
        assert!(matches!(not_found, WebError::NotFound(ref m) if m.contains("test request")));

        let transition: WebError = DatabaseError::InvalidTransition {
            entity: "appointment",
            from: "Completed".into(),
            to: "Cancelled".into(),
        }
        .into();
        assert!(matches!(transition, WebError::Conflict(_)));

        let validation: WebError = DatabaseError::Validation("bad".into()).into();
        assert!(matches!(validation, WebError::BadRequest(_)));

        let sqlite: WebError = DatabaseError::Sqlite(rusqlite::Error::InvalidQuery).into();
        assert!(matches!(sqlite, WebError::Internal(_)));
    }
}
