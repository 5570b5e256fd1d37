//! Role gate for dashboard routers.
//!
//! Each dashboard router is layered with the roles allowed in. Admins
//! pass every gate.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::models::StaffRole;
use crate::web::error::WebError;
use crate::web::types::StaffContext;

pub async fn require_role(
    State(allowed): State<&'static [StaffRole]>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(staff) = req.extensions().get::<StaffContext>() else {
        return WebError::Unauthenticated.into_response();
    };
    let role = staff.role();
    if role == StaffRole::Admin || allowed.contains(&role) {
        return next.run(req).await;
    }

    tracing::warn!(
        username = %staff.staff.username,
        role = role.as_str(),
        path = req.uri().path(),
        "Role gate denied access"
    );
    WebError::Forbidden.into_response()
}
