//! Audit logging middleware.
//!
//! Logs every authenticated request with staff, method, path and
//! response status. Runs inside the session middleware so the
//! `StaffContext` is available.

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::core_state::Actor;
use crate::web::types::{StaffContext, WebContext};

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let ctx = req.extensions().get::<WebContext>().cloned();
    let actor = req
        .extensions()
        .get::<StaffContext>()
        .map(StaffContext::actor)
        .unwrap_or(Actor::Anonymous);

    let response = next.run(req).await;

    if let Some(ctx) = ctx {
        let status = response.status().as_u16();
        ctx.core
            .log_access(&actor, &format!("{method} {path}"), &format!("status:{status}"));
    }

    response
}
