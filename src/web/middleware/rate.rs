//! Per-client rate limiting middleware.
//!
//! Sliding-window limits per client:
//! - 120 requests per minute
//! - 2000 requests per hour
//!
//! A client is its signed-in session when the cookie names one, and its
//! peer IP address otherwise. Unverified cookie values never pick the
//! bucket.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::web::error::WebError;
use crate::web::types::{session_id_from_headers, WebContext};

/// Extract a rate-limit key from the request.
fn rate_key(req: &Request<axum::body::Body>, ctx: &WebContext) -> Result<String, WebError> {
    if let Some(id) = session_id_from_headers(req.headers()) {
        let signed_in = ctx
            .sessions
            .lock()
            .map_err(|_| WebError::Internal("session store lock".into()))?
            .is_signed_in(&id);
        if signed_in {
            let prefix: String = id.chars().take(16).collect();
            return Ok(format!("session:{prefix}"));
        }
    }
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Ok(format!("peer:{peer}"))
}

/// Returns 429 with `Retry-After` once a client exceeds its budget.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, WebError> {
    let ctx: WebContext = req
        .extensions()
        .get::<WebContext>()
        .cloned()
        .ok_or(WebError::Internal("missing web context".into()))?;

    let key = rate_key(&req, &ctx)?;

    // MutexGuard is !Send; drop it before .await
    {
        let mut limiter = ctx
            .rate_limiter
            .lock()
            .map_err(|_| WebError::Internal("rate limiter lock".into()))?;

        if let Err(retry_after) = limiter.check(&key) {
            tracing::warn!(key = %key, retry_after, "Rate limit exceeded");
            return Err(WebError::RateLimited { retry_after });
        }
    }

    Ok(next.run(req).await)
}
