//! Static assets compiled into the binary.

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};

const APP_JS: &str = include_str!("../../../resources/static/app.js");

/// `GET /static/app.js`
pub async fn app_js() -> Response {
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/javascript; charset=utf-8")),
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600")),
        ],
        APP_JS,
    )
        .into_response()
}
