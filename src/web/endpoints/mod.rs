//! Page and JSON handlers, one module per dashboard.
//!
//! Handlers take `State<WebContext>` plus the `StaffContext` injected by
//! the session middleware. Form actions answer with a 303 redirect and a
//! flash message; recoverable data errors (validation, conflicts, invalid
//! status moves) are flashed back instead of rendering an error page.

pub mod account;
pub mod admin;
pub mod assets;
pub mod auth;
pub mod doctor;
pub mod health;
pub mod home;
pub mod lab;
pub mod nurse;
pub mod records;
pub mod search;
pub mod shared;

use axum::response::{IntoResponse, Redirect, Response};
use chrono::NaiveDate;

use crate::db::DatabaseError;
use crate::web::error::WebError;
use crate::web::types::{Flash, StaffContext, WebContext};

/// Today's date on the clinic clock.
pub(crate) fn today() -> NaiveDate {
    crate::db::repository::now().date()
}

/// Message shown to staff for an error they can fix, or `None` when the
/// error should surface as an error page.
fn user_message(err: &DatabaseError) -> Option<String> {
    match err {
        DatabaseError::Validation(msg) | DatabaseError::ConstraintViolation(msg) => Some(msg.clone()),
        DatabaseError::InvalidTransition { .. } => Some(err.to_string()),
        _ => None,
    }
}

/// Redirect with a flash message for the next page.
pub(crate) fn redirect_with(ctx: &WebContext, staff: &StaffContext, to: &str, flash: Flash) -> Response {
    ctx.flash(&staff.session_id, flash);
    Redirect::to(to).into_response()
}

/// Finish a form action: success flashes `success` and redirects to
/// `redirect_to`; fixable errors flash the reason and redirect to the same
/// place.
pub(crate) fn after_action<T>(
    ctx: &WebContext,
    staff: &StaffContext,
    result: Result<T, DatabaseError>,
    success: impl FnOnce(&T) -> String,
    redirect_to: &str,
) -> Result<Response, WebError> {
    match result {
        Ok(value) => Ok(redirect_with(ctx, staff, redirect_to, Flash::success(success(&value)))),
        Err(err) => fail_back(ctx, staff, err, redirect_to),
    }
}

/// Flash a fixable error and redirect; anything else becomes an error page.
pub(crate) fn fail_back(
    ctx: &WebContext,
    staff: &StaffContext,
    err: DatabaseError,
    redirect_to: &str,
) -> Result<Response, WebError> {
    match user_message(&err) {
        Some(msg) => Ok(redirect_with(ctx, staff, redirect_to, Flash::error(msg))),
        None => Err(err.into()),
    }
}

/// Accept a local return path from a form, falling back otherwise.
pub(crate) fn local_path<'a>(candidate: Option<&'a str>, fallback: &'a str) -> &'a str {
    match candidate {
        Some(p) if p.starts_with('/') && !p.starts_with("//") && !p.contains('\\') => p,
        _ => fallback,
    }
}
