//! Landing route.

use axum::response::Redirect;
use axum::Extension;

use crate::web::types::StaffContext;

/// `GET /`: send staff to their own dashboard.
pub async fn index(Extension(staff): Extension<StaffContext>) -> Redirect {
    Redirect::to(staff.role().dashboard_path())
}
