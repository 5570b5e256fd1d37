//! Server-rendered staff web application.
//!
//! Role dashboards for records, doctors, nurses, the lab and
//! administrators, served by axum with cookie sessions and CSRF-protected
//! forms.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod render;
pub mod router;
pub mod server;
pub mod types;

pub use router::app_router;
pub use server::{start_server, WebServer};
