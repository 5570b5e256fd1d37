use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "ClinicDesk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default idle timeout before a signed-in session expires: 30 minutes.
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

pub const DEFAULT_PORT: u16 = 8080;

/// Get the application data directory.
/// `~/ClinicDesk/`, or `./ClinicDesk/` when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the SQLite database.
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("clinicdesk.db")
}

/// Tracing filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,clinicdesk=debug,tower_http=info"
}

/// Runtime settings for the web server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub database_path: PathBuf,
    pub session_idle_timeout_secs: u64,
    /// Add `Secure` to the session cookie. Enable behind HTTPS.
    pub secure_cookies: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            database_path: default_database_path(),
            session_idle_timeout_secs: DEFAULT_SESSION_IDLE_SECS,
            secure_cookies: false,
        }
    }
}
