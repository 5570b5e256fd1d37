//! Shared types for the web layer: request context, sessions, rate
//! limiting and login lockout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, HeaderValue};
use uuid::Uuid;

use crate::core_state::{Actor, CoreState};
use crate::crypto::{generate_token, tokens_match};
use crate::models::StaffRole;

pub const SESSION_COOKIE: &str = "clinicdesk_session";
pub const CSRF_FIELD: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Session ids carry 32 bytes of entropy.
const SESSION_ID_BYTES: usize = 32;
const CSRF_TOKEN_BYTES: usize = 32;

/// Anonymous sessions (login page only) live for 15 minutes.
const ANONYMOUS_SESSION_SECS: u64 = 900;

const LOCKOUT_MAX_FAILURES: u32 = 5;
const LOCKOUT_DURATION_SECS: u64 = 300;

// ═══════════════════════════════════════════════════════════
// Web context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes and middleware.
/// Wraps `CoreState` plus web-specific caches.
#[derive(Clone)]
pub struct WebContext {
    pub core: Arc<CoreState>,
    pub sessions: Arc<Mutex<SessionStore>>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub login_lockout: Arc<Mutex<LoginLockout>>,
}

impl WebContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        let idle = Duration::from_secs(core.config.session_idle_timeout_secs);
        Self {
            core,
            sessions: Arc::new(Mutex::new(SessionStore::new(idle))),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
            login_lockout: Arc::new(Mutex::new(LoginLockout::new())),
        }
    }

    /// `Set-Cookie` value for a session id.
    pub fn session_cookie(&self, session_id: &str) -> HeaderValue {
        let secure = if self.core.config.secure_cookies { "; Secure" } else { "" };
        let max_age = self.core.config.session_idle_timeout_secs;
        HeaderValue::from_str(&format!(
            "{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}{secure}"
        ))
        .unwrap_or_else(|_| clear_session_cookie())
    }

    /// Queue a one-shot message for the next page this session renders.
    pub fn flash(&self, session_id: &str, flash: Flash) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.set_flash(session_id, flash);
        }
    }
}

/// `Set-Cookie` value that removes the session cookie.
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("clinicdesk_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// Read the session id from the `Cookie` header.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// ═══════════════════════════════════════════════════════════
// Staff context: injected by the session middleware
// ═══════════════════════════════════════════════════════════

/// Who is signed in to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffIdentity {
    pub staff_id: Uuid,
    pub username: String,
    pub full_name: String,
    pub role: StaffRole,
}

/// Authenticated request context, injected into request extensions by the
/// session middleware.
#[derive(Debug, Clone)]
pub struct StaffContext {
    pub session_id: String,
    pub staff: StaffIdentity,
    pub csrf_token: String,
    /// Flash message taken from the session for this page view.
    pub flash: Option<Flash>,
}

impl StaffContext {
    pub fn id(&self) -> Uuid {
        self.staff.staff_id
    }

    pub fn role(&self) -> StaffRole {
        self.staff.role
    }

    pub fn is_admin(&self) -> bool {
        self.staff.role == StaffRole::Admin
    }

    pub fn actor(&self) -> Actor {
        Actor::Staff {
            id: self.staff.staff_id,
            username: self.staff.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FlashKind::Error,
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Session store
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct Session {
    pub staff: Option<StaffIdentity>,
    pub csrf_token: String,
    pub flash: Option<Flash>,
    last_seen: Instant,
}

impl Session {
    fn new(staff: Option<StaffIdentity>) -> Self {
        Self {
            staff,
            csrf_token: generate_token(CSRF_TOKEN_BYTES),
            flash: None,
            last_seen: Instant::now(),
        }
    }

    /// Constant-time check of a submitted CSRF token.
    pub fn csrf_matches(&self, submitted: &str) -> bool {
        !submitted.is_empty() && tokens_match(&self.csrf_token, submitted)
    }
}

/// In-memory session table keyed by random session id.
///
/// Sessions expire after `idle_timeout` without a request. Anonymous
/// sessions only carry a CSRF token for the login form.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout,
        }
    }

    fn timeout_for(&self, session: &Session) -> Duration {
        if session.staff.is_some() {
            self.idle_timeout
        } else {
            self.idle_timeout.min(Duration::from_secs(ANONYMOUS_SESSION_SECS))
        }
    }

    /// Start an anonymous session. Returns its id.
    pub fn create_anonymous(&mut self) -> String {
        self.insert(Session::new(None))
    }

    fn insert(&mut self, session: Session) -> String {
        if self.sessions.len() > 1000 {
            self.cleanup();
        }
        let id = generate_token(SESSION_ID_BYTES);
        self.sessions.insert(id.clone(), session);
        id
    }

    /// Look up a live session and refresh its idle timer. Expired sessions
    /// are removed and reported as missing.
    pub fn touch(&mut self, id: &str) -> Option<&mut Session> {
        let expired = {
            let session = self.sessions.get(id)?;
            session.last_seen.elapsed() >= self.timeout_for(session)
        };
        if expired {
            self.sessions.remove(id);
            return None;
        }
        let session = self.sessions.get_mut(id)?;
        session.last_seen = Instant::now();
        Some(session)
    }

    /// Sign a staff member in. The previous session (if any) is discarded
    /// and a fresh id and CSRF token are issued.
    pub fn login(&mut self, previous_id: Option<&str>, staff: StaffIdentity) -> String {
        if let Some(id) = previous_id {
            self.sessions.remove(id);
        }
        self.insert(Session::new(Some(staff)))
    }

    /// Whether `id` names an unexpired signed-in session. Does not refresh
    /// the idle timer.
    pub fn is_signed_in(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| s.staff.is_some() && s.last_seen.elapsed() < self.timeout_for(s))
    }

    pub fn remove(&mut self, id: &str) {
        self.sessions.remove(id);
    }

    /// Drop every session of a staff member (deactivation, password reset).
    pub fn revoke_staff(&mut self, staff_id: &Uuid) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| s.staff.as_ref().map(|st| &st.staff_id) != Some(staff_id));
        before - self.sessions.len()
    }

    pub fn set_flash(&mut self, id: &str, flash: Flash) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.flash = Some(flash);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn cleanup(&mut self) {
        let idle = self.idle_timeout;
        let anonymous = idle.min(Duration::from_secs(ANONYMOUS_SESSION_SECS));
        self.sessions.retain(|_, s| {
            let limit = if s.staff.is_some() { idle } else { anonymous };
            s.last_seen.elapsed() < limit
        });
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

const HOUR: Duration = Duration::from_secs(3600);
const PRUNE_ABOVE_CLIENTS: usize = 1000;

/// Per-client rate limiter with per-minute and per-hour limits.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
    per_hour: u32,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
            per_minute: 120,
            per_hour: 2000,
        }
    }

    /// Check if a client is within rate limits. Returns `Ok(())` or
    /// `Err(retry_after_secs)` if exceeded.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        if self.windows.len() > PRUNE_ABOVE_CLIENTS {
            self.prune(now);
        }
        let entries = self.windows.entry(key.to_string()).or_default();

        entries.retain(|ts| now.duration_since(*ts) < HOUR);

        let last_minute = entries
            .iter()
            .filter(|ts| now.duration_since(**ts) < Duration::from_secs(60))
            .count() as u32;
        if last_minute >= self.per_minute {
            return Err(60);
        }

        if entries.len() as u32 >= self.per_hour {
            return Err(3600);
        }

        entries.push(now);
        Ok(())
    }

    /// Drop clients with no request in the last hour.
    fn prune(&mut self, now: Instant) {
        self.windows
            .retain(|_, entries| entries.last().is_some_and(|ts| now.duration_since(*ts) < HOUR));
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// Login lockout: brute-force protection per username
// ═══════════════════════════════════════════════════════════

struct FailureRecord {
    count: u32,
    first_failure: Instant,
    locked_until: Option<Instant>,
}

/// Locks a username for five minutes after five failures within five
/// minutes.
pub struct LoginLockout {
    failures: HashMap<String, FailureRecord>,
    max_failures: u32,
    lock_for: Duration,
}

impl LoginLockout {
    pub fn new() -> Self {
        Self {
            failures: HashMap::new(),
            max_failures: LOCKOUT_MAX_FAILURES,
            lock_for: Duration::from_secs(LOCKOUT_DURATION_SECS),
        }
    }

    /// Seconds until the username unlocks, or `None` when not locked.
    pub fn locked_for(&mut self, username: &str) -> Option<u64> {
        let record = self.failures.get(username)?;
        let until = record.locked_until?;
        let now = Instant::now();
        if now >= until {
            self.failures.remove(username);
            return None;
        }
        Some(until.duration_since(now).as_secs().max(1))
    }

    /// Count a failed attempt. Returns `true` when this failure locked the
    /// username.
    pub fn record_failure(&mut self, username: &str) -> bool {
        let now = Instant::now();
        if self.failures.len() > PRUNE_ABOVE_CLIENTS {
            self.prune(now);
        }
        let window = self.lock_for;
        let record = self
            .failures
            .entry(username.to_string())
            .or_insert(FailureRecord {
                count: 0,
                first_failure: now,
                locked_until: None,
            });
        if record.locked_until.is_none() && now.duration_since(record.first_failure) >= window {
            record.count = 0;
            record.first_failure = now;
        }
        record.count += 1;
        if record.count >= self.max_failures && record.locked_until.is_none() {
            record.locked_until = Some(Instant::now() + self.lock_for);
            return true;
        }
        false
    }

    pub fn clear(&mut self, username: &str) {
        self.failures.remove(username);
    }

    /// Forget expired locks and failure runs older than the window.
    fn prune(&mut self, now: Instant) {
        let window = self.lock_for;
        self.failures.retain(|_, r| match r.locked_until {
            Some(until) => now < until,
            None => now.duration_since(r.first_failure) < window,
        });
    }

    pub fn tracked_usernames(&self) -> usize {
        self.failures.len()
    }
}

impl Default for LoginLockout {
    fn default() -> Self {
        Self::new()
    }
}
