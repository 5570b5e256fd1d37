//! Middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter: reject early
//! 2. Session: resolve the cookie, verify CSRF on writes, inject `StaffContext`
//! 3. Audit logger: logs after the session is known
//! 4. Role gate: per dashboard router

pub mod audit;
pub mod rate;
pub mod role;
pub mod session;
