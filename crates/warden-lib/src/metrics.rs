// ==============
// crates/warden-lib/src/metrics.rs

//! Central place for metric keys
pub const LOGIN_SUCCESS: &str = "auth.login.success";
pub const LOGIN_FAILED: &str = "auth.login.failed";
pub const RATE_LIMITED: &str = "auth.rate_limited";
pub const SESSION_CREATED: &str = "auth.session.created";
pub const SESSION_EXPIRED: &str = "auth.session.expired";
pub const SESSIONS_ACTIVE: &str = "auth.sessions.active";
pub const USER_REGISTERED: &str = "auth.user.registered";
pub const USER_BLOCKED: &str = "auth.user.blocked";
pub const RBAC_DENIED: &str = "auth.rbac.denied";
pub const ROLLBACK_FAILED: &str = "auth.rollback.failed";
