// ================
// common/src/lib.rs
// ================
//! Domain types shared by the warden storage engine, the auth manager and
//! the administrative tooling.
//!
//! Everything here is plain data plus the invariants that can be checked
//! without touching disk: validity windows, role ordering and the single
//! source of truth for user activity.

pub mod audit;
pub mod invitation;
pub mod role;
pub mod session;
pub mod settings;
pub mod user;

pub use audit::{AuditEvent, AuditEventType};
pub use invitation::{Invitation, InviteType};
pub use role::{Role, RoleId};
pub use session::Session;
pub use settings::{
    AuthSettings, InvitePolicy, PasswordPolicy, RateLimitPolicy, RegistrationPolicy,
    SecurityPolicy, SessionPolicy, SettingsError, MAX_HASH_COST, MAX_INVITE_CODE_LENGTH,
    MAX_RETENTION_DAYS, MAX_TTL_HOURS,
};
pub use user::{User, UserStatus};

/// Platform identity of a user (e.g. a numeric chat account id).
pub type ExternalId = i64;

/// Current on-disk schema version for every index file.
pub const SCHEMA_VERSION: u32 = 1;
