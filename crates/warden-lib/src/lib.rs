// ============================
// warden-lib/src/lib.rs
// ============================
//! File-backed authorization, session and RBAC subsystem.
//!
//! [`AuthManager`] is the entry point. It persists through a [`Storage`]
//! implementation ([`FlatFileStorage`] for plain directories) and exposes
//! registration, login, session, invitation and account-state operations.

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod notify;
pub mod security;
pub mod storage;
pub mod validation;

pub use auth::{AuthManager, LoginOutcome, RoleRegistry};
pub use config::Settings;
pub use error::{AuthError, ValidationError};
pub use middleware::{AccessDecision, Guard, Principal, RequirePermission, RequireRole};
pub use notify::{Notification, Notifier};
pub use security::AuditQuery;
pub use storage::{FlatFileStorage, Storage, StorageError};
