// crates/warden-lib/src/middleware/mod.rs

//! Access guards evaluated before a handler runs.
//!
//! A presentation layer resolves the caller's session through
//! `AuthManager::authorize` and passes the guards that protect the
//! operation. Guards are plain values, composed in order; the first denial
//! wins.

use warden_common::{RoleId, User, UserStatus};

use crate::auth::RoleRegistry;

/// The caller as seen by guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: RoleId,
    pub status: UserStatus,
    pub must_change_password: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            role: user.role,
            status: user.status,
            must_change_password: user.must_change_password,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: String },
}

impl AccessDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        AccessDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

pub trait Guard: Send + Sync {
    fn check(&self, principal: &Principal, roles: &RoleRegistry) -> AccessDecision;
}

/// Allow principals whose role priority is at least the given role's.
#[derive(Debug, Clone, Copy)]
pub struct RequireRole(pub RoleId);

impl Guard for RequireRole {
    fn check(&self, principal: &Principal, roles: &RoleRegistry) -> AccessDecision {
        if roles.at_least(principal.role, self.0) {
            AccessDecision::Allow
        } else {
            AccessDecision::deny(format!("requires role {}", self.0))
        }
    }
}

/// Allow principals whose role grants a `resource.action` permission.
#[derive(Debug, Clone)]
pub struct RequirePermission(pub String);

impl RequirePermission {
    pub fn new(permission: impl Into<String>) -> Self {
        Self(permission.into())
    }
}

impl Guard for RequirePermission {
    fn check(&self, principal: &Principal, roles: &RoleRegistry) -> AccessDecision {
        if roles.grants(principal.role, &self.0) {
            AccessDecision::Allow
        } else {
            AccessDecision::deny(format!("requires permission {}", self.0))
        }
    }
}

/// Account state gate. Inactive accounts and accounts that still have to
/// change their password are denied regardless of role.
pub fn principal_state(principal: &Principal) -> AccessDecision {
    if principal.status != UserStatus::Active {
        return AccessDecision::deny("account is not active");
    }
    if principal.must_change_password {
        return AccessDecision::deny("password change required");
    }
    AccessDecision::Allow
}

/// Run the state gate, then each guard in order.
pub fn evaluate(principal: &Principal, roles: &RoleRegistry, guards: &[&dyn Guard]) -> AccessDecision {
    let state = principal_state(principal);
    if !state.is_allowed() {
        return state;
    }
    for guard in guards {
        let decision = guard.check(principal, roles);
        if !decision.is_allowed() {
            return decision;
        }
    }
    AccessDecision::Allow
}
