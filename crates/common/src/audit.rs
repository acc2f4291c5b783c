//! Append-only audit records.
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailed,
    UserBlocked,
    UserUnblocked,
    UserCreated,
    UserDeleted,
    PasswordChanged,
    RoleChanged,
    InviteCreated,
    InviteConsumed,
    InviteRevoked,
    SessionCreated,
    SessionExpired,
    RateLimitHit,
    RbacViolation,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "LOGIN_SUCCESS",
            AuditEventType::LoginFailed => "LOGIN_FAILED",
            AuditEventType::UserBlocked => "USER_BLOCKED",
            AuditEventType::UserUnblocked => "USER_UNBLOCKED",
            AuditEventType::UserCreated => "USER_CREATED",
            AuditEventType::UserDeleted => "USER_DELETED",
            AuditEventType::PasswordChanged => "PASSWORD_CHANGED",
            AuditEventType::RoleChanged => "ROLE_CHANGED",
            AuditEventType::InviteCreated => "INVITE_CREATED",
            AuditEventType::InviteConsumed => "INVITE_CONSUMED",
            AuditEventType::InviteRevoked => "INVITE_REVOKED",
            AuditEventType::SessionCreated => "SESSION_CREATED",
            AuditEventType::SessionExpired => "SESSION_EXPIRED",
            AuditEventType::RateLimitHit => "RATE_LIMIT_HIT",
            AuditEventType::RbacViolation => "RBAC_VIOLATION",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        user_id: Option<&str>,
        details: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            user_id: user_id.map(str::to_string),
            timestamp: Utc::now(),
            details,
        }
    }
}
