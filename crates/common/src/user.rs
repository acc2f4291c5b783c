//! User identity record.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExternalId, RoleId, SCHEMA_VERSION};

/// Activity state of a user.
///
/// The persisted record still carries the legacy `is_active` / `is_blocked`
/// pair, but both are derived from this value when serializing and are
/// never stored independently in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Blocked,
    Disabled,
}

impl UserStatus {
    pub fn is_active(self) -> bool {
        matches!(self, UserStatus::Active)
    }

    pub fn is_blocked(self) -> bool {
        !self.is_active()
    }

    /// Derive a status from the legacy boolean pair. Inconsistent pairs
    /// never decode as active.
    pub fn from_flags(is_active: bool, is_blocked: bool) -> Self {
        match (is_active, is_blocked) {
            (true, false) => UserStatus::Active,
            (_, true) => UserStatus::Blocked,
            (false, false) => UserStatus::Disabled,
        }
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "UserRecord", from = "UserRecord")]
pub struct User {
    pub user_id: String,
    pub external_id: ExternalId,
    pub username: String,
    pub password_hash: String,
    pub role: RoleId,
    pub status: UserStatus,
    pub must_change_password: bool,
    pub temp_password_expires_at: Option<DateTime<Utc>>,
    pub login_count: u64,
    pub failed_login_attempts: u32,
    pub last_failed_login: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub password_changed_at: DateTime<Utc>,
    pub created_by_user_id: Option<String>,
    pub settings: BTreeMap<String, serde_json::Value>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl User {
    /// Create an active user with a fresh opaque id.
    pub fn new(
        external_id: ExternalId,
        username: impl Into<String>,
        password_hash: impl Into<String>,
        role: RoleId,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: uuid::Uuid::new_v4().simple().to_string(),
            external_id,
            username: username.into(),
            password_hash: password_hash.into(),
            role,
            status: UserStatus::Active,
            must_change_password: false,
            temp_password_expires_at: None,
            login_count: 0,
            failed_login_attempts: 0,
            last_failed_login: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            password_changed_at: now,
            created_by_user_id: None,
            settings: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_blocked(&self) -> bool {
        self.status.is_blocked()
    }

    /// A temporary password that has outlived its window can no longer be
    /// used to log in.
    pub fn temp_password_expired(&self, now: DateTime<Utc>) -> bool {
        self.must_change_password
            && self
                .temp_password_expires_at
                .is_some_and(|expires| now >= expires)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Wire form of [`User`]. Only ever built from a `User` or decoded from disk.
#[derive(Serialize, Deserialize)]
struct UserRecord {
    #[serde(default)]
    schema_version: u32,
    user_id: String,
    external_id: ExternalId,
    username: String,
    password_hash: String,
    role: RoleId,
    #[serde(default)]
    status: Option<UserStatus>,
    is_active: bool,
    is_blocked: bool,
    #[serde(default)]
    must_change_password: bool,
    #[serde(default)]
    temp_password_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    login_count: u64,
    #[serde(default)]
    failed_login_attempts: u32,
    #[serde(default)]
    last_failed_login: Option<DateTime<Utc>>,
    #[serde(default)]
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    password_changed_at: DateTime<Utc>,
    #[serde(default)]
    created_by_user_id: Option<String>,
    #[serde(default)]
    settings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl From<User> for UserRecord {
    fn from(user: User) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            is_active: user.status.is_active(),
            is_blocked: user.status.is_blocked(),
            status: Some(user.status),
            user_id: user.user_id,
            external_id: user.external_id,
            username: user.username,
            password_hash: user.password_hash,
            role: user.role,
            must_change_password: user.must_change_password,
            temp_password_expires_at: user.temp_password_expires_at,
            login_count: user.login_count,
            failed_login_attempts: user.failed_login_attempts,
            last_failed_login: user.last_failed_login,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
            password_changed_at: user.password_changed_at,
            created_by_user_id: user.created_by_user_id,
            settings: user.settings,
            metadata: user.metadata,
        }
    }
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        let from_flags = UserStatus::from_flags(record.is_active, record.is_blocked);
        // An explicit status only wins when it does not claim more access
        // than the legacy flags grant.
        let status = match record.status {
            Some(UserStatus::Active) if !from_flags.is_active() => from_flags,
            Some(status) => status,
            None => from_flags,
        };
        Self {
            user_id: record.user_id,
            external_id: record.external_id,
            username: record.username,
            password_hash: record.password_hash,
            role: record.role,
            status,
            must_change_password: record.must_change_password,
            temp_password_expires_at: record.temp_password_expires_at,
            login_count: record.login_count,
            failed_login_attempts: record.failed_login_attempts,
            last_failed_login: record.last_failed_login,
            last_login_at: record.last_login_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
            password_changed_at: record.password_changed_at,
            created_by_user_id: record.created_by_user_id,
            settings: record.settings,
            metadata: record.metadata,
        }
    }
}
