//! Process-wide authorization policy.
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RoleId;

/// Session ids are 64 characters; invite codes must stay strictly shorter.
pub const MAX_INVITE_CODE_LENGTH: usize = 64;

/// Upper bound for every hour-based lifetime (sessions, invitations,
/// temporary passwords): one leap year.
pub const MAX_TTL_HOURS: i64 = 24 * 366;

/// Highest accepted scrypt log2(N). Cost 20 already needs about 1 GiB.
pub const MAX_HASH_COST: u8 = 20;

/// Upper bound for day-based retention and rotation settings.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("invalid password policy: {0}")]
    Password(String),
    #[error("invalid session policy: {0}")]
    Session(String),
    #[error("invalid rate limit policy: {0}")]
    RateLimit(String),
    #[error("invalid invite policy: {0}")]
    Invite(String),
    #[error("invalid security policy: {0}")]
    Security(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_letters: bool,
    pub require_digits: bool,
    /// scrypt cost as log2(N)
    pub hash_cost: u8,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 5,
            max_length: 8,
            require_letters: true,
            require_digits: true,
            hash_cost: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    pub ttl_hours: i64,
    pub max_concurrent: usize,
    pub auto_extend: bool,
    pub extend_minutes: i64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            max_concurrent: 5,
            auto_extend: true,
            extend_minutes: 60,
        }
    }
}

impl SessionPolicy {
    pub fn ttl(&self) -> Duration {
        Duration::hours(self.ttl_hours)
    }

    pub fn extension(&self) -> Option<Duration> {
        self.auto_extend
            .then(|| Duration::minutes(self.extend_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub max_attempts: usize,
    pub window_minutes: i64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            window_minutes: 15,
        }
    }
}

impl RateLimitPolicy {
    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvitePolicy {
    pub default_ttl_hours: i64,
    pub default_max_uses: u32,
    pub code_length: usize,
}

impl Default for InvitePolicy {
    fn default() -> Self {
        Self {
            default_ttl_hours: 48,
            default_max_uses: 1,
            code_length: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationPolicy {
    pub enabled: bool,
    /// Role given to users created without an explicit one
    pub default_role: RoleId,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            default_role: RoleId::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub audit_retention_days: i64,
    /// 0 disables forced rotation
    pub password_rotation_days: i64,
    pub temp_password_ttl_hours: i64,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            audit_retention_days: 90,
            password_rotation_days: 0,
            temp_password_ttl_hours: 24,
        }
    }
}

/// All policies in one place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub password: PasswordPolicy,
    pub session: SessionPolicy,
    pub rate_limit: RateLimitPolicy,
    pub invite: InvitePolicy,
    pub registration: RegistrationPolicy,
    pub security: SecurityPolicy,
}

impl AuthSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let pw = &self.password;
        if pw.min_length == 0 || pw.min_length > pw.max_length {
            return Err(SettingsError::Password(format!(
                "length bounds {}..={} are empty",
                pw.min_length, pw.max_length
            )));
        }
        if !(1..=MAX_HASH_COST).contains(&pw.hash_cost) {
            return Err(SettingsError::Password(format!(
                "hash cost {} out of range",
                pw.hash_cost
            )));
        }
        let ttl_hours = 1..=MAX_TTL_HOURS;
        let minutes = 1..=MAX_TTL_HOURS * 60;
        if !ttl_hours.contains(&self.session.ttl_hours) || self.session.max_concurrent == 0 {
            return Err(SettingsError::Session(format!(
                "ttl must be 1..={MAX_TTL_HOURS} hours and max_concurrent positive"
            )));
        }
        if self.session.auto_extend && !minutes.contains(&self.session.extend_minutes) {
            return Err(SettingsError::Session(
                "extend_minutes out of range while auto_extend is on".to_string(),
            ));
        }
        if self.rate_limit.max_attempts == 0 || !minutes.contains(&self.rate_limit.window_minutes) {
            return Err(SettingsError::RateLimit(
                "max_attempts must be positive and window_minutes in range".to_string(),
            ));
        }
        if !ttl_hours.contains(&self.invite.default_ttl_hours)
            || self.invite.default_max_uses == 0
            || !(16..MAX_INVITE_CODE_LENGTH).contains(&self.invite.code_length)
        {
            return Err(SettingsError::Invite(format!(
                "ttl 1..={MAX_TTL_HOURS} hours, uses positive, codes 16..{MAX_INVITE_CODE_LENGTH} chars"
            )));
        }
        let sec = &self.security;
        if !(1..=MAX_RETENTION_DAYS).contains(&sec.audit_retention_days)
            || !(0..=MAX_RETENTION_DAYS).contains(&sec.password_rotation_days)
            || !ttl_hours.contains(&sec.temp_password_ttl_hours)
        {
            return Err(SettingsError::Security(format!(
                "retention and rotation must be within {MAX_RETENTION_DAYS} days, temp password ttl 1..={MAX_TTL_HOURS} hours"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = AuthSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.password.min_length, 5);
        assert_eq!(settings.password.max_length, 8);
        assert_eq!(settings.rate_limit.max_attempts, 3);
        assert_eq!(settings.rate_limit.window(), Duration::minutes(15));
        assert_eq!(settings.session.ttl(), Duration::hours(24));
        assert_eq!(settings.invite.default_ttl_hours, 48);
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = AuthSettings::default();
        settings.password.min_length = 10;
        assert!(matches!(settings.validate(), Err(SettingsError::Password(_))));

        let mut settings = AuthSettings::default();
        settings.session.max_concurrent = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::Session(_))));

        let mut settings = AuthSettings::default();
        settings.rate_limit.max_attempts = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::RateLimit(_))));

        let mut settings = AuthSettings::default();
        settings.invite.code_length = 8;
        assert!(matches!(settings.validate(), Err(SettingsError::Invite(_))));
        settings.invite.code_length = MAX_INVITE_CODE_LENGTH;
        assert!(matches!(settings.validate(), Err(SettingsError::Invite(_))));
    }

    #[test]
    fn test_upper_bounds() {
        let mut settings = AuthSettings::default();
        settings.password.hash_cost = MAX_HASH_COST + 1;
        assert!(matches!(settings.validate(), Err(SettingsError::Password(_))));
        settings.password.hash_cost = MAX_HASH_COST;
        assert!(settings.validate().is_ok());

        let mut settings = AuthSettings::default();
        settings.session.ttl_hours = i64::MAX;
        assert!(matches!(settings.validate(), Err(SettingsError::Session(_))));

        let mut settings = AuthSettings::default();
        settings.session.extend_minutes = i64::MAX;
        assert!(matches!(settings.validate(), Err(SettingsError::Session(_))));

        let mut settings = AuthSettings::default();
        settings.rate_limit.window_minutes = i64::MAX;
        assert!(matches!(settings.validate(), Err(SettingsError::RateLimit(_))));

        let mut settings = AuthSettings::default();
        settings.invite.default_ttl_hours = MAX_TTL_HOURS + 1;
        assert!(matches!(settings.validate(), Err(SettingsError::Invite(_))));

        let mut settings = AuthSettings::default();
        settings.security.audit_retention_days = i64::MAX;
        assert!(matches!(settings.validate(), Err(SettingsError::Security(_))));
        settings.security.audit_retention_days = 90;
        settings.security.temp_password_ttl_hours = -1;
        assert!(matches!(settings.validate(), Err(SettingsError::Security(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: AuthSettings =
            serde_json::from_str(r#"{"session": {"ttl_hours": 2}}"#).unwrap();
        assert_eq!(settings.session.ttl_hours, 2);
        assert_eq!(settings.session.max_concurrent, 5);
        assert_eq!(settings.password, PasswordPolicy::default());
    }
}
