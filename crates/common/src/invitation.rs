//! Invitation codes used for registration.
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::RoleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteType {
    SingleUse,
    MultiUse,
}

/// Single or multi-use registration token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub invite_code: String,
    pub invite_type: InviteType,
    pub created_by_user_id: String,
    pub target_role: RoleId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_uses: u32,
    pub uses_count: u32,
    pub is_active: bool,
    pub is_consumed: bool,
    pub consumed_by_user_id: Option<String>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn new(
        invite_code: String,
        created_by_user_id: impl Into<String>,
        target_role: RoleId,
        ttl: Duration,
        max_uses: u32,
    ) -> Self {
        let now = Utc::now();
        let max_uses = max_uses.max(1);
        Self {
            invite_code,
            invite_type: if max_uses == 1 {
                InviteType::SingleUse
            } else {
                InviteType::MultiUse
            },
            created_by_user_id: created_by_user_id.into(),
            target_role,
            created_at: now,
            // an unrepresentable expiry saturates instead of panicking
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            max_uses,
            uses_count: 0,
            is_active: true,
            is_consumed: false,
            consumed_by_user_id: None,
            consumed_at: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.uses_count < self.max_uses && now < self.expires_at
    }

    pub fn remaining_uses(&self) -> u32 {
        self.max_uses.saturating_sub(self.uses_count)
    }

    /// Apply one use. The caller must have checked validity under the
    /// invitation's lock.
    pub fn record_use(&mut self, user_id: &str, now: DateTime<Utc>) {
        self.uses_count += 1;
        self.consumed_by_user_id = Some(user_id.to_string());
        self.consumed_at = Some(now);
        if self.uses_count >= self.max_uses {
            self.is_consumed = true;
        }
    }
}
