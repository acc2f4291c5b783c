//! Session records.
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Proof of an authenticated, time-bounded interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    /// Connection metadata supplied by the caller (client name, chat id, ...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Session {
    pub fn new(
        session_id: String,
        user_id: impl Into<String>,
        ttl: Duration,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id: user_id.into(),
            created_at: now,
            expires_at: now + ttl,
            last_activity: now,
            is_active: true,
            metadata,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && now < self.expires_at
    }

    /// Record activity and, if requested, push the expiry out so that at
    /// least `extension` remains.
    pub fn touch(&mut self, now: DateTime<Utc>, extension: Option<Duration>) {
        self.last_activity = now;
        if let Some(extension) = extension {
            let floor = now + extension;
            if self.expires_at < floor {
                self.expires_at = floor;
            }
        }
    }
}
