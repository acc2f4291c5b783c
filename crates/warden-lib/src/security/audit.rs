//! Audit trail on top of the storage's append-only log.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use warden_common::{AuditEvent, AuditEventType};

use crate::storage::{Storage, StorageError};

/// Build an audit details map from key/value pairs.
pub fn details<I, K>(pairs: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Filter for [`AuditLog::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub user_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.user_id
            .as_deref()
            .map_or(true, |id| event.user_id.as_deref() == Some(id))
            && self.event_type.map_or(true, |t| event.event_type == t)
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}

pub struct AuditLog<S> {
    storage: Arc<S>,
}

impl<S: Storage> AuditLog<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Append an event. Audit is secondary to the operation it describes:
    /// a failed write is logged at error level and otherwise ignored.
    pub async fn record(
        &self,
        event_type: AuditEventType,
        user_id: Option<&str>,
        details: BTreeMap<String, Value>,
    ) {
        let event = AuditEvent::new(event_type, user_id, details);
        tracing::debug!(event_type = %event.event_type, user_id = ?event.user_id, "audit");
        if let Err(err) = self.storage.append_audit(&event).await {
            tracing::error!(
                event_type = %event.event_type,
                event_id = %event.event_id,
                error = %err,
                "failed to write audit event"
            );
        }
    }

    /// Matching events, newest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, StorageError> {
        let events = self.storage.read_audit().await?;
        let matching = events
            .into_iter()
            .rev()
            .filter(|event| query.matches(event))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(matching)
    }

    /// Remove events older than `retention`.
    pub async fn prune(&self, retention: Duration) -> Result<usize, StorageError> {
        let removed = self.storage.prune_audit(Utc::now() - retention).await?;
        if removed > 0 {
            tracing::info!(removed, "pruned audit log");
        }
        Ok(removed)
    }
}
