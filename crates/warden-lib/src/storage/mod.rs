// ============================
// warden-lib/src/storage/mod.rs
// ============================
//! Storage abstraction with a flat-file implementation.
pub mod atomic;
mod flat_file;

pub use flat_file::FlatFileStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use warden_common::{AuditEvent, AuthSettings, ExternalId, Invitation, Role, Session, User};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The identifier does not resolve to a direct child of the users root
    #[error("Path rejected: {0}")]
    PathRejected(String),

    #[error("Refusing to delete active user {0}")]
    ActiveUser(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Persistence seam used by the auth manager.
///
/// Every write is atomic with respect to a single record; index files are
/// read-modify-written under an implementation-owned lock, so concurrent
/// updates of different entries never lose each other's changes.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_user(&self, user_id: &str) -> Result<Option<User>, StorageError>;

    async fn save_user(&self, user: &User) -> Result<(), StorageError>;

    /// Remove a user record that was never fully created (registration
    /// rollback). Does not check the user's status.
    async fn discard_user(&self, user_id: &str) -> Result<(), StorageError>;

    /// Recursively remove an inactive user's directory.
    async fn hard_delete_user(&self, user_id: &str) -> Result<(), StorageError>;

    async fn list_user_ids(&self) -> Result<Vec<String>, StorageError>;

    async fn lookup_external_id(&self, external_id: ExternalId)
        -> Result<Option<String>, StorageError>;

    /// Bind `external_id` to `user_id` unless it is already bound.
    /// Returns `false` when another user holds it.
    async fn claim_external_id(
        &self,
        external_id: ExternalId,
        user_id: &str,
    ) -> Result<bool, StorageError>;

    async fn release_external_id(&self, external_id: ExternalId) -> Result<(), StorageError>;

    async fn load_sessions(&self, user_id: &str) -> Result<Vec<Session>, StorageError>;

    async fn save_sessions(&self, user_id: &str, sessions: &[Session]) -> Result<(), StorageError>;

    async fn load_invitation(&self, code: &str) -> Result<Option<Invitation>, StorageError>;

    async fn list_invitations(&self) -> Result<Vec<Invitation>, StorageError>;

    async fn save_invitation(&self, invitation: &Invitation) -> Result<(), StorageError>;

    async fn load_roles(&self) -> Result<Option<Vec<Role>>, StorageError>;

    async fn save_roles(&self, roles: &[Role]) -> Result<(), StorageError>;

    async fn load_settings(&self) -> Result<Option<AuthSettings>, StorageError>;

    async fn save_settings(&self, settings: &AuthSettings) -> Result<(), StorageError>;

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StorageError>;

    async fn read_audit(&self) -> Result<Vec<AuditEvent>, StorageError>;

    /// Drop audit events older than `cutoff`, atomically replacing the log.
    /// Returns the number of events removed.
    async fn prune_audit(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Crash recovery: drop temp files left between prepare and commit.
    async fn cleanup_orphaned_temp(&self) -> Result<usize, StorageError>;

    /// Upgrade index files written with an older schema version. Returns
    /// the number of files rewritten.
    async fn migrate(&self) -> Result<usize, StorageError> {
        Ok(0)
    }
}
