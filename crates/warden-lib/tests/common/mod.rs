//! Shared setup for the integration tests.
//!
//! Every test gets its own data root under a [`TempDir`]; keep the returned
//! directory in scope or it is removed mid-test.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use warden_common::{
    AuditEvent, AuthSettings, ExternalId, Invitation, Role, RoleId, Session, User,
};
use warden_lib::{AuthManager, FlatFileStorage, LoginOutcome, Storage, StorageError};

pub const ROOT_EXTERNAL_ID: ExternalId = 1000;
pub const ROOT_PASSWORD: &str = "root123";

/// Settings with a cheap hash so tests stay fast.
pub fn test_settings() -> AuthSettings {
    let mut settings = AuthSettings::default();
    settings.password.hash_cost = 4;
    settings
}

pub async fn setup() -> (AuthManager<FlatFileStorage>, User, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FlatFileStorage::new(dir.path()).unwrap());
    let manager = AuthManager::open(storage, test_settings()).await.unwrap();
    let root = manager
        .bootstrap_super_admin(ROOT_EXTERNAL_ID, "root", ROOT_PASSWORD)
        .await
        .unwrap();
    (manager, root, dir)
}

pub async fn setup_faulty() -> (AuthManager<FaultyStorage>, Arc<FaultyStorage>, User, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FaultyStorage::new(FlatFileStorage::new(dir.path()).unwrap()));
    let manager = AuthManager::open(Arc::clone(&storage), test_settings())
        .await
        .unwrap();
    let root = manager
        .bootstrap_super_admin(ROOT_EXTERNAL_ID, "root", ROOT_PASSWORD)
        .await
        .unwrap();
    (manager, storage, root, dir)
}

/// Invite and register a user with `role`.
pub async fn register<S: Storage>(
    manager: &AuthManager<S>,
    inviter: &User,
    external_id: ExternalId,
    username: &str,
    password: &str,
    role: RoleId,
) -> User {
    let invitation = manager
        .create_invitation(&inviter.user_id, role, None, None)
        .await
        .unwrap();
    manager
        .register_user(external_id, username, password, &invitation.invite_code)
        .await
        .unwrap()
}

pub async fn login<S: Storage>(manager: &AuthManager<S>, external_id: ExternalId, password: &str) -> Session {
    match manager
        .authenticate(external_id, password, BTreeMap::new())
        .await
        .unwrap()
    {
        LoginOutcome::Authenticated(session) => session,
        other => panic!("expected a session, got {other:?}"),
    }
}

fn injected(what: &str) -> StorageError {
    StorageError::Io(IoError::new(ErrorKind::Other, format!("injected {what} failure")))
}

/// Flat-file storage with switchable write failures.
pub struct FaultyStorage {
    inner: FlatFileStorage,
    pub fail_invitation_saves: AtomicBool,
    pub fail_user_discards: AtomicBool,
    pub fail_session_saves: AtomicBool,
}

impl FaultyStorage {
    pub fn new(inner: FlatFileStorage) -> Self {
        Self {
            inner,
            fail_invitation_saves: AtomicBool::new(false),
            fail_user_discards: AtomicBool::new(false),
            fail_session_saves: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &FlatFileStorage {
        &self.inner
    }

    pub fn set_fail_invitation_saves(&self, fail: bool) {
        self.fail_invitation_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_user_discards(&self, fail: bool) {
        self.fail_user_discards.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_session_saves(&self, fail: bool) {
        self.fail_session_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn load_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        self.inner.load_user(user_id).await
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        self.inner.save_user(user).await
    }

    async fn discard_user(&self, user_id: &str) -> Result<(), StorageError> {
        if self.fail_user_discards.load(Ordering::SeqCst) {
            return Err(injected("discard"));
        }
        self.inner.discard_user(user_id).await
    }

    async fn hard_delete_user(&self, user_id: &str) -> Result<(), StorageError> {
        self.inner.hard_delete_user(user_id).await
    }

    async fn list_user_ids(&self) -> Result<Vec<String>, StorageError> {
        self.inner.list_user_ids().await
    }

    async fn lookup_external_id(
        &self,
        external_id: ExternalId,
    ) -> Result<Option<String>, StorageError> {
        self.inner.lookup_external_id(external_id).await
    }

    async fn claim_external_id(
        &self,
        external_id: ExternalId,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        self.inner.claim_external_id(external_id, user_id).await
    }

    async fn release_external_id(&self, external_id: ExternalId) -> Result<(), StorageError> {
        self.inner.release_external_id(external_id).await
    }

    async fn load_sessions(&self, user_id: &str) -> Result<Vec<Session>, StorageError> {
        self.inner.load_sessions(user_id).await
    }

    async fn save_sessions(&self, user_id: &str, sessions: &[Session]) -> Result<(), StorageError> {
        if self.fail_session_saves.load(Ordering::SeqCst) {
            return Err(injected("session save"));
        }
        self.inner.save_sessions(user_id, sessions).await
    }

    async fn load_invitation(&self, code: &str) -> Result<Option<Invitation>, StorageError> {
        self.inner.load_invitation(code).await
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, StorageError> {
        self.inner.list_invitations().await
    }

    async fn save_invitation(&self, invitation: &Invitation) -> Result<(), StorageError> {
        if self.fail_invitation_saves.load(Ordering::SeqCst) {
            return Err(injected("invitation save"));
        }
        self.inner.save_invitation(invitation).await
    }

    async fn load_roles(&self) -> Result<Option<Vec<Role>>, StorageError> {
        self.inner.load_roles().await
    }

    async fn save_roles(&self, roles: &[Role]) -> Result<(), StorageError> {
        self.inner.save_roles(roles).await
    }

    async fn load_settings(&self) -> Result<Option<AuthSettings>, StorageError> {
        self.inner.load_settings().await
    }

    async fn save_settings(&self, settings: &AuthSettings) -> Result<(), StorageError> {
        self.inner.save_settings(settings).await
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StorageError> {
        self.inner.append_audit(event).await
    }

    async fn read_audit(&self) -> Result<Vec<AuditEvent>, StorageError> {
        self.inner.read_audit().await
    }

    async fn prune_audit(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.inner.prune_audit(cutoff).await
    }

    async fn cleanup_orphaned_temp(&self) -> Result<usize, StorageError> {
        self.inner.cleanup_orphaned_temp().await
    }

    async fn migrate(&self) -> Result<usize, StorageError> {
        self.inner.migrate().await
    }
}
