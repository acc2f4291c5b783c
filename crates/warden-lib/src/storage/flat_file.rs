//! Flat-file implementation of the [`Storage`] trait.
//!
//! Layout under the root directory:
//!
//! ```text
//! users/<user_id>/user.json
//! users/<user_id>/sessions.json
//! users_index.json
//! invitations.json
//! roles.json
//! settings.json
//! audit.log
//! ```
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs as tokio_fs, sync::Mutex};
use warden_common::{
    AuditEvent, AuthSettings, ExternalId, Invitation, Role, Session, User, SCHEMA_VERSION,
};

use super::{atomic, Storage, StorageError};

const USERS_DIR: &str = "users";
const USER_FILE: &str = "user.json";
const SESSIONS_FILE: &str = "sessions.json";
const USERS_INDEX: &str = "users_index.json";
const INVITATIONS_INDEX: &str = "invitations.json";
const ROLES_INDEX: &str = "roles.json";
const SETTINGS_FILE: &str = "settings.json";
const AUDIT_LOG: &str = "audit.log";

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersIndex {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    users: BTreeMap<ExternalId, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InvitationsIndex {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    invitations: BTreeMap<String, Invitation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RolesIndex {
    #[serde(default)]
    schema_version: u32,
    roles: Vec<Role>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    schema_version: u32,
    settings: AuthSettings,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionsFile {
    #[serde(default)]
    schema_version: u32,
    #[serde(default)]
    sessions: Vec<Session>,
}

/// Flat-file implementation of the Storage trait
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
    users_index_lock: Arc<Mutex<()>>,
    invitations_lock: Arc<Mutex<()>>,
    audit_lock: Arc<Mutex<()>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(USERS_DIR))?;
        Ok(Self {
            root,
            users_index_lock: Arc::new(Mutex::new(())),
            invitations_lock: Arc::new(Mutex::new(())),
            audit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn users_root(&self) -> PathBuf {
        self.root.join(USERS_DIR)
    }

    /// Directory of one user. The id must be exactly one normal path
    /// component; anything else (`..`, absolute paths, separators, empty)
    /// is rejected before a path is ever built from it.
    fn user_dir(&self, user_id: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(user_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name.to_str() == Some(user_id) => {
                Ok(self.users_root().join(name))
            },
            _ => Err(StorageError::PathRejected(user_id.to_string())),
        }
    }

    fn user_file(&self, user_id: &str) -> Result<PathBuf, StorageError> {
        Ok(self.user_dir(user_id)?.join(USER_FILE))
    }

    fn sessions_file(&self, user_id: &str) -> Result<PathBuf, StorageError> {
        Ok(self.user_dir(user_id)?.join(SESSIONS_FILE))
    }

    async fn read_users_index(&self) -> Result<UsersIndex, StorageError> {
        atomic::read_json_or_default(&self.root.join(USERS_INDEX)).await
    }

    async fn write_users_index(&self, index: &mut UsersIndex) -> Result<(), StorageError> {
        index.schema_version = SCHEMA_VERSION;
        atomic::write_json(&self.root.join(USERS_INDEX), index).await
    }

    async fn read_invitations(&self) -> Result<InvitationsIndex, StorageError> {
        atomic::read_json_or_default(&self.root.join(INVITATIONS_INDEX)).await
    }

    async fn read_audit_file(&self) -> Result<Vec<AuditEvent>, StorageError> {
        let path = self.root.join(AUDIT_LOG);
        let content = match tokio_fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let events = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping corrupt audit line");
                    None
                },
            })
            .collect();
        Ok(events)
    }

    /// Rebuild the external id index from the user directories. Used when
    /// the index file is missing (layouts written before it existed).
    async fn rebuild_users_index(&self) -> Result<UsersIndex, StorageError> {
        let mut index = UsersIndex::default();
        let mut entries = match tokio_fs::read_dir(self.users_root()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(index),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(user_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(user) = self.load_user(&user_id).await? {
                index.users.insert(user.external_id, user.user_id);
            }
        }
        Ok(index)
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn load_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        atomic::read_json(&self.user_file(user_id)?).await
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        atomic::write_json(&self.user_file(&user.user_id)?, user).await
    }

    async fn discard_user(&self, user_id: &str) -> Result<(), StorageError> {
        let dir = self.user_dir(user_id)?;
        match tokio_fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn hard_delete_user(&self, user_id: &str) -> Result<(), StorageError> {
        let dir = self.user_dir(user_id)?;

        let root = tokio_fs::canonicalize(self.users_root()).await?;
        let resolved = match tokio_fs::canonicalize(&dir).await {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(user_id.to_string()))
            },
            Err(err) => return Err(err.into()),
        };
        if resolved.parent() != Some(root.as_path()) {
            tracing::warn!(user_id, resolved = %resolved.display(), "user directory escapes users root");
            return Err(StorageError::PathRejected(user_id.to_string()));
        }

        let user = self
            .load_user(user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(user_id.to_string()))?;
        if user.is_active() {
            return Err(StorageError::ActiveUser(user_id.to_string()));
        }

        tokio_fs::remove_dir_all(&resolved).await?;

        let _guard = self.users_index_lock.lock().await;
        let mut index = self.read_users_index().await?;
        index.users.retain(|_, id| id != user_id);
        self.write_users_index(&mut index).await?;

        tracing::info!(user_id, "user directory removed");
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<String>, StorageError> {
        let index = self.read_users_index().await?;
        Ok(index.users.into_values().collect())
    }

    async fn lookup_external_id(
        &self,
        external_id: ExternalId,
    ) -> Result<Option<String>, StorageError> {
        let index = self.read_users_index().await?;
        Ok(index.users.get(&external_id).cloned())
    }

    async fn claim_external_id(
        &self,
        external_id: ExternalId,
        user_id: &str,
    ) -> Result<bool, StorageError> {
        let _guard = self.users_index_lock.lock().await;
        let mut index = self.read_users_index().await?;
        if index.users.contains_key(&external_id) {
            return Ok(false);
        }
        index.users.insert(external_id, user_id.to_string());
        self.write_users_index(&mut index).await?;
        Ok(true)
    }

    async fn release_external_id(&self, external_id: ExternalId) -> Result<(), StorageError> {
        let _guard = self.users_index_lock.lock().await;
        let mut index = self.read_users_index().await?;
        if index.users.remove(&external_id).is_some() {
            self.write_users_index(&mut index).await?;
        }
        Ok(())
    }

    async fn load_sessions(&self, user_id: &str) -> Result<Vec<Session>, StorageError> {
        let file: SessionsFile = atomic::read_json_or_default(&self.sessions_file(user_id)?).await?;
        Ok(file.sessions)
    }

    async fn save_sessions(&self, user_id: &str, sessions: &[Session]) -> Result<(), StorageError> {
        #[derive(Serialize)]
        struct SessionsRef<'a> {
            schema_version: u32,
            sessions: &'a [Session],
        }
        let file = SessionsRef {
            schema_version: SCHEMA_VERSION,
            sessions,
        };
        atomic::write_json(&self.sessions_file(user_id)?, &file).await
    }

    async fn load_invitation(&self, code: &str) -> Result<Option<Invitation>, StorageError> {
        let mut index = self.read_invitations().await?;
        Ok(index.invitations.remove(code))
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, StorageError> {
        let index = self.read_invitations().await?;
        Ok(index.invitations.into_values().collect())
    }

    async fn save_invitation(&self, invitation: &Invitation) -> Result<(), StorageError> {
        let _guard = self.invitations_lock.lock().await;
        let mut index = self.read_invitations().await?;
        index
            .invitations
            .insert(invitation.invite_code.clone(), invitation.clone());
        index.schema_version = SCHEMA_VERSION;
        atomic::write_json(&self.root.join(INVITATIONS_INDEX), &index).await
    }

    async fn load_roles(&self) -> Result<Option<Vec<Role>>, StorageError> {
        let index: Option<RolesIndex> = atomic::read_json(&self.root.join(ROLES_INDEX)).await?;
        Ok(index.map(|i| i.roles))
    }

    async fn save_roles(&self, roles: &[Role]) -> Result<(), StorageError> {
        let index = RolesIndex {
            schema_version: SCHEMA_VERSION,
            roles: roles.to_vec(),
        };
        atomic::write_json(&self.root.join(ROLES_INDEX), &index).await
    }

    async fn load_settings(&self) -> Result<Option<AuthSettings>, StorageError> {
        let file: Option<SettingsFile> = atomic::read_json(&self.root.join(SETTINGS_FILE)).await?;
        Ok(file.map(|f| f.settings))
    }

    async fn save_settings(&self, settings: &AuthSettings) -> Result<(), StorageError> {
        let file = SettingsFile {
            schema_version: SCHEMA_VERSION,
            settings: settings.clone(),
        };
        atomic::write_json(&self.root.join(SETTINGS_FILE), &file).await
    }

    async fn append_audit(&self, event: &AuditEvent) -> Result<(), StorageError> {
        let line = serde_json::to_string(event)?;
        let _guard = self.audit_lock.lock().await;
        atomic::append_line(&self.root.join(AUDIT_LOG), &line).await
    }

    async fn read_audit(&self) -> Result<Vec<AuditEvent>, StorageError> {
        self.read_audit_file().await
    }

    async fn prune_audit(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.audit_lock.lock().await;
        let events = self.read_audit_file().await?;
        let before = events.len();

        let mut buf = String::new();
        for event in events.iter().filter(|e| e.timestamp >= cutoff) {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }
        let removed = before - buf.lines().count();
        if removed > 0 {
            atomic::write_bytes(&self.root.join(AUDIT_LOG), buf.as_bytes()).await?;
        }
        Ok(removed)
    }

    async fn cleanup_orphaned_temp(&self) -> Result<usize, StorageError> {
        atomic::cleanup_orphaned_temp(&self.root).await
    }

    async fn migrate(&self) -> Result<usize, StorageError> {
        let mut upgraded = 0;

        {
            let _guard = self.users_index_lock.lock().await;
            let path = self.root.join(USERS_INDEX);
            let index = if atomic::exists(&path).await {
                self.read_users_index().await?
            } else {
                self.rebuild_users_index().await?
            };
            if index.schema_version < SCHEMA_VERSION {
                let mut index = index;
                tracing::info!(from = index.schema_version, to = SCHEMA_VERSION, "upgrading users index");
                self.write_users_index(&mut index).await?;
                upgraded += 1;
            }
        }

        {
            let _guard = self.invitations_lock.lock().await;
            let path = self.root.join(INVITATIONS_INDEX);
            if atomic::exists(&path).await {
                let mut index = self.read_invitations().await?;
                if index.schema_version < SCHEMA_VERSION {
                    tracing::info!(from = index.schema_version, to = SCHEMA_VERSION, "upgrading invitations index");
                    index.schema_version = SCHEMA_VERSION;
                    atomic::write_json(&path, &index).await?;
                    upgraded += 1;
                }
            }
        }

        let roles_path = self.root.join(ROLES_INDEX);
        if let Some(index) = atomic::read_json::<RolesIndex>(&roles_path).await? {
            if index.schema_version < SCHEMA_VERSION {
                self.save_roles(&index.roles).await?;
                upgraded += 1;
            }
        }

        Ok(upgraded)
    }
}
