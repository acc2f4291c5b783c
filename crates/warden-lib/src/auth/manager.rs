//! The auth manager: every user, session and invitation operation.
//!
//! Read-modify-write on a user happens under that user's lock from
//! [`LockRegistry`]; invitation consumption happens under a lock keyed by
//! the invite code. Password hashing runs on the blocking pool and is never
//! done while a user lock is held.
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use warden_common::{
    AuditEvent, AuditEventType, AuthSettings, ExternalId, Invitation, Role, RoleId, Session, User,
    UserStatus, MAX_INVITE_CODE_LENGTH, MAX_TTL_HOURS,
};
use zeroize::Zeroizing;

use super::{LockRegistry, RoleRegistry};
use crate::error::{AuthError, ValidationError};
use crate::metrics as keys;
use crate::middleware::{
    evaluate, AccessDecision, Guard, Principal, RequirePermission, RequireRole,
};
use crate::notify::{Notification, Notifier};
use crate::security::{
    details, generate_invite_code, generate_session_id, generate_temp_password, hash_password,
    validate_password, verify_password, AuditLog, AuditQuery, AuthRateLimiter,
};
use crate::storage::{Storage, StorageError};
use crate::validation::{validate_invite_code, validate_username};

const DUMMY_PASSWORD: &str = "warden-timing-pad-0";

/// Result of a login attempt that did not hit an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated(Session),
    /// Too many recent failures for this identity. Nothing was verified.
    RateLimited { wait_seconds: u64 },
}

pub struct AuthManager<S: Storage> {
    storage: Arc<S>,
    settings: AuthSettings,
    roles: RoleRegistry,
    rate_limiter: AuthRateLimiter,
    audit: AuditLog<S>,
    user_locks: LockRegistry,
    invite_locks: LockRegistry,
    /// session id -> user id, for every live session on disk
    sessions: DashMap<String, String>,
    bootstrap_lock: Mutex<()>,
    notifier: Notifier,
    dummy_hash: String,
}

impl<S: Storage> AuthManager<S> {
    /// Recover, migrate and index the store, then return a ready manager.
    pub async fn open(storage: Arc<S>, settings: AuthSettings) -> Result<Self, AuthError> {
        settings
            .validate()
            .map_err(|err| AuthError::Internal(err.to_string()))?;

        let recovered = storage.cleanup_orphaned_temp().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "removed orphaned temp files");
        }
        let migrated = storage.migrate().await?;
        if migrated > 0 {
            tracing::info!(migrated, "migrated index files");
        }

        let roles = match storage.load_roles().await? {
            Some(stored) => RoleRegistry::new(stored),
            None => {
                let defaults = Role::defaults();
                storage.save_roles(&defaults).await?;
                RoleRegistry::new(defaults)
            }
        };
        storage.save_settings(&settings).await?;

        let sessions = DashMap::new();
        let now = Utc::now();
        for user_id in storage.list_user_ids().await? {
            for session in storage.load_sessions(&user_id).await? {
                if session.is_valid_at(now) {
                    sessions.insert(session.session_id, user_id.clone());
                }
            }
        }
        ::metrics::gauge!(keys::SESSIONS_ACTIVE).set(sessions.len() as f64);

        let dummy_hash =
            hash_blocking(Zeroizing::new(DUMMY_PASSWORD.to_string()), settings.password.hash_cost)
                .await?;

        tracing::info!(
            sessions = sessions.len(),
            roles = roles.all().len(),
            "auth manager ready"
        );

        Ok(Self {
            audit: AuditLog::new(Arc::clone(&storage)),
            rate_limiter: AuthRateLimiter::from_policy(&settings.rate_limit),
            storage,
            settings,
            roles,
            user_locks: LockRegistry::new(),
            invite_locks: LockRegistry::new(),
            sessions,
            bootstrap_lock: Mutex::new(()),
            notifier: Notifier::disabled(),
            dummy_hash,
        })
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of users with a lock entry. Entries go away on hard delete.
    pub fn tracked_user_locks(&self) -> usize {
        self.user_locks.len()
    }

    pub fn has_user_lock(&self, user_id: &str) -> bool {
        self.user_locks.contains(user_id)
    }

    /// Invite codes with a lock entry; only codes in use right now.
    pub fn tracked_invite_locks(&self) -> usize {
        self.invite_locks.len()
    }

    /// Drop rate-limit histories whose windows have emptied.
    pub fn sweep_rate_limiter(&self) -> usize {
        self.rate_limiter.sweep()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Create the first account as `super_admin`. Refused once any user exists.
    pub async fn bootstrap_super_admin(
        &self,
        external_id: ExternalId,
        username: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let _bootstrap = self.bootstrap_lock.lock().await;
        if !self.storage.list_user_ids().await?.is_empty() {
            return Err(ValidationError::AlreadyBootstrapped.into());
        }
        let username = validate_username(username)?;
        validate_password(password, &self.settings.password).map_err(ValidationError::from)?;

        let hash = self.hash(password).await?;
        let user = User::new(external_id, username, hash, RoleId::SuperAdmin);
        self.persist_new_user(&user).await?;

        tracing::info!(user_id = %user.user_id, external_id, "bootstrapped super admin");
        self.audit
            .record(
                AuditEventType::UserCreated,
                Some(&user.user_id),
                details([("role", json!(RoleId::SuperAdmin)), ("via", json!("bootstrap"))]),
            )
            .await;
        Ok(user)
    }

    /// Register through an invitation. The user record and the invitation
    /// use commit together: if consuming the invitation fails, the user is
    /// removed again before the error is returned.
    pub async fn register_user(
        &self,
        external_id: ExternalId,
        username: &str,
        password: &str,
        invite_code: &str,
    ) -> Result<User, AuthError> {
        if !self.settings.registration.enabled {
            return Err(ValidationError::RegistrationDisabled.into());
        }
        let username = validate_username(username)?;
        validate_password(password, &self.settings.password).map_err(ValidationError::from)?;
        validate_invite_code(invite_code, MAX_INVITE_CODE_LENGTH)?;

        // fail fast before hashing; the authoritative check runs under the lock
        let invitation = self
            .storage
            .load_invitation(invite_code)
            .await?
            .filter(Invitation::is_valid)
            .ok_or(ValidationError::InvalidInvitation)?;
        if self.storage.lookup_external_id(external_id).await?.is_some() {
            return Err(ValidationError::AlreadyRegistered(external_id).into());
        }

        let hash = self.hash(password).await?;
        let mut user = User::new(external_id, username, hash, invitation.target_role);
        user.created_by_user_id = Some(invitation.created_by_user_id.clone());
        self.persist_new_user(&user).await?;

        if let Err(err) = self.consume_invitation(invite_code, &user.user_id).await {
            self.rollback_registration(&user, &err).await?;
            return Err(err);
        }

        ::metrics::counter!(keys::USER_REGISTERED).increment(1);
        tracing::info!(user_id = %user.user_id, external_id, role = %user.role, "user registered");
        self.audit
            .record(
                AuditEventType::UserCreated,
                Some(&user.user_id),
                details([("role", json!(user.role)), ("via", json!("invitation"))]),
            )
            .await;
        Ok(user)
    }

    /// Administrative creation with a generated temporary password. The
    /// returned password is shown once; the user must replace it before any
    /// permission check passes.
    pub async fn create_user(
        &self,
        by_user_id: &str,
        external_id: ExternalId,
        username: &str,
        role: RoleId,
    ) -> Result<(User, Zeroizing<String>), AuthError> {
        let actor = self.authorize_actor(by_user_id, "users.create").await?;
        self.ensure_assignable(&actor, role, "users.create").await?;
        let username = validate_username(username)?;
        if self.storage.lookup_external_id(external_id).await?.is_some() {
            return Err(ValidationError::AlreadyRegistered(external_id).into());
        }

        let temp_password = generate_temp_password(&self.settings.password);
        let hash = self.hash(&temp_password).await?;
        let mut user = User::new(external_id, username, hash, role);
        user.must_change_password = true;
        user.temp_password_expires_at =
            Some(Utc::now() + Duration::hours(self.settings.security.temp_password_ttl_hours));
        user.created_by_user_id = Some(actor.user_id.clone());
        self.persist_new_user(&user).await?;

        tracing::info!(user_id = %user.user_id, by_user_id, role = %role, "user created");
        self.audit
            .record(
                AuditEventType::UserCreated,
                Some(&user.user_id),
                details([
                    ("role", json!(role)),
                    ("via", json!("admin")),
                    ("by_user_id", json!(actor.user_id)),
                ]),
            )
            .await;
        Ok((user, temp_password))
    }

    /// Claim the external id, then write the record. A failed write gives
    /// the claim back.
    async fn persist_new_user(&self, user: &User) -> Result<(), AuthError> {
        if !self
            .storage
            .claim_external_id(user.external_id, &user.user_id)
            .await?
        {
            return Err(ValidationError::AlreadyRegistered(user.external_id).into());
        }
        if let Err(err) = self.storage.save_user(user).await {
            let err = AuthError::from(err);
            self.rollback_registration(user, &err).await?;
            return Err(err);
        }
        Ok(())
    }

    async fn rollback_registration(&self, user: &User, cause: &AuthError) -> Result<(), AuthError> {
        let discarded = self.storage.discard_user(&user.user_id).await;
        let released = self.storage.release_external_id(user.external_id).await;
        if let Err(err) = discarded.and(released) {
            ::metrics::counter!(keys::ROLLBACK_FAILED).increment(1);
            tracing::error!(
                severity = "critical",
                user_id = %user.user_id,
                external_id = user.external_id,
                cause = %cause,
                error = %err,
                "registration rollback failed, manual repair required"
            );
            return Err(AuthError::Consistency(format!(
                "rollback of user {} failed: {err}",
                user.user_id
            )));
        }
        tracing::warn!(user_id = %user.user_id, cause = %cause, "registration rolled back");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    pub async fn create_invitation(
        &self,
        by_user_id: &str,
        target_role: RoleId,
        max_uses: Option<u32>,
        ttl: Option<Duration>,
    ) -> Result<Invitation, AuthError> {
        let actor = self.authorize_actor(by_user_id, "invitations.create").await?;
        if !self.roles.at_least(actor.role, target_role) {
            return Err(self.deny(&actor.user_id, "invitations.create", "role above own").await);
        }
        if !self.roles.get(target_role).assignable {
            return Err(ValidationError::RoleNotAssignable(target_role).into());
        }

        let policy = &self.settings.invite;
        let ttl = ttl.unwrap_or_else(|| Duration::hours(policy.default_ttl_hours));
        if ttl <= Duration::zero() || ttl > Duration::hours(MAX_TTL_HOURS) {
            return Err(ValidationError::InvalidTtl.into());
        }
        let invitation = Invitation::new(
            generate_invite_code(policy.code_length),
            actor.user_id.clone(),
            target_role,
            ttl,
            max_uses.unwrap_or(policy.default_max_uses),
        );
        self.storage.save_invitation(&invitation).await?;

        tracing::info!(by_user_id, role = %target_role, max_uses = invitation.max_uses, "invitation created");
        self.audit
            .record(
                AuditEventType::InviteCreated,
                Some(&actor.user_id),
                details([
                    ("invite_code", json!(mask_code(&invitation.invite_code))),
                    ("target_role", json!(target_role)),
                    ("max_uses", json!(invitation.max_uses)),
                    ("expires_at", json!(invitation.expires_at)),
                ]),
            )
            .await;
        Ok(invitation)
    }

    /// Apply one use of an invitation on behalf of `user_id`.
    ///
    /// Validity is re-checked under the code's lock, so concurrent callers
    /// racing for the last use see each other's writes.
    pub async fn consume_invitation(
        &self,
        invite_code: &str,
        user_id: &str,
    ) -> Result<Invitation, AuthError> {
        validate_invite_code(invite_code, MAX_INVITE_CODE_LENGTH)?;
        let guard = self.invite_locks.acquire(invite_code).await;
        let applied = self.apply_invitation_use(invite_code, user_id).await;
        drop(guard);
        self.invite_locks.evict_if_idle(invite_code);
        let invitation = applied?;

        self.audit
            .record(
                AuditEventType::InviteConsumed,
                Some(user_id),
                details([
                    ("invite_code", json!(mask_code(invite_code))),
                    ("uses_count", json!(invitation.uses_count)),
                    ("max_uses", json!(invitation.max_uses)),
                ]),
            )
            .await;
        Ok(invitation)
    }

    /// Caller holds the code's lock.
    async fn apply_invitation_use(
        &self,
        invite_code: &str,
        user_id: &str,
    ) -> Result<Invitation, AuthError> {
        let mut invitation = self
            .storage
            .load_invitation(invite_code)
            .await?
            .filter(Invitation::is_valid)
            .ok_or(ValidationError::InvalidInvitation)?;
        invitation.record_use(user_id, Utc::now());
        self.storage.save_invitation(&invitation).await?;
        Ok(invitation)
    }

    pub async fn revoke_invitation(&self, invite_code: &str, by_user_id: &str) -> Result<(), AuthError> {
        let actor = self.authorize_actor(by_user_id, "invitations.revoke").await?;
        validate_invite_code(invite_code, MAX_INVITE_CODE_LENGTH)?;
        let guard = self.invite_locks.acquire(invite_code).await;
        let revoked = self.deactivate_invitation(invite_code).await;
        drop(guard);
        self.invite_locks.evict_if_idle(invite_code);
        revoked?;

        tracing::info!(by_user_id, "invitation revoked");
        self.audit
            .record(
                AuditEventType::InviteRevoked,
                Some(&actor.user_id),
                details([("invite_code", json!(mask_code(invite_code)))]),
            )
            .await;
        Ok(())
    }

    async fn deactivate_invitation(&self, invite_code: &str) -> Result<(), AuthError> {
        let mut invitation = self
            .storage
            .load_invitation(invite_code)
            .await?
            .ok_or(ValidationError::InvalidInvitation)?;
        invitation.is_active = false;
        self.storage.save_invitation(&invitation).await?;
        Ok(())
    }

    /// Invitations newest first; `include_inactive` adds expired, used-up
    /// and revoked ones.
    pub async fn list_invitations(
        &self,
        by_user_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<Invitation>, AuthError> {
        self.authorize_actor(by_user_id, "invitations.read").await?;
        let now = Utc::now();
        let mut invitations: Vec<Invitation> = self
            .storage
            .list_invitations()
            .await?
            .into_iter()
            .filter(|inv| include_inactive || inv.is_valid_at(now))
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invitations)
    }

    // ------------------------------------------------------------------
    // Authentication and sessions
    // ------------------------------------------------------------------

    pub async fn authenticate(
        &self,
        external_id: ExternalId,
        password: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<LoginOutcome, AuthError> {
        // counted up front so parallel guesses see each other
        let check = self.rate_limiter.reserve(external_id);
        if !check.allowed {
            ::metrics::counter!(keys::RATE_LIMITED).increment(1);
            tracing::warn!(external_id, wait_seconds = check.wait_seconds, "login rate limited");
            self.audit
                .record(
                    AuditEventType::RateLimitHit,
                    None,
                    details([
                        ("external_id", json!(external_id)),
                        ("wait_seconds", json!(check.wait_seconds)),
                    ]),
                )
                .await;
            return Ok(LoginOutcome::RateLimited {
                wait_seconds: check.wait_seconds,
            });
        }

        let user = match self.storage.lookup_external_id(external_id).await? {
            Some(user_id) => self.storage.load_user(&user_id).await?,
            None => None,
        };
        let Some(user) = user else {
            // same hashing cost as a real check
            self.verify(self.dummy_hash.clone(), password).await;
            return self.reject_login(external_id, None, "unknown_user").await;
        };

        if !self.verify(user.password_hash.clone(), password).await {
            return self.reject_login(external_id, Some(&user), "wrong_password").await;
        }
        let now = Utc::now();
        if user.temp_password_expired(now) {
            return self
                .reject_login(external_id, Some(&user), "temp_password_expired")
                .await;
        }

        let (guard, mut user) = self.lock_user(&user.user_id).await?;
        if !user.is_active() {
            drop(guard);
            return self.reject_login(external_id, Some(&user), "inactive").await;
        }
        self.rate_limiter.reset(external_id);

        user.login_count += 1;
        user.failed_login_attempts = 0;
        user.last_login_at = Some(now);
        let rotation_days = self.settings.security.password_rotation_days;
        if rotation_days > 0 && now - user.password_changed_at > Duration::days(rotation_days) {
            user.must_change_password = true;
        }
        user.touch();
        self.storage.save_user(&user).await?;
        let session = self.create_session_locked(&user, metadata).await?;
        drop(guard);

        ::metrics::counter!(keys::LOGIN_SUCCESS).increment(1);
        tracing::info!(user_id = %user.user_id, external_id, "login succeeded");
        self.audit
            .record(
                AuditEventType::LoginSuccess,
                Some(&user.user_id),
                details([
                    ("external_id", json!(external_id)),
                    ("must_change_password", json!(user.must_change_password)),
                ]),
            )
            .await;
        Ok(LoginOutcome::Authenticated(session))
    }

    async fn reject_login(
        &self,
        external_id: ExternalId,
        user: Option<&User>,
        reason: &'static str,
    ) -> Result<LoginOutcome, AuthError> {
        if let Some(user) = user {
            if let Ok((_guard, mut fresh)) = self.lock_user(&user.user_id).await {
                fresh.failed_login_attempts = fresh.failed_login_attempts.saturating_add(1);
                fresh.last_failed_login = Some(Utc::now());
                fresh.touch();
                if let Err(err) = self.storage.save_user(&fresh).await {
                    tracing::warn!(user_id = %fresh.user_id, error = %err, "failed to record login failure");
                }
            }
        }

        ::metrics::counter!(keys::LOGIN_FAILED).increment(1);
        tracing::info!(external_id, reason, "login failed");
        self.audit
            .record(
                AuditEventType::LoginFailed,
                user.map(|u| u.user_id.as_str()),
                details([("external_id", json!(external_id)), ("reason", json!(reason))]),
            )
            .await;
        Err(AuthError::InvalidCredentials)
    }

    /// Open a session for an active user without a password check. Used by
    /// trusted front ends that authenticate the caller themselves.
    pub async fn create_session(
        &self,
        user_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Session, AuthError> {
        let (guard, user) = self.lock_user(user_id).await?;
        if !user.is_active() {
            return Err(AuthError::InvalidCredentials);
        }
        let session = self.create_session_locked(&user, metadata).await?;
        drop(guard);
        Ok(session)
    }

    /// Caller holds the user's lock.
    async fn create_session_locked(
        &self,
        user: &User,
        metadata: BTreeMap<String, String>,
    ) -> Result<Session, AuthError> {
        let now = Utc::now();
        let (mut live, stale): (Vec<Session>, Vec<Session>) = self
            .storage
            .load_sessions(&user.user_id)
            .await?
            .into_iter()
            .partition(|s| s.is_valid_at(now));
        live.sort_by_key(|s| s.created_at);

        let mut dropped: Vec<String> = stale.into_iter().map(|s| s.session_id).collect();
        let max = self.settings.session.max_concurrent;
        let excess = (live.len() + 1).saturating_sub(max);
        let evicted = excess.min(live.len());
        dropped.extend(live.drain(..evicted).map(|s| s.session_id));

        let session = Session::new(
            generate_session_id(),
            &user.user_id,
            self.settings.session.ttl(),
            metadata,
        );
        live.push(session.clone());
        self.storage.save_sessions(&user.user_id, &live).await?;

        for id in &dropped {
            self.sessions.remove(id);
        }
        self.sessions
            .insert(session.session_id.clone(), user.user_id.clone());
        ::metrics::counter!(keys::SESSION_CREATED).increment(1);
        ::metrics::gauge!(keys::SESSIONS_ACTIVE).set(self.sessions.len() as f64);

        if evicted > 0 {
            tracing::debug!(user_id = %user.user_id, evicted, "evicted oldest sessions");
        }
        self.audit
            .record(
                AuditEventType::SessionCreated,
                Some(&user.user_id),
                details([("evicted", json!(evicted)), ("expires_at", json!(session.expires_at))]),
            )
            .await;
        Ok(session)
    }

    /// Resolve a session id. Expired sessions are removed on sight; live ones
    /// get their activity stamp and, with auto-extend on, a later expiry.
    pub async fn validate_session(&self, session_id: &str) -> Result<Session, AuthError> {
        let user_id = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidSession)?;

        let guard = self.user_locks.acquire(&user_id).await;
        let owner_active = self
            .storage
            .load_user(&user_id)
            .await?
            .is_some_and(|user| user.is_active());
        if !owner_active {
            return Err(AuthError::InvalidSession);
        }
        let mut sessions = self.storage.load_sessions(&user_id).await?;
        let Some(pos) = sessions.iter().position(|s| s.session_id == session_id) else {
            self.sessions.remove(session_id);
            return Err(AuthError::InvalidSession);
        };

        let now = Utc::now();
        if !sessions[pos].is_valid_at(now) {
            sessions.remove(pos);
            self.storage.save_sessions(&user_id, &sessions).await?;
            self.sessions.remove(session_id);
            drop(guard);

            ::metrics::counter!(keys::SESSION_EXPIRED).increment(1);
            ::metrics::gauge!(keys::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
            self.audit
                .record(AuditEventType::SessionExpired, Some(&user_id), BTreeMap::new())
                .await;
            return Err(AuthError::InvalidSession);
        }

        sessions[pos].touch(now, self.settings.session.extension());
        self.storage.save_sessions(&user_id, &sessions).await?;
        Ok(sessions.swap_remove(pos))
    }

    /// End a session. Returns `false` when it was not live.
    pub async fn logout(&self, session_id: &str) -> Result<bool, AuthError> {
        let Some((_, user_id)) = self.sessions.remove(session_id) else {
            return Ok(false);
        };
        let _guard = self.user_locks.acquire(&user_id).await;
        let mut sessions = self.storage.load_sessions(&user_id).await?;
        let before = sessions.len();
        sessions.retain(|s| s.session_id != session_id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.storage.save_sessions(&user_id, &sessions).await?;
        ::metrics::gauge!(keys::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        tracing::debug!(user_id = %user_id, "logged out");
        Ok(true)
    }

    /// Live sessions of a user. Users who are not active have none.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, AuthError> {
        let now = Utc::now();
        if !self.get_user(user_id).await?.is_some_and(|user| user.is_active()) {
            return Ok(Vec::new());
        }
        let sessions = match self.storage.load_sessions(user_id).await {
            Ok(sessions) => sessions,
            Err(StorageError::PathRejected(id)) => {
                return Err(ValidationError::InvalidIdentifier(id).into())
            }
            Err(err) => return Err(err.into()),
        };
        Ok(sessions.into_iter().filter(|s| s.is_valid_at(now)).collect())
    }

    // ------------------------------------------------------------------
    // Account state
    // ------------------------------------------------------------------

    /// Block a user and drop every session they hold. Returns the number of
    /// sessions invalidated.
    pub async fn block_user(&self, user_id: &str, by_user_id: &str) -> Result<usize, AuthError> {
        if user_id == by_user_id {
            return Err(ValidationError::SelfBlock.into());
        }
        let actor = self.authorize_actor(by_user_id, "users.block").await?;

        let (guard, mut user) = self.lock_user(user_id).await?;
        self.ensure_outranks(&actor, user.role, "users.block").await?;

        // sessions go first: a failure here leaves an active user, never a
        // blocked one with live sessions
        let sessions = self.storage.load_sessions(user_id).await?;
        self.storage.save_sessions(user_id, &[]).await?;
        for session in &sessions {
            self.sessions.remove(&session.session_id);
        }

        user.status = UserStatus::Blocked;
        user.touch();
        self.storage.save_user(&user).await?;
        drop(guard);

        let invalidated = sessions.len();
        ::metrics::counter!(keys::USER_BLOCKED).increment(1);
        ::metrics::gauge!(keys::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        tracing::info!(user_id, by_user_id, invalidated, "user blocked");
        self.audit
            .record(
                AuditEventType::UserBlocked,
                Some(user_id),
                details([
                    ("by_user_id", json!(by_user_id)),
                    ("sessions_invalidated", json!(invalidated)),
                ]),
            )
            .await;
        self.notifier.dispatch(Notification::UserBlocked {
            user_id: user_id.to_string(),
            by_user_id: by_user_id.to_string(),
        });
        Ok(invalidated)
    }

    /// Reactivate a user. No session is created; the user logs in again.
    pub async fn unblock_user(&self, user_id: &str, by_user_id: &str) -> Result<(), AuthError> {
        let actor = self.authorize_actor(by_user_id, "users.unblock").await?;

        let (guard, mut user) = self.lock_user(user_id).await?;
        self.ensure_outranks(&actor, user.role, "users.unblock").await?;

        user.status = UserStatus::Active;
        user.failed_login_attempts = 0;
        user.touch();
        self.storage.save_user(&user).await?;
        drop(guard);
        self.rate_limiter.reset(user.external_id);

        tracing::info!(user_id, by_user_id, "user unblocked");
        self.audit
            .record(
                AuditEventType::UserUnblocked,
                Some(user_id),
                details([("by_user_id", json!(by_user_id))]),
            )
            .await;
        self.notifier.dispatch(Notification::UserUnblocked {
            user_id: user_id.to_string(),
            by_user_id: by_user_id.to_string(),
        });
        Ok(())
    }

    /// Permanently remove an inactive user and everything stored for them.
    pub async fn delete_user(&self, user_id: &str, by_user_id: &str) -> Result<(), AuthError> {
        if user_id == by_user_id {
            return Err(ValidationError::SelfDelete.into());
        }
        let actor = self.authorize_actor(by_user_id, "users.delete").await?;

        let (guard, user) = self.lock_user(user_id).await?;
        self.ensure_outranks(&actor, user.role, "users.delete").await?;
        if user.is_active() {
            return Err(ValidationError::UserActive(user_id.to_string()).into());
        }

        self.storage
            .hard_delete_user(user_id)
            .await
            .map_err(|err| match err {
                StorageError::PathRejected(id) => ValidationError::InvalidIdentifier(id).into(),
                StorageError::ActiveUser(id) => ValidationError::UserActive(id).into(),
                StorageError::NotFound(id) => ValidationError::UserNotFound(id).into(),
                other => AuthError::from(other),
            })?;
        self.sessions.retain(|_, owner| owner.as_str() != user_id);
        drop(guard);
        self.user_locks.evict(user_id);

        tracing::info!(user_id, by_user_id, "user deleted");
        self.audit
            .record(
                AuditEventType::UserDeleted,
                Some(user_id),
                details([
                    ("by_user_id", json!(by_user_id)),
                    ("external_id", json!(user.external_id)),
                ]),
            )
            .await;
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password, &self.settings.password).map_err(ValidationError::from)?;
        let user = self.require_user(user_id).await?;
        if user.temp_password_expired(Utc::now()) {
            return Err(AuthError::InvalidCredentials);
        }
        if !self.verify(user.password_hash.clone(), current_password).await {
            return Err(ValidationError::WrongPassword.into());
        }
        let hash = self.hash(new_password).await?;

        let (guard, mut user) = self.lock_user(user_id).await?;
        let now = Utc::now();
        user.password_hash = hash;
        user.must_change_password = false;
        user.temp_password_expires_at = None;
        user.password_changed_at = now;
        user.touch();
        self.storage.save_user(&user).await?;
        drop(guard);

        tracing::info!(user_id, "password changed");
        self.audit
            .record(AuditEventType::PasswordChanged, Some(user_id), BTreeMap::new())
            .await;
        Ok(())
    }

    /// Move a user to another role. The actor must outrank both roles.
    pub async fn change_role(
        &self,
        user_id: &str,
        new_role: RoleId,
        by_user_id: &str,
    ) -> Result<(), AuthError> {
        let actor = self.authorize_actor(by_user_id, "users.role").await?;
        self.ensure_assignable(&actor, new_role, "users.role").await?;

        let (guard, mut user) = self.lock_user(user_id).await?;
        self.ensure_outranks(&actor, user.role, "users.role").await?;
        let old_role = user.role;
        if old_role == new_role {
            return Ok(());
        }
        user.role = new_role;
        user.touch();
        self.storage.save_user(&user).await?;
        drop(guard);

        tracing::info!(user_id, by_user_id, from = %old_role, to = %new_role, "role changed");
        self.audit
            .record(
                AuditEventType::RoleChanged,
                Some(user_id),
                details([
                    ("from", json!(old_role)),
                    ("to", json!(new_role)),
                    ("by_user_id", json!(by_user_id)),
                ]),
            )
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups and access checks
    // ------------------------------------------------------------------

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        match self.storage.load_user(user_id).await {
            Ok(user) => Ok(user),
            Err(StorageError::PathRejected(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_user_by_external_id(
        &self,
        external_id: ExternalId,
    ) -> Result<Option<User>, AuthError> {
        match self.storage.lookup_external_id(external_id).await? {
            Some(user_id) => self.get_user(&user_id).await,
            None => Ok(None),
        }
    }

    /// All users, oldest first.
    pub async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let mut users = Vec::new();
        for user_id in self.storage.list_user_ids().await? {
            if let Some(user) = self.storage.load_user(&user_id).await? {
                users.push(user);
            }
        }
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    /// Account state gate plus a permission lookup on the user's role.
    /// Unknown users hold no permissions.
    pub async fn has_permission(&self, user_id: &str, permission: &str) -> Result<bool, AuthError> {
        let Some(user) = self.get_user(user_id).await? else {
            return Ok(false);
        };
        let guard = RequirePermission::new(permission);
        Ok(evaluate(&Principal::from(&user), &self.roles, &[&guard]).is_allowed())
    }

    /// Account state gate plus a hierarchy check against `min_role`.
    pub async fn has_role(&self, user_id: &str, min_role: RoleId) -> Result<bool, AuthError> {
        let Some(user) = self.get_user(user_id).await? else {
            return Ok(false);
        };
        let guard = RequireRole(min_role);
        Ok(evaluate(&Principal::from(&user), &self.roles, &[&guard]).is_allowed())
    }

    /// Resolve a session to its principal and run `guards` in order.
    pub async fn authorize(
        &self,
        session_id: &str,
        guards: &[&dyn Guard],
    ) -> Result<Principal, AuthError> {
        let session = self.validate_session(session_id).await?;
        let user = self
            .get_user(&session.user_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;
        let principal = Principal::from(&user);
        match evaluate(&principal, &self.roles, guards) {
            AccessDecision::Allow => Ok(principal),
            AccessDecision::Deny { reason } => {
                Err(self.deny(&principal.user_id, "authorize", &reason).await)
            }
        }
    }

    pub async fn get_audit_log(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuthError> {
        Ok(self.audit.query(query).await?)
    }

    /// Drop audit events older than the configured retention.
    pub async fn prune_audit_log(&self) -> Result<usize, AuthError> {
        let retention = Duration::days(self.settings.security.audit_retention_days);
        Ok(self.audit.prune(retention).await?)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn require_user(&self, user_id: &str) -> Result<User, AuthError> {
        match self.storage.load_user(user_id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(ValidationError::UserNotFound(user_id.to_string()).into()),
            Err(StorageError::PathRejected(id)) => {
                Err(ValidationError::InvalidIdentifier(id).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lock an existing user and load the record under the lock. Ids that do
    /// not resolve to a user never get a registry entry.
    async fn lock_user(&self, user_id: &str) -> Result<(OwnedMutexGuard<()>, User), AuthError> {
        self.require_user(user_id).await?;
        let guard = self.user_locks.acquire(user_id).await;
        match self.require_user(user_id).await {
            Ok(user) => Ok((guard, user)),
            Err(err) => {
                // deleted while we waited
                drop(guard);
                self.user_locks.evict(user_id);
                Err(err)
            }
        }
    }

    /// Load the acting user and check they may perform `permission`.
    async fn authorize_actor(&self, by_user_id: &str, permission: &str) -> Result<User, AuthError> {
        let actor = match self.storage.load_user(by_user_id).await {
            Ok(Some(actor)) => actor,
            Ok(None) | Err(StorageError::PathRejected(_)) => {
                return Err(self.deny(by_user_id, permission, "unknown actor").await)
            }
            Err(err) => return Err(err.into()),
        };
        let guard = RequirePermission::new(permission);
        if let AccessDecision::Deny { reason } =
            evaluate(&Principal::from(&actor), &self.roles, &[&guard])
        {
            return Err(self.deny(by_user_id, permission, &reason).await);
        }
        Ok(actor)
    }

    async fn ensure_outranks(&self, actor: &User, target: RoleId, action: &str) -> Result<(), AuthError> {
        if self.roles.outranks(actor.role, target) {
            Ok(())
        } else {
            Err(self.deny(&actor.user_id, action, "insufficient rank").await)
        }
    }

    async fn ensure_assignable(&self, actor: &User, role: RoleId, action: &str) -> Result<(), AuthError> {
        if !self.roles.get(role).assignable {
            return Err(ValidationError::RoleNotAssignable(role).into());
        }
        self.ensure_outranks(actor, role, action).await
    }

    async fn deny(&self, user_id: &str, action: &str, reason: &str) -> AuthError {
        ::metrics::counter!(keys::RBAC_DENIED).increment(1);
        tracing::warn!(user_id, action, reason, "access denied");
        self.audit
            .record(
                AuditEventType::RbacViolation,
                Some(user_id),
                details([("action", json!(action)), ("reason", json!(reason))]),
            )
            .await;
        AuthError::PermissionDenied(action.to_string())
    }

    async fn hash(&self, plain: &str) -> Result<String, AuthError> {
        hash_blocking(Zeroizing::new(plain.to_string()), self.settings.password.hash_cost).await
    }

    async fn verify(&self, hash: String, plain: &str) -> bool {
        let plain = Zeroizing::new(plain.to_string());
        match tokio::task::spawn_blocking(move || verify_password(&hash, &plain)).await {
            Ok(matched) => matched,
            Err(err) => {
                tracing::error!(error = %err, "password verification task failed");
                false
            }
        }
    }
}

async fn hash_blocking(plain: Zeroizing<String>, cost: u8) -> Result<String, AuthError> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&plain, cost)).await??;
    Ok(hash)
}

/// Enough of a code to correlate log lines without making it usable.
fn mask_code(code: &str) -> String {
    let prefix: String = code.chars().take(6).collect();
    format!("{prefix}…")
}
