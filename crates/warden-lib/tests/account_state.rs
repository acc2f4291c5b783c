mod common;

use std::collections::BTreeMap;

use common::{login, register, setup, setup_faulty, ROOT_EXTERNAL_ID, ROOT_PASSWORD};
use warden_common::{AuditEventType, RoleId, UserStatus};
use warden_lib::{AuditQuery, AuthError, Notification, Notifier, Storage, ValidationError};

#[tokio::test]
async fn test_block_invalidates_every_session() {
    let (manager, root, dir) = setup().await;
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;
    let first = login(&manager, 42, "alice1").await;
    let second = login(&manager, 42, "alice1").await;
    assert_eq!(manager.list_sessions(&user.user_id).await.unwrap().len(), 2);

    let invalidated = manager.block_user(&user.user_id, &root.user_id).await.unwrap();
    assert_eq!(invalidated, 2);
    assert!(manager.list_sessions(&user.user_id).await.unwrap().is_empty());
    for session in [&first, &second] {
        assert!(matches!(
            manager.validate_session(&session.session_id).await,
            Err(AuthError::InvalidSession)
        ));
    }

    // at rest the legacy flags agree with the status
    let raw = std::fs::read_to_string(
        dir.path().join("users").join(&user.user_id).join("user.json"),
    )
    .unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["is_active"], false);
    assert_eq!(json["is_blocked"], true);

    // the right password no longer opens a session
    let err = manager
        .authenticate(42, "alice1", BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    let blocked = manager
        .get_audit_log(&AuditQuery {
            event_type: Some(AuditEventType::UserBlocked),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].details["sessions_invalidated"], 2);
}

#[tokio::test]
async fn test_failed_block_leaves_user_active() {
    let (manager, storage, root, _dir) = setup_faulty().await;
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;
    let session = login(&manager, 42, "alice1").await;

    storage.set_fail_session_saves(true);
    let err = manager.block_user(&user.user_id, &root.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::Infrastructure(_)), "{err:?}");
    storage.set_fail_session_saves(false);

    // nothing half-applied: still active, session still usable
    let stored = manager.get_user(&user.user_id).await.unwrap().unwrap();
    assert_eq!(stored.status, UserStatus::Active);
    assert!(manager.validate_session(&session.session_id).await.is_ok());

    assert_eq!(manager.block_user(&user.user_id, &root.user_id).await.unwrap(), 1);
    assert!(manager.validate_session(&session.session_id).await.is_err());
}

#[tokio::test]
async fn test_sessions_of_inactive_owner_are_refused() {
    let (manager, root, _dir) = setup().await;
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;
    let session = login(&manager, 42, "alice1").await;

    // status flipped behind the manager's back, sessions left on disk
    let mut stored = manager.get_user(&user.user_id).await.unwrap().unwrap();
    stored.status = UserStatus::Blocked;
    manager.storage().save_user(&stored).await.unwrap();
    assert_eq!(manager.storage().load_sessions(&user.user_id).await.unwrap().len(), 1);

    assert!(matches!(
        manager.validate_session(&session.session_id).await,
        Err(AuthError::InvalidSession)
    ));
    assert!(manager.list_sessions(&user.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unblock_creates_no_session() {
    let (manager, root, _dir) = setup().await;
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;
    login(&manager, 42, "alice1").await;
    manager.block_user(&user.user_id, &root.user_id).await.unwrap();

    manager.unblock_user(&user.user_id, &root.user_id).await.unwrap();
    let user = manager.get_user(&user.user_id).await.unwrap().unwrap();
    assert_eq!(user.status, UserStatus::Active);
    assert!(manager.list_sessions(&user.user_id).await.unwrap().is_empty());

    login(&manager, 42, "alice1").await;
    assert_eq!(manager.list_sessions(&user.user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_block_rules() {
    let (manager, root, _dir) = setup().await;
    let admin = register(&manager, &root, 2, "ann", "ann123", RoleId::Admin).await;
    let other_admin = register(&manager, &root, 3, "amy", "amy123", RoleId::Admin).await;
    let user = register(&manager, &root, 4, "bob", "bob123", RoleId::User).await;

    let err = manager.block_user(&admin.user_id, &admin.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::SelfBlock)));

    // peers and superiors are out of reach
    let err = manager.block_user(&other_admin.user_id, &admin.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::PermissionDenied(_)));
    let err = manager.block_user(&root.user_id, &admin.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::PermissionDenied(_)));

    // plain users lack users.block
    let err = manager.block_user(&admin.user_id, &user.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::PermissionDenied(_)));

    assert!(manager.block_user(&user.user_id, &admin.user_id).await.is_ok());

    let violations = manager
        .get_audit_log(&AuditQuery {
            event_type: Some(AuditEventType::RbacViolation),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(violations.len(), 3);
}

#[tokio::test]
async fn test_block_and_unblock_notify() {
    let (manager, root, _dir) = setup().await;
    let (notifier, mut rx) = Notifier::channel();
    let manager = manager.with_notifier(notifier);
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;

    manager.block_user(&user.user_id, &root.user_id).await.unwrap();
    manager.unblock_user(&user.user_id, &root.user_id).await.unwrap();

    assert_eq!(
        rx.recv().await,
        Some(Notification::UserBlocked {
            user_id: user.user_id.clone(),
            by_user_id: root.user_id.clone(),
        })
    );
    assert_eq!(
        rx.recv().await,
        Some(Notification::UserUnblocked {
            user_id: user.user_id.clone(),
            by_user_id: root.user_id.clone(),
        })
    );
}

#[tokio::test]
async fn test_delete_requires_inactive_user() {
    let (manager, root, dir) = setup().await;
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;

    let err = manager.delete_user(&user.user_id, &root.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::UserActive(_))));
    assert!(dir.path().join("users").join(&user.user_id).exists());

    manager.block_user(&user.user_id, &root.user_id).await.unwrap();
    manager.delete_user(&user.user_id, &root.user_id).await.unwrap();

    assert!(!dir.path().join("users").join(&user.user_id).exists());
    assert!(manager.get_user(&user.user_id).await.unwrap().is_none());
    assert!(manager.find_user_by_external_id(42).await.unwrap().is_none());

    let err = manager.delete_user(&user.user_id, &root.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::UserNotFound(_))));

    let err = manager.delete_user(&root.user_id, &root.user_id).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ValidationError::SelfDelete)));
}

#[tokio::test]
async fn test_delete_evicts_user_lock() {
    let (manager, root, _dir) = setup().await;
    let user = register(&manager, &root, 42, "alice", "alice1", RoleId::User).await;
    login(&manager, 42, "alice1").await;
    manager.block_user(&user.user_id, &root.user_id).await.unwrap();
    assert!(manager.has_user_lock(&user.user_id));

    manager.delete_user(&user.user_id, &root.user_id).await.unwrap();
    assert!(!manager.has_user_lock(&user.user_id));
}

#[tokio::test]
async fn test_lock_registry_does_not_grow_under_churn() {
    let (manager, root, _dir) = setup().await;
    // root's own login leaves one entry
    login(&manager, ROOT_EXTERNAL_ID, ROOT_PASSWORD).await;
    let baseline = manager.tracked_user_locks();

    for i in 0..10 {
        let user = register(&manager, &root, 100 + i, "churn", "churn1", RoleId::User).await;
        login(&manager, 100 + i, "churn1").await;
        manager.block_user(&user.user_id, &root.user_id).await.unwrap();
        manager.delete_user(&user.user_id, &root.user_id).await.unwrap();
    }
    assert_eq!(manager.tracked_user_locks(), baseline);
}

#[tokio::test]
async fn test_delete_rejects_traversal_without_touching_disk() {
    let (manager, root, dir) = setup().await;
    let sentinel = dir.path().join("sentinel");
    std::fs::create_dir(&sentinel).unwrap();
    std::fs::write(sentinel.join("keep.txt"), b"keep").unwrap();

    for bad in ["../sentinel", "..", "/etc", "a/../../sentinel", "", "."] {
        let err = manager.delete_user(bad, &root.user_id).await.unwrap_err();
        assert!(
            matches!(err, AuthError::Validation(ValidationError::InvalidIdentifier(_))),
            "{bad:?} gave {err:?}"
        );
    }
    assert!(sentinel.join("keep.txt").exists());
    assert!(dir.path().join("users").join(&root.user_id).exists());
    assert_eq!(manager.storage().list_user_ids().await.unwrap().len(), 1);
    // rejected ids never reach the lock registry
    for bad in ["../sentinel", "..", "/etc"] {
        assert!(!manager.has_user_lock(bad));
    }
}
