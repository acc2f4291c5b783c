// crates/warden-lib/src/error.rs

//! Central error types for the auth manager.
use thiserror::Error;
use warden_common::{ExternalId, RoleId};

use crate::security::PasswordViolation;
use crate::storage::StorageError;

/// Domain rule violations. Never retryable; the message is safe to show.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0}")]
    WeakPassword(#[from] PasswordViolation),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invitation is invalid, expired or fully used")]
    InvalidInvitation,

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User {0} is still active and cannot be deleted")]
    UserActive(String),

    #[error("You cannot block your own account")]
    SelfBlock,

    #[error("You cannot delete your own account")]
    SelfDelete,

    #[error("This account is already registered")]
    AlreadyRegistered(ExternalId),

    #[error("Registration is disabled")]
    RegistrationDisabled,

    #[error("The store already has users")]
    AlreadyBootstrapped,

    #[error("Current password is incorrect")]
    WrongPassword,

    #[error("Role {0} cannot be assigned")]
    RoleNotAssignable(RoleId),

    #[error("Lifetime must be positive and at most 366 days")]
    InvalidTtl,
}

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AuthError {
    /// Disk or serialization failure; the caller may retry
    #[error("Storage error: {0}")]
    Infrastructure(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Uniform authentication failure; never says which part was wrong
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A multi-record rollback failed; persisted state needs manual repair
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Infrastructure(_))
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::Infrastructure(_) => "INFRA_001",
            AuthError::Validation(_) => "VAL_001",
            AuthError::InvalidCredentials => "AUTH_001",
            AuthError::InvalidSession => "AUTH_002",
            AuthError::PermissionDenied(_) => "RBAC_001",
            AuthError::Consistency(_) => "CONSISTENCY_001",
            AuthError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for end users
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Infrastructure(_) => {
                "Service temporarily unavailable, please try again later".to_string()
            },
            AuthError::Validation(err) => err.to_string(),
            AuthError::InvalidCredentials => "Authentication failed".to_string(),
            AuthError::InvalidSession => "Your session has expired, please log in again".to_string(),
            AuthError::PermissionDenied(_) => "Access denied".to_string(),
            AuthError::Consistency(_) | AuthError::Internal(_) => {
                "An internal error occurred".to_string()
            },
        }
    }
}

impl From<crate::security::HashError> for AuthError {
    fn from(err: crate::security::HashError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::Internal(format!("blocking task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_retryable_only_for_infrastructure() {
        let io = AuthError::from(StorageError::Io(IoError::new(ErrorKind::Other, "disk")));
        assert!(io.is_retryable());
        assert!(!AuthError::from(ValidationError::SelfBlock).is_retryable());
        assert!(!AuthError::InvalidCredentials.is_retryable());
        assert!(!AuthError::Consistency("x".into()).is_retryable());
    }

    #[test]
    fn test_user_messages_do_not_leak() {
        let io = AuthError::from(StorageError::Io(IoError::new(ErrorKind::Other, "/secret/path")));
        assert!(!io.user_message().contains("/secret/path"));
        assert_eq!(AuthError::InvalidCredentials.user_message(), "Authentication failed");
        assert_eq!(
            AuthError::PermissionDenied("users.delete".into()).user_message(),
            "Access denied"
        );
    }

    #[test]
    fn test_validation_message_is_specific() {
        let err = AuthError::from(ValidationError::WeakPassword(PasswordViolation::TooShort {
            length: 4,
            min: 5,
        }));
        assert!(err.user_message().contains('4'));
        assert_eq!(err.error_code(), "VAL_001");
    }
}
