// ============================
// crates/warden-lib/src/validation/mod.rs
// ============================
//! Input validation for identifiers that reach the file store.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::ValidationError;

const MIN_USERNAME_LENGTH: usize = 1;
const MAX_USERNAME_LENGTH: usize = 64;

// letters in any script, digits, space, and a few separators
static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{N}_.\- ]+$").expect("valid username regex"));
static INVITE_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid invite code regex"));

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trim and check a display name. Returns the trimmed value.
pub fn validate_username(username: &str) -> ValidationResult<String> {
    let trimmed = username.trim();
    let length = trimmed.chars().count();
    if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&length) {
        return Err(ValidationError::InvalidUsername(format!(
            "must be {MIN_USERNAME_LENGTH}-{MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidUsername(
            "contains unsupported characters".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn validate_invite_code(code: &str, max_length: usize) -> ValidationResult<()> {
    if code.len() <= max_length && INVITE_CODE_REGEX.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::InvalidInvitation)
    }
}
