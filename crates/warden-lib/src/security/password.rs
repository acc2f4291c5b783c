// ============================
// warden-lib/src/security/password.rs
// ============================
//! Password policy, hashing and verification.
use rand::{distr::Alphanumeric, Rng};
use scrypt::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Params, Scrypt,
};
use thiserror::Error;
use warden_common::PasswordPolicy;
use zeroize::Zeroizing;

/// scrypt block size and parallelism; only log2(N) is configurable.
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_OUTPUT_LEN: usize = 32;

/// Why a password was rejected. The messages are shown to users as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordViolation {
    #[error("Password is too short: {length} characters (minimum {min})")]
    TooShort { length: usize, min: usize },

    #[error("Password is too long: {length} characters (maximum {max})")]
    TooLong { length: usize, max: usize },

    #[error("Password must contain at least one letter")]
    MissingLetter,

    #[error("Password must contain at least one digit")]
    MissingDigit,
}

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

/// Check a password against the policy.
///
/// Length is measured in characters, not bytes, and is checked before the
/// character classes so the reported reason is deterministic. Letters are
/// any Unicode alphabetic character.
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> Result<(), PasswordViolation> {
    let length = password.chars().count();
    if length < policy.min_length {
        return Err(PasswordViolation::TooShort {
            length,
            min: policy.min_length,
        });
    }
    if length > policy.max_length {
        return Err(PasswordViolation::TooLong {
            length,
            max: policy.max_length,
        });
    }
    if policy.require_letters && !password.chars().any(char::is_alphabetic) {
        return Err(PasswordViolation::MissingLetter);
    }
    if policy.require_digits && !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordViolation::MissingDigit);
    }
    Ok(())
}

/// Hash a password using scrypt with a fresh random salt and the given
/// cost (log2 N).
pub fn hash_password(plain: &str, cost: u8) -> Result<String, HashError> {
    let params = Params::new(cost, SCRYPT_R, SCRYPT_P, SCRYPT_OUTPUT_LEN)
        .map_err(|e| HashError(e.to_string()))?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Scrypt
        .hash_password_customized(plain.as_bytes(), None, None, params, &salt)
        .map_err(|e| HashError(e.to_string()))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a hash. The cost is read from the hash itself.
pub fn verify_password(hash: &str, plain: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Scrypt.verify_password(plain.as_bytes(), &parsed_hash).is_ok()
}

/// Generate a temporary password that satisfies `policy`.
pub fn generate_temp_password(policy: &PasswordPolicy) -> Zeroizing<String> {
    let mut rng = rand::rng();
    loop {
        let candidate: Zeroizing<String> = Zeroizing::new(
            (&mut rng)
                .sample_iter(Alphanumeric)
                .take(policy.max_length)
                .map(char::from)
                .collect(),
        );
        if validate_password(&candidate, policy).is_ok() {
            return candidate;
        }
    }
}
