// ============================
// warden-lib/src/security/token_generator.rs
// ============================
//! Secure token generation for invitation codes and session ids.
//!
//! Tokens are drawn uniformly from `[A-Za-z0-9]` using the thread-local
//! CSPRNG, which is seeded from the operating system.
use rand::{distr::Alphanumeric, Rng};

/// Default invitation code length (~190 bits)
pub const INVITE_CODE_LENGTH: usize = 32;

/// Session id length (~380 bits). Sessions are long-lived bearer
/// credentials and always get more entropy than invitation codes.
pub const SESSION_ID_LENGTH: usize = 64;

/// Generate a random alphanumeric token of `length` characters.
pub fn generate_token(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn generate_invite_code(length: usize) -> String {
    generate_token(length.min(SESSION_ID_LENGTH - 1))
}

pub fn generate_session_id() -> String {
    generate_token(SESSION_ID_LENGTH)
}
