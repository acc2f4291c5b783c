//! Security primitives: password policy and hashing, token generation,
//! brute-force rate limiting and the audit trail.

pub mod audit;
pub mod password;
pub mod rate_limit;
pub mod token_generator;

pub use audit::{details, AuditLog, AuditQuery};
pub use password::{
    generate_temp_password, hash_password, validate_password, verify_password, HashError,
    PasswordViolation,
};
pub use rate_limit::{AuthRateLimiter, RateLimitCheck};
pub use token_generator::{
    generate_invite_code, generate_session_id, generate_token, INVITE_CODE_LENGTH,
    SESSION_ID_LENGTH,
};
