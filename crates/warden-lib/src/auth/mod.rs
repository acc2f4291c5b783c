//! Authorization core: the auth manager, per-entity locks and the role table.

mod locks;
mod manager;
mod roles;

pub use locks::LockRegistry;
pub use manager::{AuthManager, LoginOutcome};
pub use roles::RoleRegistry;
