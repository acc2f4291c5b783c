//! Static RBAC definitions.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role identifiers, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleId {
    Guest,
    User,
    Admin,
    SuperAdmin,
}

impl RoleId {
    pub const ALL: [RoleId; 4] = [RoleId::Guest, RoleId::User, RoleId::Admin, RoleId::SuperAdmin];

    /// Default priority used for hierarchy comparisons.
    pub fn default_priority(self) -> u8 {
        match self {
            RoleId::Guest => 0,
            RoleId::User => 10,
            RoleId::Admin => 50,
            RoleId::SuperAdmin => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoleId::Guest => "guest",
            RoleId::User => "user",
            RoleId::Admin => "admin",
            RoleId::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(RoleId::Guest),
            "user" => Ok(RoleId::User),
            "admin" => Ok(RoleId::Admin),
            "super_admin" => Ok(RoleId::SuperAdmin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A role definition: a priority plus a list of `resource.action` grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_id: RoleId,
    pub display_name: String,
    pub priority: u8,
    pub permissions: Vec<String>,
    /// Whether menus built on top of this role should be shown to its holders
    #[serde(default = "default_true")]
    pub visible_in_menu: bool,
    /// Whether administrators may hand this role out through invitations
    #[serde(default = "default_true")]
    pub assignable: bool,
}

fn default_true() -> bool {
    true
}

impl Role {
    /// Check a single `resource.action` permission. Grants may be exact,
    /// `resource.*` or the global `*`.
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|grant| permission_matches(grant, permission))
    }

    /// The built-in role table.
    pub fn defaults() -> Vec<Role> {
        let guest = vec!["profile.read"];
        let user: Vec<&str> = guest
            .iter()
            .copied()
            .chain([
                "profile.update",
                "session.read",
                "session.write",
                "content.read",
                "content.create",
            ])
            .collect();
        let admin: Vec<&str> = user
            .iter()
            .copied()
            .chain([
                "users.read",
                "users.block",
                "users.unblock",
                "invitations.create",
                "invitations.read",
                "invitations.revoke",
                "audit.read",
            ])
            .collect();

        vec![
            Role::build(RoleId::Guest, "Guest", &guest, false),
            Role::build(RoleId::User, "User", &user, true),
            Role::build(RoleId::Admin, "Administrator", &admin, true),
            Role::build(RoleId::SuperAdmin, "Super administrator", &["*"], false),
        ]
    }

    fn build(role_id: RoleId, display_name: &str, permissions: &[&str], assignable: bool) -> Role {
        Role {
            role_id,
            display_name: display_name.to_string(),
            priority: role_id.default_priority(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            visible_in_menu: true,
            assignable,
        }
    }
}

fn permission_matches(grant: &str, permission: &str) -> bool {
    if grant == "*" || grant == permission {
        return true;
    }
    match grant.strip_suffix(".*") {
        Some(resource) => permission
            .split_once('.')
            .is_some_and(|(res, _)| res == resource),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(RoleId::Guest < RoleId::User);
        assert!(RoleId::User < RoleId::Admin);
        assert!(RoleId::Admin < RoleId::SuperAdmin);
        for pair in RoleId::ALL.windows(2) {
            assert!(pair[0].default_priority() < pair[1].default_priority());
        }
    }

    #[test]
    fn test_permission_matching() {
        let role = Role {
            role_id: RoleId::Admin,
            display_name: "x".into(),
            priority: 50,
            permissions: vec!["users.*".into(), "audit.read".into()],
            visible_in_menu: true,
            assignable: true,
        };
        assert!(role.grants("users.block"));
        assert!(role.grants("audit.read"));
        assert!(!role.grants("audit.write"));
        assert!(!role.grants("usersx.block"));
    }

    #[test]
    fn test_default_table() {
        let roles = Role::defaults();
        let find = |id| roles.iter().find(|r| r.role_id == id).unwrap();
        assert!(find(RoleId::SuperAdmin).grants("anything.at_all"));
        assert!(find(RoleId::Admin).grants("users.block"));
        assert!(!find(RoleId::User).grants("users.block"));
        assert!(find(RoleId::User).grants("profile.read"));
        assert!(!find(RoleId::Guest).grants("content.create"));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("super_admin".parse::<RoleId>().unwrap(), RoleId::SuperAdmin);
        assert!("root".parse::<RoleId>().is_err());
    }
}
