//! In-memory view of the role table.
use std::collections::HashMap;

use warden_common::{Role, RoleId};

#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: HashMap<RoleId, Role>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new(Role::defaults())
    }
}

impl RoleRegistry {
    /// Build from a stored table. Roles missing from it fall back to the
    /// built-in definitions so every `RoleId` always resolves.
    pub fn new(roles: Vec<Role>) -> Self {
        let mut map: HashMap<RoleId, Role> = Role::defaults()
            .into_iter()
            .map(|r| (r.role_id, r))
            .collect();
        for role in roles {
            map.insert(role.role_id, role);
        }
        Self { roles: map }
    }

    pub fn get(&self, role_id: RoleId) -> &Role {
        // new() seeds every RoleId
        &self.roles[&role_id]
    }

    pub fn priority(&self, role_id: RoleId) -> u8 {
        self.get(role_id).priority
    }

    pub fn grants(&self, role_id: RoleId, permission: &str) -> bool {
        self.get(role_id).grants(permission)
    }

    /// `role_id` meets or exceeds `min_role` in the hierarchy.
    pub fn at_least(&self, role_id: RoleId, min_role: RoleId) -> bool {
        self.priority(role_id) >= self.priority(min_role)
    }

    /// `actor` strictly outranks `target`.
    pub fn outranks(&self, actor: RoleId, target: RoleId) -> bool {
        self.priority(actor) > self.priority(target)
    }

    pub fn all(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.roles.values().cloned().collect();
        roles.sort_by_key(|r| r.priority);
        roles
    }
}
