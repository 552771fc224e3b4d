//! Role collections, membership resolution and the three-way diff
//!
//! The diff turns three snapshots into an ordered statement list:
//!
//! - `managed`: roles this tool owns and may drop
//! - `desired`: the target state computed from the directory
//! - `available`: every role currently in the cluster
//!
//! Statements come out in the order they must run against a live server:
//! renames, then creations (members before the groups granting them), then
//! alterations of existing roles, then drops (groups before their members).

use crate::error::{Result, RoleSyncError};
use crate::options::Capabilities;
use crate::role::Role;
use crate::statement::Statement;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// The built-in role every other role is implicitly a member of
pub const PUBLIC_ROLE: &str = "public";

/// A set of roles keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    roles: BTreeMap<String, Role>,
}

impl RoleSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a role, replacing any role with the same name
    pub fn insert(&mut self, role: Role) -> Option<Role> {
        self.roles.insert(role.name.clone(), role)
    }

    /// Insert a role, merging it with an existing definition of the same name
    pub fn add(&mut self, role: Role) -> Result<()> {
        match self.roles.get_mut(&role.name) {
            Some(existing) => existing.merge(role),
            None => {
                self.insert(role);
                Ok(())
            }
        }
    }

    /// Remove a role by name
    pub fn remove(&mut self, name: &str) -> Option<Role> {
        self.roles.remove(name)
    }

    /// Look up a role by name
    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// Look up a role by name, mutably
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Role> {
        self.roles.get_mut(name)
    }

    /// Whether a role with this exact name exists
    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Roles in name order
    pub fn iter(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Roles in name order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Role> {
        self.roles.values_mut()
    }

    /// Role names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Roles of both sets; on collision the role from `self` is kept
    pub fn union(&self, other: &RoleSet) -> RoleSet {
        let mut result = other.clone();
        for role in self.iter() {
            result.insert(role.clone());
        }
        result
    }

    /// Roles of `self` whose name is absent from `other`
    pub fn difference(&self, other: &RoleSet) -> RoleSet {
        self.iter()
            .filter(|role| !other.contains(&role.name))
            .cloned()
            .collect()
    }

    /// Roles of `self` whose name is also in `other`
    pub fn intersection(&self, other: &RoleSet) -> RoleSet {
        self.iter()
            .filter(|role| other.contains(&role.name))
            .cloned()
            .collect()
    }

    /// Turn every `parents` declaration into a `members` entry on the parent
    ///
    /// Resolving twice is a no-op.
    pub fn resolve_membership(&mut self) -> Result<()> {
        let mut edges = Vec::new();
        for role in self.roles.values_mut() {
            for parent in std::mem::take(&mut role.parents) {
                edges.push((parent, role.name.clone()));
            }
        }

        for (parent_name, child) in edges {
            let parent = self
                .roles
                .get_mut(&parent_name)
                .ok_or_else(|| RoleSyncError::UnknownParentRole(parent_name.clone()))?;
            if !parent.members.contains(&child) {
                parent.members.push(child);
            }
        }
        Ok(())
    }

    /// Roles in dependency order, members before the roles containing them
    ///
    /// Depth-first post-order walk from roles in name order. Members outside
    /// the set are treated as already satisfied, and cycles are cut by the
    /// visited set.
    pub fn flatten(&self) -> Vec<&Role> {
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(self.roles.len());
        for name in self.roles.keys() {
            self.walk(name, &mut seen, &mut order);
        }
        order
    }

    fn walk<'a>(&'a self, name: &str, seen: &mut HashSet<&'a str>, order: &mut Vec<&'a Role>) {
        let Some(role) = self.roles.get(name) else {
            return;
        };
        if !seen.insert(role.name.as_str()) {
            return;
        }
        for member in &role.members {
            self.walk(member, seen, order);
        }
        order.push(role);
    }

    /// Statements bringing the cluster from `available` to `desired`
    ///
    /// `self` is the managed set: roles outside of it are reused but never
    /// dropped.
    pub fn diff(
        &self,
        desired: &RoleSet,
        available: &RoleSet,
        caps: &Capabilities,
    ) -> Vec<Statement> {
        let mut statements = Vec::new();

        // Create or rename missing roles.
        let mut missing = desired.difference(available);
        let mut renamed: HashMap<String, Role> = HashMap::new();
        let candidates: Vec<Role> = missing
            .flatten()
            .into_iter()
            .filter(|role| self.contains(role.lname()) && !desired.contains(role.lname()))
            .cloned()
            .collect();
        for role in candidates {
            if let Some(previous) = renamed.get(role.lname()) {
                warn!(
                    "Both {} and {} match existing role {}. Renaming to {} only.",
                    previous.name,
                    role.name,
                    role.lname(),
                    previous.name
                );
                continue;
            }
            debug!("Detected rename from {} to {}.", role.lname(), role.name);
            statements.extend(role.rename());
            missing.remove(&role.name);
            renamed.insert(role.lname().to_string(), role);
        }

        for role in missing.flatten() {
            statements.extend(role.create(caps));
        }

        // Update options and memberships of existing roles.
        for role in available.intersection(desired).iter() {
            let mut mine = role.clone();
            mine.rename_members(&renamed);
            if !self.contains(&role.name) {
                warn!("Role {} already exists in cluster. Reusing.", role.name);
            }
            if let Some(its) = desired.get(&role.name) {
                statements.extend(mine.alter(its, caps));
            }
        }

        // Trash spurious managed roles, groups before their members.
        let mut spurious = self.difference(desired);
        for lname in renamed.keys() {
            spurious.remove(lname);
        }
        spurious.remove(PUBLIC_ROLE);
        for role in spurious.flatten().into_iter().rev() {
            statements.extend(role.drop());
        }

        statements
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        let mut set = RoleSet::new();
        for role in iter {
            set.insert(role);
        }
        set
    }
}

impl IntoIterator for RoleSet {
    type Item = Role;
    type IntoIter = std::collections::btree_map::IntoValues<String, Role>;

    fn into_iter(self) -> Self::IntoIter {
        self.roles.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(roles: &[&Role]) -> Vec<String> {
        roles.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_set_algebra() {
        let a: RoleSet = [Role::new("a"), Role::new("b")].into_iter().collect();
        let b: RoleSet = [Role::new("b"), Role::new("c")].into_iter().collect();

        assert_eq!(a.union(&b).names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(a.difference(&b).names().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(a.intersection(&b).names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_add_merges_definitions() {
        let mut set = RoleSet::new();
        set.add(Role::new("alice").with_parents(["devs"])).unwrap();
        set.add(Role::new("alice").with_parents(["ops"])).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("alice").unwrap().parents.len(), 2);
    }

    #[test]
    fn test_resolve_membership() {
        let mut set: RoleSet = [
            Role::new("devs"),
            Role::new("alice").with_parents(["devs"]),
            Role::new("bob").with_parents(["devs"]),
        ]
        .into_iter()
        .collect();

        set.resolve_membership().unwrap();

        let devs = set.get("devs").unwrap();
        assert_eq!(devs.members, vec!["alice".to_string(), "bob".to_string()]);
        assert!(set.get("alice").unwrap().parents.is_empty());
    }

    #[test]
    fn test_resolve_membership_is_idempotent() {
        let mut set: RoleSet = [
            Role::new("devs").with_members(["alice"]),
            Role::new("alice").with_parents(["devs"]),
        ]
        .into_iter()
        .collect();

        set.resolve_membership().unwrap();
        set.resolve_membership().unwrap();

        assert_eq!(set.get("devs").unwrap().members, vec!["alice".to_string()]);
    }

    #[test]
    fn test_resolve_unknown_parent() {
        let mut set: RoleSet = [Role::new("alice").with_parents(["ghosts"])]
            .into_iter()
            .collect();

        assert!(matches!(
            set.resolve_membership(),
            Err(RoleSyncError::UnknownParentRole(name)) if name == "ghosts"
        ));
    }

    #[test]
    fn test_flatten_members_first() {
        let set: RoleSet = [
            Role::new("a_group").with_members(["z_user", "m_group"]),
            Role::new("m_group").with_members(["b_user"]),
            Role::new("b_user"),
            Role::new("z_user"),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            names(&set.flatten()),
            vec!["z_user", "b_user", "m_group", "a_group"]
        );
    }

    #[test]
    fn test_flatten_outside_members_and_cycles() {
        let set: RoleSet = [
            Role::new("a").with_members(["b", "elsewhere"]),
            Role::new("b").with_members(["a"]),
        ]
        .into_iter()
        .collect();

        assert_eq!(names(&set.flatten()), vec!["b", "a"]);
    }
}
