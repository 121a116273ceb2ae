//! Role registry: one role definition per name, kept in registration order

use super::role::Role;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("role {0} is already registered")]
    DuplicateRole(String),

    #[error("role {0} not found")]
    RoleNotFound(String),
}

/// Owns the set of roles available to sessions
///
/// Lookups are linear; a registry holds a handful of roles.
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: Vec<Role>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a role; fails without touching the existing entry if the name is taken
    pub fn register(&mut self, role: Role) -> Result<(), RegistryError> {
        if self.contains(role.name()) {
            return Err(RegistryError::DuplicateRole(role.name().to_string()));
        }
        tracing::debug!(role = role.name(), backend = role.backend().id(), "Role registered");
        self.roles.push(role);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&Role, RegistryError> {
        self.roles
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| RegistryError::RoleNotFound(name.to_string()))
    }

    /// Resolve several names at once, preserving the requested order
    pub fn resolve_all(&self, names: &[&str]) -> Result<Vec<Role>, RegistryError> {
        names
            .iter()
            .map(|name| self.resolve(name).cloned())
            .collect()
    }

    /// Remove a role so the name can be registered again
    pub fn unregister(&mut self, name: &str) -> Result<Role, RegistryError> {
        let idx = self
            .roles
            .iter()
            .position(|r| r.name() == name)
            .ok_or_else(|| RegistryError::RoleNotFound(name.to_string()))?;
        Ok(self.roles.remove(idx))
    }

    /// Roles in registration order
    pub fn list_roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.iter().any(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
