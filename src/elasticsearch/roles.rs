//! Group to role mapping

use std::collections::HashMap;

/// Resolve Elasticsearch roles for a user's groups.
///
/// Groups match mapping keys case-insensitively. When no group maps to any
/// role the default roles are returned instead.
#[must_use]
pub fn resolve_roles(
    groups: &[String],
    mappings: &HashMap<String, Vec<String>>,
    default_roles: &[String],
) -> Vec<String> {
    RoleTable::new(mappings, default_roles).resolve(groups)
}

/// Pre-normalised mapping table, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RoleTable {
    mappings: HashMap<String, Vec<String>>,
    default_roles: Vec<String>,
}

impl RoleTable {
    /// Build a table, lowercasing every group key
    #[must_use]
    pub fn new(mappings: &HashMap<String, Vec<String>>, default_roles: &[String]) -> Self {
        let mut lowered: HashMap<String, Vec<String>> = HashMap::with_capacity(mappings.len());
        for (group, roles) in mappings {
            lowered
                .entry(group.to_lowercase())
                .or_default()
                .extend(roles.iter().cloned());
        }
        Self {
            mappings: lowered,
            default_roles: default_roles.to_vec(),
        }
    }

    /// Roles for the given groups, falling back to the defaults
    #[must_use]
    pub fn resolve(&self, groups: &[String]) -> Vec<String> {
        let mut roles: Vec<String> = Vec::new();
        for group in groups {
            let Some(mapped) = self.mappings.get(&group.to_lowercase()) else {
                continue;
            };
            for role in mapped {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }

        if roles.is_empty() {
            self.default_roles.clone()
        } else {
            roles
        }
    }

    /// Roles used when no group matches
    #[must_use]
    pub fn default_roles(&self) -> &[String] {
        &self.default_roles
    }
}
