//! Capability-based permission model for plugin sandboxes.
//!
//! One permission per capability namespace, in three tiers:
//! - Always granted (app, storage, notifications)
//! - Just-in-time prompted (ui, calendar, editor)
//! - Install-time reviewed (integration)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Individual permission a plugin may hold. Each gates one capability
/// namespace on the API_CALL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    // Tier 1 — always granted
    App,
    Storage,
    Notifications,

    // Tier 2 — just-in-time
    Ui,
    Calendar,
    Editor,

    // Tier 3 — install-time
    Integration,
}

impl Permission {
    /// Returns the tier for this permission.
    pub fn tier(&self) -> PermissionTier {
        match self {
            Self::App | Self::Storage | Self::Notifications => PermissionTier::AlwaysGranted,
            Self::Ui | Self::Calendar | Self::Editor => PermissionTier::JustInTime,
            Self::Integration => PermissionTier::InstallTime,
        }
    }

    /// Returns the namespace name this permission gates.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Storage => "storage",
            Self::Notifications => "notifications",
            Self::Ui => "ui",
            Self::Calendar => "calendar",
            Self::Editor => "editor",
            Self::Integration => "integration",
        }
    }

    /// Resolve a wire namespace to its gating permission.
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            "app" => Some(Self::App),
            "storage" => Some(Self::Storage),
            "notifications" => Some(Self::Notifications),
            "ui" => Some(Self::Ui),
            "calendar" => Some(Self::Calendar),
            "editor" => Some(Self::Editor),
            "integration" => Some(Self::Integration),
            _ => None,
        }
    }

    pub const ALL: [Permission; 7] = [
        Permission::App,
        Permission::Storage,
        Permission::Notifications,
        Permission::Ui,
        Permission::Calendar,
        Permission::Editor,
        Permission::Integration,
    ];
}

/// Permission tier classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionTier {
    AlwaysGranted,
    JustInTime,
    InstallTime,
}

/// Set of permissions granted to a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSet {
    granted: HashSet<Permission>,
    /// Permissions denied by user or policy (never prompt again).
    denied: HashSet<Permission>,
}

impl PermissionSet {
    /// First-party default: everything except install-time permissions.
    pub fn default_first_party() -> Self {
        let granted = Permission::ALL
            .into_iter()
            .filter(|p| p.tier() != PermissionTier::InstallTime)
            .collect();
        Self {
            granted,
            denied: HashSet::new(),
        }
    }

    /// Third-party default: only the always-granted tier.
    pub fn default_third_party() -> Self {
        let granted = Permission::ALL
            .into_iter()
            .filter(|p| p.tier() == PermissionTier::AlwaysGranted)
            .collect();
        Self {
            granted,
            denied: HashSet::new(),
        }
    }

    /// Everything granted (for testing and trusted built-ins).
    pub fn all_granted() -> Self {
        Self {
            granted: Permission::ALL.into_iter().collect(),
            denied: HashSet::new(),
        }
    }

    pub fn is_granted(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    pub fn is_denied(&self, permission: Permission) -> bool {
        self.denied.contains(&permission)
    }

    pub fn grant(&mut self, permission: Permission) {
        self.denied.remove(&permission);
        self.granted.insert(permission);
    }

    pub fn deny(&mut self, permission: Permission) {
        self.granted.remove(&permission);
        self.denied.insert(permission);
    }

    /// Check if a permission needs JIT prompting (Tier 2, not yet decided).
    pub fn needs_jit_prompt(&self, permission: Permission) -> bool {
        permission.tier() == PermissionTier::JustInTime
            && !self.granted.contains(&permission)
            && !self.denied.contains(&permission)
    }

    /// Returns all granted permissions.
    pub fn granted_permissions(&self) -> &HashSet<Permission> {
        &self.granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_party_default_excludes_install_time() {
        let perms = PermissionSet::default_first_party();
        assert!(perms.is_granted(Permission::App));
        assert!(perms.is_granted(Permission::Storage));
        assert!(perms.is_granted(Permission::Ui));
        assert!(perms.is_granted(Permission::Editor));
        assert!(!perms.is_granted(Permission::Integration));
    }

    #[test]
    fn third_party_default_is_always_granted_tier_only() {
        let perms = PermissionSet::default_third_party();
        assert!(perms.is_granted(Permission::App));
        assert!(perms.is_granted(Permission::Notifications));
        assert!(!perms.is_granted(Permission::Ui));
        assert!(!perms.is_granted(Permission::Calendar));
        assert!(!perms.is_granted(Permission::Integration));
    }

    #[test]
    fn grant_and_deny() {
        let mut perms = PermissionSet::default_third_party();
        assert!(!perms.is_granted(Permission::Ui));

        perms.grant(Permission::Ui);
        assert!(perms.is_granted(Permission::Ui));

        perms.deny(Permission::Ui);
        assert!(!perms.is_granted(Permission::Ui));
        assert!(perms.is_denied(Permission::Ui));
    }

    #[test]
    fn jit_prompt_needed_only_for_undecided_tier2() {
        let mut perms = PermissionSet::default_third_party();
        assert!(perms.needs_jit_prompt(Permission::Calendar));
        assert!(!perms.needs_jit_prompt(Permission::App)); // Tier 1, granted
        assert!(!perms.needs_jit_prompt(Permission::Integration)); // Tier 3

        perms.deny(Permission::Calendar);
        assert!(!perms.needs_jit_prompt(Permission::Calendar));
    }

    #[test]
    fn namespace_round_trip() {
        for permission in Permission::ALL {
            assert_eq!(
                Permission::from_namespace(permission.namespace()),
                Some(permission)
            );
        }
        assert_eq!(Permission::from_namespace("vault"), None);
    }

    #[test]
    fn all_granted_has_everything() {
        let perms = PermissionSet::all_granted();
        assert_eq!(perms.granted_permissions().len(), Permission::ALL.len());
    }
}
