//! Enterprise policy engine — reads `~/.tessera/policy.toml` and enforces
//! admin-managed plugin allowlists, namespace denials, and audit settings.

use crate::permissions::Permission;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Enterprise policy mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Only explicitly listed plugins can be loaded.
    Allowlist,
    /// All plugins except explicitly listed ones can be loaded.
    Denylist,
    #[default]
    /// No restrictions on plugin loading.
    Unrestricted,
}

/// Audit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    #[serde(default = "default_audit_format")]
    pub export_format: String,
    #[serde(default = "default_audit_path")]
    pub export_path: String,
}

fn default_audit_format() -> String {
    "json".to_string()
}

fn default_audit_path() -> String {
    "~/.tessera/audit/".to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            export_format: default_audit_format(),
            export_path: default_audit_path(),
        }
    }
}

/// Policy configuration parsed from `policy.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub allowed_plugin_ids: Vec<String>,
    #[serde(default)]
    pub allowed_signing_keys: Vec<String>,
    #[serde(default)]
    pub denied_namespaces: HashSet<String>,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Enforces enterprise policy decisions.
pub struct PolicyEngine {
    config: PolicyConfig,
    policy_path: Option<PathBuf>,
}

impl PolicyEngine {
    /// Loads policy from `~/.tessera/policy.toml` if it exists.
    /// Falls back to unrestricted mode with a warning on parse errors.
    pub fn load() -> Self {
        Self::load_from(dirs_path().join("policy.toml"))
    }

    /// Loads policy from an explicit path.
    pub fn load_from(policy_path: PathBuf) -> Self {
        if !policy_path.exists() {
            info!("No policy file found at {:?}, running unrestricted", policy_path);
            return Self {
                config: PolicyConfig::default(),
                policy_path: None,
            };
        }

        match std::fs::read_to_string(&policy_path) {
            Ok(contents) => match toml::from_str::<PolicyFile>(&contents) {
                Ok(file) => {
                    info!("Loaded enterprise policy from {:?}", policy_path);
                    Self {
                        config: file.into_config(),
                        policy_path: Some(policy_path),
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to parse policy file {:?}: {}. Falling back to unrestricted mode.",
                        policy_path, e
                    );
                    Self {
                        config: PolicyConfig::default(),
                        policy_path: Some(policy_path),
                    }
                }
            },
            Err(e) => {
                warn!("Failed to read policy file {:?}: {}", policy_path, e);
                Self {
                    config: PolicyConfig::default(),
                    policy_path: Some(policy_path),
                }
            }
        }
    }

    /// Creates a policy engine with explicit config (for testing).
    pub fn with_config(config: PolicyConfig) -> Self {
        Self {
            config,
            policy_path: None,
        }
    }

    /// Check if a plugin is allowed to be loaded.
    pub fn is_plugin_allowed(&self, plugin_id: &str, signing_key: Option<&str>) -> bool {
        match self.config.mode {
            PolicyMode::Unrestricted => true,
            PolicyMode::Allowlist => {
                self.config.allowed_plugin_ids.iter().any(|id| id == plugin_id)
                    || signing_key
                        .map(|k| self.config.allowed_signing_keys.iter().any(|ak| ak == k))
                        .unwrap_or(false)
            }
            PolicyMode::Denylist => {
                // In denylist mode the listed IDs act as the block list.
                !self.config.allowed_plugin_ids.iter().any(|id| id == plugin_id)
            }
        }
    }

    /// Check if a namespace permission is denied by enterprise policy.
    /// If denied by policy, the JIT prompt is never shown.
    pub fn is_permission_denied_by_policy(&self, permission: Permission) -> bool {
        self.config.denied_namespaces.contains(permission.namespace())
    }

    /// Returns audit config.
    pub fn audit_config(&self) -> &AuditConfig {
        &self.config.audit
    }

    /// Returns whether a policy file was found.
    pub fn has_policy_file(&self) -> bool {
        self.policy_path.is_some()
    }

    /// Returns the active policy config.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

/// Raw TOML structure matching the policy.toml format.
#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: PolicySection,
}

#[derive(Deserialize, Default)]
struct PolicySection {
    #[serde(default)]
    mode: PolicyMode,
    #[serde(default, rename = "allowed-plugins")]
    allowed_plugins: AllowedPlugins,
    #[serde(default, rename = "denied-namespaces")]
    denied_namespaces: DeniedNamespaces,
    #[serde(default)]
    audit: AuditConfig,
}

#[derive(Deserialize, Default)]
struct AllowedPlugins {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Deserialize, Default)]
struct DeniedNamespaces {
    #[serde(default)]
    ui: bool,
    #[serde(default)]
    calendar: bool,
    #[serde(default)]
    editor: bool,
    #[serde(default)]
    integration: bool,
}

impl PolicyFile {
    fn into_config(self) -> PolicyConfig {
        let mut denied = HashSet::new();
        if self.policy.denied_namespaces.ui {
            denied.insert("ui".to_string());
        }
        if self.policy.denied_namespaces.calendar {
            denied.insert("calendar".to_string());
        }
        if self.policy.denied_namespaces.editor {
            denied.insert("editor".to_string());
        }
        if self.policy.denied_namespaces.integration {
            denied.insert("integration".to_string());
        }

        PolicyConfig {
            mode: self.policy.mode,
            allowed_plugin_ids: self.policy.allowed_plugins.ids,
            allowed_signing_keys: self.policy.allowed_plugins.keys,
            denied_namespaces: denied,
            audit: self.policy.audit,
        }
    }
}

/// Resolve the Tessera config directory.
fn dirs_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        Path::new(&home).join(".tessera")
    } else if let Ok(home) = std::env::var("USERPROFILE") {
        Path::new(&home).join(".tessera")
    } else {
        PathBuf::from(".tessera")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_allows_all() {
        let engine = PolicyEngine::with_config(PolicyConfig::default());
        assert!(engine.is_plugin_allowed("anything", None));
        assert!(!engine.is_permission_denied_by_policy(Permission::Integration));
    }

    #[test]
    fn allowlist_mode() {
        let config = PolicyConfig {
            mode: PolicyMode::Allowlist,
            allowed_plugin_ids: vec!["tessera.notes".to_string()],
            allowed_signing_keys: vec!["key123".to_string()],
            ..Default::default()
        };
        let engine = PolicyEngine::with_config(config);

        assert!(engine.is_plugin_allowed("tessera.notes", None));
        assert!(!engine.is_plugin_allowed("evil.plugin", None));
        assert!(engine.is_plugin_allowed("any.plugin", Some("key123")));
        assert!(!engine.is_plugin_allowed("any.plugin", Some("wrong-key")));
    }

    #[test]
    fn denylist_mode_blocks_listed_allows_others() {
        let config = PolicyConfig {
            mode: PolicyMode::Denylist,
            allowed_plugin_ids: vec!["evil.plugin".to_string()],
            ..Default::default()
        };
        let engine = PolicyEngine::with_config(config);

        assert!(!engine.is_plugin_allowed("evil.plugin", None));
        assert!(engine.is_plugin_allowed("good.plugin", None));
    }

    #[test]
    fn parse_policy_toml() {
        let toml_str = r#"
[policy]
mode = "allowlist"

[policy.allowed-plugins]
ids = ["tessera.notes", "tessera.tasks"]
keys = ["official-key"]

[policy.denied-namespaces]
integration = true
editor = true

[policy.audit]
enabled = true
export_format = "json"
export_path = "/tmp/audit"
"#;
        let file: PolicyFile = toml::from_str(toml_str).unwrap();
        let config = file.into_config();

        assert_eq!(config.mode, PolicyMode::Allowlist);
        assert_eq!(config.allowed_plugin_ids.len(), 2);
        assert!(config.denied_namespaces.contains("integration"));
        assert!(config.denied_namespaces.contains("editor"));
        assert!(!config.denied_namespaces.contains("ui"));
        assert!(config.audit.enabled);
    }

    #[test]
    fn load_from_missing_file_is_unrestricted() {
        let dir = tempfile::tempdir().unwrap();
        let fake_path = dir.path().join("nonexistent.toml");

        let engine = PolicyEngine::load_from(fake_path);
        assert!(!engine.has_policy_file());
        assert!(engine.is_plugin_allowed("anything", None));
    }

    /// Helper: write TOML content to a temp file and load via `load_from`.
    fn load_policy_from_str(toml_content: &str) -> PolicyEngine {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, toml_content).unwrap();
        PolicyEngine::load_from(path)
    }

    #[test]
    fn load_from_allowlist_file() {
        let engine = load_policy_from_str(
            r#"
[policy]
mode = "allowlist"

[policy.allowed-plugins]
ids = ["tessera.notes"]
keys = ["official-signing-key"]
"#,
        );
        assert!(engine.has_policy_file());
        assert_eq!(engine.config().mode, PolicyMode::Allowlist);
        assert!(engine.is_plugin_allowed("tessera.notes", None));
        assert!(engine.is_plugin_allowed("unknown.plugin", Some("official-signing-key")));
        assert!(!engine.is_plugin_allowed("evil.plugin", None));
    }

    #[test]
    fn load_from_file_with_denied_namespaces() {
        let engine = load_policy_from_str(
            r#"
[policy]
mode = "unrestricted"

[policy.denied-namespaces]
ui = true
calendar = true
editor = true
integration = true
"#,
        );
        assert!(engine.is_permission_denied_by_policy(Permission::Ui));
        assert!(engine.is_permission_denied_by_policy(Permission::Calendar));
        assert!(engine.is_permission_denied_by_policy(Permission::Editor));
        assert!(engine.is_permission_denied_by_policy(Permission::Integration));
        // Tier 1 namespaces are not deniable via policy.
        assert!(!engine.is_permission_denied_by_policy(Permission::Storage));
    }

    #[test]
    fn load_from_malformed_file_falls_back_unrestricted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "this is not valid toml {{{{").unwrap();

        let engine = PolicyEngine::load_from(path);
        assert!(engine.has_policy_file());
        assert!(engine.is_plugin_allowed("anything", None));
    }

    #[test]
    fn empty_policy_section_defaults_to_unrestricted() {
        let engine = load_policy_from_str("[policy]\n");
        assert_eq!(engine.config().mode, PolicyMode::Unrestricted);
        assert!(engine.config().allowed_plugin_ids.is_empty());
        assert!(engine.config().denied_namespaces.is_empty());
    }

    #[test]
    fn audit_config_defaults() {
        let engine = PolicyEngine::with_config(PolicyConfig::default());
        let audit = engine.audit_config();
        assert!(!audit.enabled);
        assert_eq!(audit.export_format, "json");
        assert_eq!(audit.export_path, "~/.tessera/audit/");
    }
}
