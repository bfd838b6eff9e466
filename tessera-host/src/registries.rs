//! In-memory registries for plugin-contributed surface area.
//!
//! Commands, widgets, pages, sidebar panels, calendar/editor extensions and
//! integrations all land in [`Registry`] instances keyed by their declared
//! id. Registrations that need to call back into plugin code keep the
//! synthesized sandbox method name so the host can invoke it by CALL_METHOD.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// One plugin-contributed registration.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub plugin_id: String,
    pub id: String,
    /// The serializable options forwarded from the sandbox (callbacks
    /// already stripped).
    pub options: Value,
    /// Sandbox method to CALL_METHOD when the host needs the plugin-side
    /// callable for this registration.
    pub invoke_method: Option<String>,
}

/// Id-keyed registry with per-plugin cleanup.
pub struct Registry {
    kind: &'static str,
    entries: Mutex<HashMap<String, Registration>>,
}

impl Registry {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register or replace by id. Replacing another plugin's registration is
    /// allowed but logged.
    pub fn register(&self, registration: Registration) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&registration.id) {
            if existing.plugin_id != registration.plugin_id {
                warn!(
                    kind = self.kind,
                    id = %registration.id,
                    previous = %existing.plugin_id,
                    replacement = %registration.plugin_id,
                    "Registration id taken over by another plugin"
                );
            }
        }
        entries.insert(registration.id.clone(), registration);
    }

    /// Remove by id. Returns whether something was removed.
    pub fn unregister(&self, id: &str) -> bool {
        self.entries.lock().unwrap().remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Registration> {
        self.entries.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Registration> {
        let mut all: Vec<_> = self.entries.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn clear_plugin(&self, plugin_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, reg| reg.plugin_id != plugin_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A notification emitted by a plugin, queued for the host UI.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub plugin_id: String,
    pub kind: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Inspectable feed of plugin notifications.
#[derive(Default)]
pub struct NotificationFeed {
    items: Mutex<Vec<Notification>>,
}

impl NotificationFeed {
    pub fn push(&self, plugin_id: &str, kind: &str, message: &str) {
        self.items.lock().unwrap().push(Notification {
            plugin_id: plugin_id.to_string(),
            kind: kind.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    /// Most recent notifications, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Notification> {
        let items = self.items.lock().unwrap();
        let skip = items.len().saturating_sub(limit);
        items[skip..].to_vec()
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.items.lock().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reg(plugin_id: &str, id: &str) -> Registration {
        Registration {
            plugin_id: plugin_id.to_string(),
            id: id.to_string(),
            options: json!({"id": id}),
            invoke_method: None,
        }
    }

    #[test]
    fn register_get_unregister() {
        let registry = Registry::new("command");
        registry.register(reg("p1", "cmd1"));

        assert_eq!(registry.get("cmd1").unwrap().plugin_id, "p1");
        assert!(registry.unregister("cmd1"));
        assert!(!registry.unregister("cmd1"));
        assert!(registry.get("cmd1").is_none());
    }

    #[test]
    fn clear_plugin_removes_only_that_plugin() {
        let registry = Registry::new("widget");
        registry.register(reg("p1", "w1"));
        registry.register(reg("p1", "w2"));
        registry.register(reg("p2", "w3"));

        registry.clear_plugin("p1");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("w3").is_some());
    }

    #[test]
    fn same_id_is_replaced() {
        let registry = Registry::new("page");
        registry.register(reg("p1", "home"));
        registry.register(Registration {
            options: json!({"id": "home", "title": "v2"}),
            ..reg("p1", "home")
        });

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("home").unwrap().options["title"], json!("v2"));
    }

    #[test]
    fn notification_feed_recent_and_drain() {
        let feed = NotificationFeed::default();
        feed.push("p", "info", "one");
        feed.push("p", "error", "two");

        let recent = feed.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "two");

        assert_eq!(feed.drain().len(), 2);
        assert!(feed.recent(10).is_empty());
    }
}
