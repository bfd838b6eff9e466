//! Built-in capability namespace implementations.
//!
//! These are the real targets of API_CALL dispatch: an in-memory plugin
//! key-value store, the notification feed, UI/calendar/editor/integration
//! registries, and outbound HTTP for registered external APIs. Method names
//! match the wire protocol (camelCase) exactly.

use crate::dispatch::{arg_str, arg_value, options_id, unknown_method, CapabilityNamespace, CallContext};
use crate::error::HostError;
use crate::registries::{NotificationFeed, Registration, Registry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_sandbox::BoxFuture;
use tracing::info;

fn ready(result: Result<Value, HostError>) -> BoxFuture<Result<Value, HostError>> {
    Box::pin(async move { result })
}

/// Identity the `app` namespace reports to plugins.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub name: String,
    pub version: String,
    pub user_id: Option<String>,
}

impl HostIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// `app.*`: host identity.
pub struct AppApi {
    identity: HostIdentity,
}

impl AppApi {
    pub fn new(identity: HostIdentity) -> Self {
        Self { identity }
    }
}

impl CapabilityNamespace for AppApi {
    fn name(&self) -> &'static str {
        "app"
    }

    fn invoke(
        &self,
        _ctx: CallContext,
        method: &str,
        _args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        let result = match method {
            "getVersion" => Ok(Value::from(self.identity.version.clone())),
            "getName" => Ok(Value::from(self.identity.name.clone())),
            "getUserId" => Ok(self
                .identity
                .user_id
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null)),
            other => Err(unknown_method("app", other)),
        };
        ready(result)
    }
}

/// `storage.*`: per-plugin key-value store with a byte quota.
pub struct StorageApi {
    max_bytes_per_plugin: usize,
    stores: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl StorageApi {
    pub fn new(max_bytes_per_plugin: usize) -> Self {
        Self {
            max_bytes_per_plugin,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Approximate bytes a plugin's store occupies.
    pub fn usage_bytes(&self, plugin_id: &str) -> usize {
        self.stores
            .lock()
            .unwrap()
            .get(plugin_id)
            .map(store_size)
            .unwrap_or(0)
    }

    pub fn get_value(&self, plugin_id: &str, key: &str) -> Option<Value> {
        self.stores
            .lock()
            .unwrap()
            .get(plugin_id)
            .and_then(|store| store.get(key).cloned())
    }
}

fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

fn store_size(store: &HashMap<String, Value>) -> usize {
    store.iter().map(|(k, v)| entry_size(k, v)).sum()
}

impl CapabilityNamespace for StorageApi {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        let result = (|| {
            let mut stores = self.stores.lock().unwrap();
            let store = stores.entry(ctx.plugin_id.clone()).or_default();
            match method {
                "get" => {
                    let key = arg_str(&args, 0, "storage key")?;
                    Ok(store.get(&key).cloned().unwrap_or(Value::Null))
                }
                "set" => {
                    let key = arg_str(&args, 0, "storage key")?;
                    let value = arg_value(&args, 1, "storage value")?;
                    let replaced = store
                        .get(&key)
                        .map(|old| entry_size(&key, old))
                        .unwrap_or(0);
                    let projected = store_size(store) - replaced + entry_size(&key, &value);
                    if projected > self.max_bytes_per_plugin {
                        return Err(HostError::Storage(format!(
                            "storage quota exceeded ({} bytes)",
                            self.max_bytes_per_plugin
                        )));
                    }
                    store.insert(key, value);
                    Ok(Value::Null)
                }
                "delete" => {
                    let key = arg_str(&args, 0, "storage key")?;
                    store.remove(&key);
                    Ok(Value::Null)
                }
                "keys" => {
                    let mut keys: Vec<&String> = store.keys().collect();
                    keys.sort();
                    Ok(json!(keys))
                }
                "clear" => {
                    store.clear();
                    Ok(Value::Null)
                }
                other => Err(unknown_method("storage", other)),
            }
        })();
        ready(result)
    }

    fn clear_plugin(&self, plugin_id: &str) {
        self.stores.lock().unwrap().remove(plugin_id);
    }
}

/// `notifications.*`: queued toasts.
pub struct NotificationsApi {
    feed: Arc<NotificationFeed>,
}

impl NotificationsApi {
    pub fn new(feed: Arc<NotificationFeed>) -> Self {
        Self { feed }
    }

    pub fn feed(&self) -> &Arc<NotificationFeed> {
        &self.feed
    }
}

impl CapabilityNamespace for NotificationsApi {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        let result = (|| {
            let (kind, message) = match method {
                "show" => {
                    let message = arg_str(&args, 0, "notification message")?;
                    let kind = args
                        .get(1)
                        .and_then(Value::as_str)
                        .unwrap_or("info")
                        .to_string();
                    (kind, message)
                }
                "info" | "success" | "error" | "warning" => {
                    (method.to_string(), arg_str(&args, 0, "notification message")?)
                }
                other => return Err(unknown_method("notifications", other)),
            };
            info!(plugin_id = %ctx.plugin_id, kind = %kind, "plugin notification: {message}");
            self.feed.push(&ctx.plugin_id, &kind, &message);
            Ok(Value::Null)
        })();
        ready(result)
    }
}

/// Host-side dialog presentation, pluggable by the embedder.
pub trait DialogHandler: Send + Sync + 'static {
    fn show(&self, plugin_id: &str, options: Value) -> BoxFuture<Result<Value, HostError>>;
}

/// Default dialog handler: records nothing and resolves with null, as if the
/// user dismissed the dialog immediately.
pub struct AutoDismissDialogs;

impl DialogHandler for AutoDismissDialogs {
    fn show(&self, _plugin_id: &str, _options: Value) -> BoxFuture<Result<Value, HostError>> {
        ready(Ok(Value::Null))
    }
}

/// `ui.*`: commands, dialogs, widgets, pages, sidebar panels.
pub struct UiApi {
    pub commands: Registry,
    pub widgets: Registry,
    pub pages: Registry,
    pub panels: Registry,
    dialogs: Arc<dyn DialogHandler>,
}

impl UiApi {
    pub fn new(dialogs: Arc<dyn DialogHandler>) -> Self {
        Self {
            commands: Registry::new("command"),
            widgets: Registry::new("widget"),
            pages: Registry::new("page"),
            panels: Registry::new("sidebar-panel"),
            dialogs,
        }
    }
}

impl CapabilityNamespace for UiApi {
    fn name(&self) -> &'static str {
        "ui"
    }

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        match method {
            "showDialog" => {
                let options = match arg_value(&args, 0, "dialog options") {
                    Ok(options) => options,
                    Err(e) => return ready(Err(e)),
                };
                self.dialogs.show(&ctx.plugin_id, options)
            }
            _ => {
                let result = (|| match method {
                    "registerCommand" => {
                        let options = arg_value(&args, 0, "command options")?;
                        let id = options_id(&options, "command")?;
                        self.commands.register(Registration {
                            plugin_id: ctx.plugin_id,
                            invoke_method: Some(format!("__command_handler_{id}")),
                            id,
                            options,
                        });
                        Ok(Value::Null)
                    }
                    "unregisterCommand" => {
                        self.commands.unregister(&arg_str(&args, 0, "command id")?);
                        Ok(Value::Null)
                    }
                    "registerWidget" => {
                        let options = arg_value(&args, 0, "widget options")?;
                        let id = options_id(&options, "widget")?;
                        self.widgets.register(Registration {
                            plugin_id: ctx.plugin_id,
                            invoke_method: Some(format!("__widget_render_{id}")),
                            id,
                            options,
                        });
                        Ok(Value::Null)
                    }
                    "unregisterWidget" => {
                        self.widgets.unregister(&arg_str(&args, 0, "widget id")?);
                        Ok(Value::Null)
                    }
                    "registerPage" => {
                        let options = arg_value(&args, 0, "page options")?;
                        let id = options_id(&options, "page")?;
                        self.pages.register(Registration {
                            plugin_id: ctx.plugin_id,
                            invoke_method: None,
                            id,
                            options,
                        });
                        Ok(Value::Null)
                    }
                    "unregisterPage" => {
                        self.pages.unregister(&arg_str(&args, 0, "page id")?);
                        Ok(Value::Null)
                    }
                    "registerSidebarPanel" => {
                        let options = arg_value(&args, 0, "panel options")?;
                        let id = options_id(&options, "sidebar panel")?;
                        self.panels.register(Registration {
                            plugin_id: ctx.plugin_id,
                            invoke_method: None,
                            id,
                            options,
                        });
                        Ok(Value::Null)
                    }
                    "unregisterSidebarPanel" => {
                        self.panels.unregister(&arg_str(&args, 0, "panel id")?);
                        Ok(Value::Null)
                    }
                    other => Err(unknown_method("ui", other)),
                })();
                ready(result)
            }
        }
    }

    fn clear_plugin(&self, plugin_id: &str) {
        self.commands.clear_plugin(plugin_id);
        self.widgets.clear_plugin(plugin_id);
        self.pages.clear_plugin(plugin_id);
        self.panels.clear_plugin(plugin_id);
    }
}

/// `calendar.*`: calendar surface extensions.
pub struct CalendarApi {
    pub extensions: Registry,
}

impl CalendarApi {
    pub fn new() -> Self {
        Self {
            extensions: Registry::new("calendar-extension"),
        }
    }
}

impl Default for CalendarApi {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityNamespace for CalendarApi {
    fn name(&self) -> &'static str {
        "calendar"
    }

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        let result = (|| match method {
            "registerExtension" => {
                let options = arg_value(&args, 0, "calendar extension options")?;
                let id = options_id(&options, "calendar extension")?;
                self.extensions.register(Registration {
                    plugin_id: ctx.plugin_id,
                    invoke_method: Some(format!("__calendar_getDailyData_{id}")),
                    id,
                    options,
                });
                Ok(Value::Null)
            }
            "unregisterExtension" => {
                self.extensions
                    .unregister(&arg_str(&args, 0, "calendar extension id")?);
                Ok(Value::Null)
            }
            other => Err(unknown_method("calendar", other)),
        })();
        ready(result)
    }

    fn clear_plugin(&self, plugin_id: &str) {
        self.extensions.clear_plugin(plugin_id);
    }
}

/// `integration.*`: OAuth providers, webhooks, external HTTP APIs.
pub struct IntegrationApi {
    pub oauth_providers: Registry,
    pub webhooks: Registry,
    pub external_apis: Registry,
}

impl IntegrationApi {
    pub fn new() -> Self {
        Self {
            oauth_providers: Registry::new("oauth-provider"),
            webhooks: Registry::new("webhook"),
            external_apis: Registry::new("external-api"),
        }
    }
}

impl Default for IntegrationApi {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityNamespace for IntegrationApi {
    fn name(&self) -> &'static str {
        "integration"
    }

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        match method {
            "callExternalAPI" => self.call_external_api(args),
            _ => {
                let result = (|| match method {
                    "registerOAuthProvider" => {
                        register_plain(&self.oauth_providers, &ctx, &args, "OAuth provider")
                    }
                    "unregisterOAuthProvider" => {
                        self.oauth_providers
                            .unregister(&arg_str(&args, 0, "OAuth provider id")?);
                        Ok(Value::Null)
                    }
                    "registerWebhook" => register_plain(&self.webhooks, &ctx, &args, "webhook"),
                    "unregisterWebhook" => {
                        self.webhooks.unregister(&arg_str(&args, 0, "webhook id")?);
                        Ok(Value::Null)
                    }
                    "registerExternalAPI" => {
                        register_plain(&self.external_apis, &ctx, &args, "external API")
                    }
                    "unregisterExternalAPI" => {
                        self.external_apis
                            .unregister(&arg_str(&args, 0, "external API id")?);
                        Ok(Value::Null)
                    }
                    other => Err(unknown_method("integration", other)),
                })();
                ready(result)
            }
        }
    }

    fn clear_plugin(&self, plugin_id: &str) {
        self.oauth_providers.clear_plugin(plugin_id);
        self.webhooks.clear_plugin(plugin_id);
        self.external_apis.clear_plugin(plugin_id);
    }
}

fn register_plain(
    registry: &Registry,
    ctx: &CallContext,
    args: &[Value],
    what: &str,
) -> Result<Value, HostError> {
    let options = arg_value(args, 0, &format!("{what} options"))?;
    let id = options_id(&options, what)?;
    registry.register(Registration {
        plugin_id: ctx.plugin_id.clone(),
        invoke_method: None,
        id,
        options,
    });
    Ok(Value::Null)
}

impl IntegrationApi {
    /// Perform an HTTP request against a registered external API.
    fn call_external_api(&self, args: Vec<Value>) -> BoxFuture<Result<Value, HostError>> {
        let prepared: Result<_, HostError> = (|| {
            let api_id = arg_str(&args, 0, "external API id")?;
            let request = args.get(1).cloned().unwrap_or(Value::Null);

            let definition = self.external_apis.get(&api_id).ok_or_else(|| {
                HostError::NetworkError(format!("external API not registered: {api_id}"))
            })?;
            let base_url = definition
                .options
                .get("baseUrl")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    HostError::NetworkError(format!("external API '{api_id}' has no baseUrl"))
                })?
                .to_string();

            let path = request
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let http_method = request
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_uppercase();
            let headers: Vec<(String, String)> = request
                .get("headers")
                .and_then(Value::as_object)
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            let body = request.get("body").cloned();

            Ok((format!("{base_url}{path}"), http_method, headers, body))
        })();

        Box::pin(async move {
            let (url, http_method, headers, body) = prepared?;

            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("Tessera/1.0")
                .build()
                .map_err(|e| HostError::NetworkError(format!("http client: {e}")))?;

            let method = reqwest::Method::from_bytes(http_method.as_bytes())
                .map_err(|_| HostError::NetworkError(format!("invalid HTTP method: {http_method}")))?;

            let mut request = client.request(method, &url);
            for (name, value) in headers {
                request = request.header(&name, &value);
            }
            if let Some(body) = body {
                request = request.json(&body);
            }

            let response = request
                .send()
                .await
                .map_err(|e| HostError::NetworkError(format!("request failed: {e}")))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| HostError::NetworkError(format!("read body: {e}")))?;

            if !status.is_success() {
                return Err(HostError::NetworkError(format!(
                    "HTTP {status} calling {url}"
                )));
            }

            let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
            Ok(json!({"status": status.as_u16(), "body": body}))
        })
    }
}

const EDITOR_COMMANDS: [&str; 3] = ["setContent", "insertText", "clearContent"];

struct EditorBuffer {
    content: Value,
    selection: (u64, u64),
}

impl Default for EditorBuffer {
    fn default() -> Self {
        Self {
            content: Value::from(""),
            selection: (0, 0),
        }
    }
}

/// `editor.*`: extensions plus in-memory editor buffers keyed by editor id.
pub struct EditorApi {
    pub extensions: Registry,
    buffers: Mutex<HashMap<String, EditorBuffer>>,
}

impl EditorApi {
    pub fn new() -> Self {
        Self {
            extensions: Registry::new("editor-extension"),
            buffers: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for EditorApi {
    fn default() -> Self {
        Self::new()
    }
}

fn editor_id(args: &[Value], index: usize) -> String {
    args.get(index)
        .and_then(Value::as_str)
        .unwrap_or("main")
        .to_string()
}

impl CapabilityNamespace for EditorApi {
    fn name(&self) -> &'static str {
        "editor"
    }

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>> {
        let result = (|| {
            let mut buffers = self.buffers.lock().unwrap();
            match method {
                "registerExtension" => {
                    drop(buffers);
                    let options = arg_value(&args, 0, "editor extension options")?;
                    let id = options_id(&options, "editor extension")?;
                    self.extensions.register(Registration {
                        plugin_id: ctx.plugin_id,
                        invoke_method: None,
                        id,
                        options,
                    });
                    Ok(Value::Null)
                }
                "unregisterExtension" => {
                    drop(buffers);
                    self.extensions
                        .unregister(&arg_str(&args, 0, "editor extension id")?);
                    Ok(Value::Null)
                }
                "getContent" => {
                    let buffer = buffers.entry(editor_id(&args, 0)).or_default();
                    Ok(buffer.content.clone())
                }
                "setContent" => {
                    let content = arg_value(&args, 0, "editor content")?;
                    let buffer = buffers.entry(editor_id(&args, 1)).or_default();
                    buffer.content = content;
                    Ok(Value::Null)
                }
                "getSelection" => {
                    let buffer = buffers.entry(editor_id(&args, 0)).or_default();
                    Ok(json!({"from": buffer.selection.0, "to": buffer.selection.1}))
                }
                "setSelection" => {
                    let from = args.get(0).and_then(Value::as_u64).ok_or_else(|| {
                        HostError::InvalidArguments("selection from must be a number".into())
                    })?;
                    let to = args.get(1).and_then(Value::as_u64).ok_or_else(|| {
                        HostError::InvalidArguments("selection to must be a number".into())
                    })?;
                    let buffer = buffers.entry(editor_id(&args, 2)).or_default();
                    buffer.selection = (from, to);
                    Ok(Value::Null)
                }
                "executeCommand" => {
                    let command = arg_str(&args, 0, "editor command")?;
                    let buffer = buffers.entry("main".to_string()).or_default();
                    match command.as_str() {
                        "setContent" => {
                            buffer.content = arg_value(&args, 1, "editor content")?;
                            Ok(Value::Null)
                        }
                        "clearContent" => {
                            buffer.content = Value::from("");
                            buffer.selection = (0, 0);
                            Ok(Value::Null)
                        }
                        "insertText" => {
                            let text = arg_str(&args, 1, "text to insert")?;
                            let existing = buffer.content.as_str().ok_or_else(|| {
                                HostError::InvalidArguments("editor content is not text".into())
                            })?;
                            let at = (buffer.selection.0 as usize)
                                .min(existing.chars().count());
                            let mut updated: String =
                                existing.chars().take(at).collect();
                            updated.push_str(&text);
                            updated.extend(existing.chars().skip(at));
                            buffer.content = Value::from(updated);
                            let advanced =
                                buffer.selection.0 + text.chars().count() as u64;
                            buffer.selection = (advanced, advanced);
                            Ok(Value::Null)
                        }
                        other => Err(HostError::InvalidArguments(format!(
                            "unknown editor command: {other}"
                        ))),
                    }
                }
                "canExecuteCommand" => {
                    let command = arg_str(&args, 0, "editor command")?;
                    Ok(Value::from(EDITOR_COMMANDS.contains(&command.as_str())))
                }
                other => Err(unknown_method("editor", other)),
            }
        })();
        ready(result)
    }

    fn clear_plugin(&self, plugin_id: &str) {
        self.extensions.clear_plugin(plugin_id);
    }
}

/// The full set of built-in namespaces, shared between the dispatch table
/// and host-side code that inspects registries or feeds.
pub struct StandardApis {
    pub app: Arc<AppApi>,
    pub storage: Arc<StorageApi>,
    pub notifications: Arc<NotificationsApi>,
    pub ui: Arc<UiApi>,
    pub calendar: Arc<CalendarApi>,
    pub integration: Arc<IntegrationApi>,
    pub editor: Arc<EditorApi>,
}

impl StandardApis {
    pub fn new(identity: HostIdentity) -> Self {
        Self {
            app: Arc::new(AppApi::new(identity)),
            storage: Arc::new(StorageApi::new(10 * 1024 * 1024)),
            notifications: Arc::new(NotificationsApi::new(Arc::new(NotificationFeed::default()))),
            ui: Arc::new(UiApi::new(Arc::new(AutoDismissDialogs))),
            calendar: Arc::new(CalendarApi::new()),
            integration: Arc::new(IntegrationApi::new()),
            editor: Arc::new(EditorApi::new()),
        }
    }

    pub fn dispatch_table(&self) -> crate::dispatch::DispatchTable {
        crate::dispatch::DispatchTable::new()
            .register(self.app.clone())
            .register(self.storage.clone())
            .register(self.notifications.clone())
            .register(self.ui.clone())
            .register(self.calendar.clone())
            .register(self.integration.clone())
            .register(self.editor.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchTable;
    use pretty_assertions::assert_eq;

    fn table() -> DispatchTable {
        StandardApis::new(HostIdentity::new("Tessera", "1.0.0").with_user("user-1"))
            .dispatch_table()
    }

    #[tokio::test]
    async fn app_identity_round_trip() {
        let table = table();
        assert_eq!(
            table.dispatch("p", "app", "getName", vec![]).await.unwrap(),
            json!("Tessera")
        );
        assert_eq!(
            table.dispatch("p", "app", "getVersion", vec![]).await.unwrap(),
            json!("1.0.0")
        );
        assert_eq!(
            table.dispatch("p", "app", "getUserId", vec![]).await.unwrap(),
            json!("user-1")
        );
    }

    #[tokio::test]
    async fn storage_crud_is_plugin_scoped() {
        let table = table();
        table
            .dispatch("p1", "storage", "set", vec![json!("k"), json!("v1")])
            .await
            .unwrap();
        table
            .dispatch("p2", "storage", "set", vec![json!("k"), json!("v2")])
            .await
            .unwrap();

        assert_eq!(
            table.dispatch("p1", "storage", "get", vec![json!("k")]).await.unwrap(),
            json!("v1")
        );
        assert_eq!(
            table.dispatch("p2", "storage", "get", vec![json!("k")]).await.unwrap(),
            json!("v2")
        );

        table
            .dispatch("p1", "storage", "delete", vec![json!("k")])
            .await
            .unwrap();
        assert_eq!(
            table.dispatch("p1", "storage", "get", vec![json!("k")]).await.unwrap(),
            Value::Null
        );
        assert_eq!(
            table.dispatch("p2", "storage", "keys", vec![]).await.unwrap(),
            json!(["k"])
        );
    }

    #[tokio::test]
    async fn storage_quota_is_enforced() {
        let storage = StorageApi::new(64);
        let ctx = CallContext {
            plugin_id: "p".into(),
        };
        storage
            .invoke(ctx.clone(), "set", vec![json!("a"), json!("small")])
            .await
            .unwrap();

        let err = storage
            .invoke(
                ctx.clone(),
                "set",
                vec![json!("b"), json!("x".repeat(100))],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("storage quota exceeded"));

        // Existing keys can still be replaced within quota.
        storage
            .invoke(ctx, "set", vec![json!("a"), json!("tiny")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn notifications_land_in_feed() {
        let apis = StandardApis::new(HostIdentity::new("Tessera", "1.0.0"));
        let table = apis.dispatch_table();
        table
            .dispatch("p", "notifications", "show", vec![json!("hello"), json!("success")])
            .await
            .unwrap();
        table
            .dispatch("p", "notifications", "warning", vec![json!("careful")])
            .await
            .unwrap();

        let feed = apis.notifications.feed().recent(10);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].kind, "success");
        assert_eq!(feed[1].kind, "warning");
        assert_eq!(feed[1].message, "careful");
    }

    #[tokio::test]
    async fn register_command_keeps_invoke_method() {
        let apis = StandardApis::new(HostIdentity::new("Tessera", "1.0.0"));
        let table = apis.dispatch_table();
        table
            .dispatch(
                "p",
                "ui",
                "registerCommand",
                vec![json!({"id": "cmd1", "title": "Run"})],
            )
            .await
            .unwrap();

        let command = apis.ui.commands.get("cmd1").unwrap();
        assert_eq!(command.plugin_id, "p");
        assert_eq!(command.invoke_method.as_deref(), Some("__command_handler_cmd1"));

        table
            .dispatch("p", "ui", "unregisterCommand", vec![json!("cmd1")])
            .await
            .unwrap();
        assert!(apis.ui.commands.get("cmd1").is_none());
    }

    #[tokio::test]
    async fn calendar_extension_keeps_daily_data_method() {
        let apis = StandardApis::new(HostIdentity::new("Tessera", "1.0.0"));
        let table = apis.dispatch_table();
        table
            .dispatch(
                "p",
                "calendar",
                "registerExtension",
                vec![json!({"id": "ext1"})],
            )
            .await
            .unwrap();

        let extension = apis.calendar.extensions.get("ext1").unwrap();
        assert_eq!(
            extension.invoke_method.as_deref(),
            Some("__calendar_getDailyData_ext1")
        );
    }

    #[tokio::test]
    async fn show_dialog_auto_dismisses_by_default() {
        let table = table();
        let result = table
            .dispatch("p", "ui", "showDialog", vec![json!({"title": "Confirm"})])
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn editor_buffer_commands() {
        let table = table();
        table
            .dispatch("p", "editor", "setContent", vec![json!("hello world"), Value::Null])
            .await
            .unwrap();
        table
            .dispatch("p", "editor", "setSelection", vec![json!(5), json!(5), Value::Null])
            .await
            .unwrap();
        table
            .dispatch(
                "p",
                "editor",
                "executeCommand",
                vec![json!("insertText"), json!(",")],
            )
            .await
            .unwrap();

        assert_eq!(
            table.dispatch("p", "editor", "getContent", vec![Value::Null]).await.unwrap(),
            json!("hello, world")
        );
        assert_eq!(
            table.dispatch("p", "editor", "getSelection", vec![Value::Null]).await.unwrap(),
            json!({"from": 6, "to": 6})
        );

        assert_eq!(
            table
                .dispatch("p", "editor", "canExecuteCommand", vec![json!("insertText"), Value::Null])
                .await
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            table
                .dispatch("p", "editor", "canExecuteCommand", vec![json!("teleport"), Value::Null])
                .await
                .unwrap(),
            json!(false)
        );
    }

    #[tokio::test]
    async fn call_external_api_requires_registration() {
        let table = table();
        let err = table
            .dispatch(
                "p",
                "integration",
                "callExternalAPI",
                vec![json!("missing"), json!({})],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("external API not registered"));
    }

    #[tokio::test]
    async fn call_external_api_requires_base_url() {
        let apis = StandardApis::new(HostIdentity::new("Tessera", "1.0.0"));
        let table = apis.dispatch_table();
        table
            .dispatch(
                "p",
                "integration",
                "registerExternalAPI",
                vec![json!({"id": "svc"})],
            )
            .await
            .unwrap();

        let err = table
            .dispatch(
                "p",
                "integration",
                "callExternalAPI",
                vec![json!("svc"), json!({"path": "/x"})],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has no baseUrl"));
    }
}
