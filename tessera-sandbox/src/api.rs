//! Capability proxy exposed to plugin code.
//!
//! Each namespace method serializes its arguments, posts an API_CALL to the
//! host, and suspends on the correlated API_RESPONSE. Registration calls
//! that need a host-invokable callback register the callable locally under a
//! synthesized method name and forward only the serializable options — the
//! host invokes the callable later with an ordinary CALL_METHOD against that
//! name, so the transport never carries function values.

use crate::console::PluginConsole;
use crate::error::ApiError;
use crate::loader::Method;
use crate::session::SharedState;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tessera_protocol::{ApiCallPayload, SandboxMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Cloneable handle plugin code uses to reach the host.
#[derive(Clone)]
pub struct PluginApi {
    inner: Arc<ApiInner>,
}

struct ApiInner {
    state: SharedState,
    outbound: mpsc::UnboundedSender<SandboxMessage>,
    api_call_timeout: Duration,
}

impl PluginApi {
    pub(crate) fn new(
        state: SharedState,
        outbound: mpsc::UnboundedSender<SandboxMessage>,
        api_call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ApiInner {
                state,
                outbound,
                api_call_timeout,
            }),
        }
    }

    pub fn app(&self) -> AppNs {
        AppNs { api: self.clone() }
    }

    pub fn storage(&self) -> StorageNs {
        StorageNs { api: self.clone() }
    }

    pub fn notifications(&self) -> NotificationsNs {
        NotificationsNs { api: self.clone() }
    }

    pub fn ui(&self) -> UiNs {
        UiNs { api: self.clone() }
    }

    pub fn calendar(&self) -> CalendarNs {
        CalendarNs { api: self.clone() }
    }

    pub fn integration(&self) -> IntegrationNs {
        IntegrationNs { api: self.clone() }
    }

    pub fn editor(&self) -> EditorNs {
        EditorNs { api: self.clone() }
    }

    pub fn console(&self) -> PluginConsole {
        PluginConsole::new(self.inner.outbound.clone())
    }

    /// Register a locally invocable method. Goes into the live instance when
    /// one exists, otherwise into the pending buffer merged at INIT
    /// completion — activation code registers capability handlers before the
    /// instance object is finalized.
    pub fn register_worker_method(&self, name: impl Into<String>, method: Method) {
        let name = name.into();
        let mut state = self.inner.state.lock().unwrap();
        if let Some(instance) = state.instance.as_mut() {
            instance.methods.insert(name, method);
        } else {
            state.pending_methods.insert(name, method);
        }
    }

    /// Issue one capability call and await its correlated response.
    ///
    /// Request ids are `req_<n>` with a strictly increasing counter, never
    /// reused for the life of the sandbox. On timeout the pending entry is
    /// removed so a late response finds nothing to resolve.
    pub async fn call(
        &self,
        namespace: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ApiError> {
        let (tx, rx) = oneshot::channel();
        let request_id = {
            let mut state = self.inner.state.lock().unwrap();
            state.next_request_id += 1;
            let id = format!("req_{}", state.next_request_id);
            state.pending.insert(id.clone(), tx);
            id
        };

        let message = SandboxMessage::ApiCall {
            request_id: request_id.clone(),
            payload: ApiCallPayload {
                namespace: namespace.to_string(),
                method: method.to_string(),
                args,
            },
        };
        if self.inner.outbound.send(message).is_err() {
            self.inner.state.lock().unwrap().pending.remove(&request_id);
            return Err(ApiError::Disconnected);
        }

        match tokio::time::timeout(self.inner.api_call_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(ApiError::Host(message)),
            // Sender dropped without an explicit verdict.
            Ok(Err(_)) => Err(ApiError::Host("API call failed".to_string())),
            Err(_) => {
                self.inner.state.lock().unwrap().pending.remove(&request_id);
                debug!(request_id = %request_id, namespace, method, "API call timed out");
                Err(ApiError::Timeout {
                    namespace: namespace.to_string(),
                    method: method.to_string(),
                })
            }
        }
    }
}

/// `app.*`: host identity.
pub struct AppNs {
    api: PluginApi,
}

impl AppNs {
    pub async fn get_version(&self) -> Result<Value, ApiError> {
        self.api.call("app", "getVersion", vec![]).await
    }

    pub async fn get_name(&self) -> Result<Value, ApiError> {
        self.api.call("app", "getName", vec![]).await
    }

    pub async fn get_user_id(&self) -> Result<Value, ApiError> {
        self.api.call("app", "getUserId", vec![]).await
    }
}

/// `storage.*`: plugin-scoped key-value store.
pub struct StorageNs {
    api: PluginApi,
}

impl StorageNs {
    pub async fn get(&self, key: &str) -> Result<Value, ApiError> {
        self.api.call("storage", "get", vec![Value::from(key)]).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<(), ApiError> {
        self.api
            .call("storage", "set", vec![Value::from(key), value])
            .await
            .map(|_| ())
    }

    pub async fn delete(&self, key: &str) -> Result<(), ApiError> {
        self.api
            .call("storage", "delete", vec![Value::from(key)])
            .await
            .map(|_| ())
    }

    pub async fn keys(&self) -> Result<Value, ApiError> {
        self.api.call("storage", "keys", vec![]).await
    }

    pub async fn clear(&self) -> Result<(), ApiError> {
        self.api.call("storage", "clear", vec![]).await.map(|_| ())
    }
}

/// `notifications.*`: user-visible toasts.
pub struct NotificationsNs {
    api: PluginApi,
}

impl NotificationsNs {
    pub async fn show(&self, message: &str, kind: &str) -> Result<(), ApiError> {
        self.api
            .call(
                "notifications",
                "show",
                vec![Value::from(message), Value::from(kind)],
            )
            .await
            .map(|_| ())
    }

    pub async fn info(&self, message: &str) -> Result<(), ApiError> {
        self.level("info", message).await
    }

    pub async fn success(&self, message: &str) -> Result<(), ApiError> {
        self.level("success", message).await
    }

    pub async fn error(&self, message: &str) -> Result<(), ApiError> {
        self.level("error", message).await
    }

    pub async fn warning(&self, message: &str) -> Result<(), ApiError> {
        self.level("warning", message).await
    }

    async fn level(&self, method: &str, message: &str) -> Result<(), ApiError> {
        self.api
            .call("notifications", method, vec![Value::from(message)])
            .await
            .map(|_| ())
    }
}

/// `ui.*`: commands, dialogs, widgets, pages, sidebar panels.
pub struct UiNs {
    api: PluginApi,
}

impl UiNs {
    /// Register a command. The handler stays inside the sandbox under
    /// `__command_handler_<id>`; only the serializable options cross the
    /// boundary.
    pub async fn register_command(&self, options: Value, handler: Method) -> Result<(), ApiError> {
        let id = require_id(&options, "command")?;
        self.api
            .register_worker_method(format!("__command_handler_{id}"), handler);
        let options = strip_keys(options, &["handler", "execute"]);
        self.api
            .call("ui", "registerCommand", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_command(&self, command_id: &str) -> Result<(), ApiError> {
        self.api
            .call("ui", "unregisterCommand", vec![Value::from(command_id)])
            .await
            .map(|_| ())
    }

    pub async fn show_dialog(&self, options: Value) -> Result<Value, ApiError> {
        self.api.call("ui", "showDialog", vec![options]).await
    }

    /// Register a widget. A render callable, when given, stays inside the
    /// sandbox under `__widget_render_<id>`.
    pub async fn register_widget(
        &self,
        options: Value,
        render: Option<Method>,
    ) -> Result<(), ApiError> {
        let options = match render {
            Some(render) => {
                let id = require_id(&options, "widget")?;
                self.api
                    .register_worker_method(format!("__widget_render_{id}"), render);
                strip_keys(options, &["render"])
            }
            None => options,
        };
        self.api
            .call("ui", "registerWidget", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_widget(&self, widget_id: &str) -> Result<(), ApiError> {
        self.api
            .call("ui", "unregisterWidget", vec![Value::from(widget_id)])
            .await
            .map(|_| ())
    }

    pub async fn register_page(&self, options: Value) -> Result<(), ApiError> {
        self.api
            .call("ui", "registerPage", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_page(&self, page_id: &str) -> Result<(), ApiError> {
        self.api
            .call("ui", "unregisterPage", vec![Value::from(page_id)])
            .await
            .map(|_| ())
    }

    pub async fn register_sidebar_panel(&self, options: Value) -> Result<(), ApiError> {
        self.api
            .call("ui", "registerSidebarPanel", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_sidebar_panel(&self, panel_id: &str) -> Result<(), ApiError> {
        self.api
            .call("ui", "unregisterSidebarPanel", vec![Value::from(panel_id)])
            .await
            .map(|_| ())
    }
}

/// `calendar.*`: calendar surface extensions.
pub struct CalendarNs {
    api: PluginApi,
}

impl CalendarNs {
    /// Register a calendar extension. A daily-data callable, when given,
    /// stays inside the sandbox under `__calendar_getDailyData_<id>`.
    pub async fn register_extension(
        &self,
        options: Value,
        get_daily_data: Option<Method>,
    ) -> Result<(), ApiError> {
        let options = match get_daily_data {
            Some(get_daily_data) => {
                let id = require_id(&options, "calendar extension")?;
                self.api
                    .register_worker_method(format!("__calendar_getDailyData_{id}"), get_daily_data);
                strip_keys(options, &["getDailyData"])
            }
            None => options,
        };
        self.api
            .call("calendar", "registerExtension", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_extension(&self, extension_id: &str) -> Result<(), ApiError> {
        self.api
            .call(
                "calendar",
                "unregisterExtension",
                vec![Value::from(extension_id)],
            )
            .await
            .map(|_| ())
    }
}

/// `integration.*`: OAuth providers, webhooks, external APIs.
pub struct IntegrationNs {
    api: PluginApi,
}

impl IntegrationNs {
    pub async fn register_oauth_provider(&self, options: Value) -> Result<(), ApiError> {
        self.api
            .call("integration", "registerOAuthProvider", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_oauth_provider(&self, provider_id: &str) -> Result<(), ApiError> {
        self.api
            .call(
                "integration",
                "unregisterOAuthProvider",
                vec![Value::from(provider_id)],
            )
            .await
            .map(|_| ())
    }

    pub async fn register_webhook(&self, options: Value) -> Result<(), ApiError> {
        self.api
            .call("integration", "registerWebhook", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_webhook(&self, webhook_id: &str) -> Result<(), ApiError> {
        self.api
            .call(
                "integration",
                "unregisterWebhook",
                vec![Value::from(webhook_id)],
            )
            .await
            .map(|_| ())
    }

    pub async fn register_external_api(&self, options: Value) -> Result<(), ApiError> {
        self.api
            .call("integration", "registerExternalAPI", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_external_api(&self, api_id: &str) -> Result<(), ApiError> {
        self.api
            .call(
                "integration",
                "unregisterExternalAPI",
                vec![Value::from(api_id)],
            )
            .await
            .map(|_| ())
    }

    pub async fn call_external_api(&self, api_id: &str, request: Value) -> Result<Value, ApiError> {
        self.api
            .call(
                "integration",
                "callExternalAPI",
                vec![Value::from(api_id), request],
            )
            .await
    }
}

/// `editor.*`: editor extensions and buffer access.
pub struct EditorNs {
    api: PluginApi,
}

impl EditorNs {
    pub async fn register_extension(&self, options: Value) -> Result<(), ApiError> {
        self.api
            .call("editor", "registerExtension", vec![options])
            .await
            .map(|_| ())
    }

    pub async fn unregister_extension(&self, extension_id: &str) -> Result<(), ApiError> {
        self.api
            .call(
                "editor",
                "unregisterExtension",
                vec![Value::from(extension_id)],
            )
            .await
            .map(|_| ())
    }

    pub async fn execute_command(
        &self,
        command: &str,
        mut args: Vec<Value>,
    ) -> Result<Value, ApiError> {
        let mut call_args = vec![Value::from(command)];
        call_args.append(&mut args);
        self.api.call("editor", "executeCommand", call_args).await
    }

    pub async fn get_content(&self, editor_id: Option<&str>) -> Result<Value, ApiError> {
        self.api
            .call("editor", "getContent", vec![opt_id(editor_id)])
            .await
    }

    pub async fn set_content(
        &self,
        content: Value,
        editor_id: Option<&str>,
    ) -> Result<(), ApiError> {
        self.api
            .call("editor", "setContent", vec![content, opt_id(editor_id)])
            .await
            .map(|_| ())
    }

    pub async fn get_selection(&self, editor_id: Option<&str>) -> Result<Value, ApiError> {
        self.api
            .call("editor", "getSelection", vec![opt_id(editor_id)])
            .await
    }

    pub async fn set_selection(
        &self,
        from: u64,
        to: u64,
        editor_id: Option<&str>,
    ) -> Result<(), ApiError> {
        self.api
            .call(
                "editor",
                "setSelection",
                vec![Value::from(from), Value::from(to), opt_id(editor_id)],
            )
            .await
            .map(|_| ())
    }

    pub async fn can_execute_command(
        &self,
        command: &str,
        editor_id: Option<&str>,
    ) -> Result<bool, ApiError> {
        let result = self
            .api
            .call(
                "editor",
                "canExecuteCommand",
                vec![Value::from(command), opt_id(editor_id)],
            )
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

fn opt_id(editor_id: Option<&str>) -> Value {
    editor_id.map(Value::from).unwrap_or(Value::Null)
}

fn require_id(options: &Value, what: &str) -> Result<String, ApiError> {
    options
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ApiError::InvalidOptions(format!("{what} options missing id")))
}

fn strip_keys(mut options: Value, keys: &[&str]) -> Value {
    if let Value::Object(map) = &mut options {
        for key in keys {
            map.remove(*key);
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_id_extracts_string_id() {
        assert_eq!(require_id(&json!({"id": "cmd1"}), "command").unwrap(), "cmd1");
    }

    #[test]
    fn require_id_rejects_missing_or_non_string() {
        assert!(require_id(&json!({}), "command").is_err());
        assert!(require_id(&json!({"id": 7}), "widget").is_err());
        assert!(require_id(&json!("not an object"), "command").is_err());
    }

    #[test]
    fn strip_keys_removes_only_named_keys() {
        let stripped = strip_keys(
            json!({"id": "w1", "render": "x", "title": "Widget"}),
            &["render"],
        );
        assert_eq!(stripped, json!({"id": "w1", "title": "Widget"}));
    }

    #[test]
    fn strip_keys_leaves_non_objects_alone() {
        assert_eq!(strip_keys(json!("scalar"), &["render"]), json!("scalar"));
    }
}
