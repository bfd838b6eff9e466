//! Plugin lifecycle manager and sandbox message pump.
//!
//! `PluginHost` owns one sandbox per active plugin. A pump task per plugin
//! drains the sandbox's message stream: API_CALLs are rate-limited,
//! permission-checked, dispatched, and answered; console output and errors
//! land in diagnostics; lifecycle acks resolve their waiting callers.
//!
//! CALL_METHOD replies carry no requestId on the wire, so the host matches
//! them to callers in issue order (the waiter queue is appended under the
//! same lock that sends the message, keeping both sides in step).

use crate::diagnostics::Diagnostics;
use crate::dispatch::DispatchTable;
use crate::error::HostError;
use crate::host_api::{HostIdentity, StandardApis};
use crate::permissions::{Permission, PermissionSet};
use crate::policy::PolicyEngine;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tessera_protocol::{
    ApiCallPayload, ApiResponsePayload, CallMethodPayload, HostMessage, InitPayload, LogLevel,
    PluginManifest, SandboxMessage,
};
use tessera_sandbox::{PluginLoader, PluginSandbox, SandboxHandle, SandboxLimits};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Options for loading one plugin.
pub struct LoadOptions {
    pub config: Option<Value>,
    pub permissions: PermissionSet,
    pub limits: SandboxLimits,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            config: None,
            permissions: PermissionSet::default_first_party(),
            limits: SandboxLimits::first_party(),
        }
    }
}

#[derive(Default)]
struct Waiters {
    init: Option<oneshot::Sender<Result<String, HostError>>>,
    calls: VecDeque<oneshot::Sender<Result<Value, HostError>>>,
    dispose: Option<oneshot::Sender<()>>,
}

struct PluginRuntime {
    manifest: PluginManifest,
    loaded_at: DateTime<Utc>,
    limits: SandboxLimits,
    loader: Arc<dyn PluginLoader>,
    config: Option<Value>,
    permissions: Mutex<PermissionSet>,
    handle: SandboxHandle,
    waiters: Mutex<Waiters>,
}

struct LoadedPlugin {
    runtime: Arc<PluginRuntime>,
    pump: JoinHandle<()>,
}

/// Owns all active plugin sandboxes and routes their traffic.
pub struct PluginHost {
    apis: StandardApis,
    dispatch: Arc<DispatchTable>,
    policy: PolicyEngine,
    rate_limiter: Arc<RateLimiter>,
    diagnostics: Arc<Diagnostics>,
    plugins: Mutex<HashMap<String, LoadedPlugin>>,
}

impl PluginHost {
    /// Create a host with enterprise policy loaded from disk.
    pub fn new(identity: HostIdentity) -> Self {
        Self::with_policy(identity, PolicyEngine::load())
    }

    pub fn with_policy(identity: HostIdentity, policy: PolicyEngine) -> Self {
        let apis = StandardApis::new(identity);
        let dispatch = Arc::new(apis.dispatch_table());
        Self {
            apis,
            dispatch,
            policy,
            rate_limiter: Arc::new(RateLimiter::default()),
            diagnostics: Arc::new(Diagnostics::default()),
            plugins: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the rate limit configuration. Call before loading plugins.
    pub fn with_rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(config));
        self
    }

    pub fn apis(&self) -> &StandardApis {
        &self.apis
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    // ================================================================
    // Loading / Unloading
    // ================================================================

    /// Load a plugin: policy check, sandbox spawn, INIT, registration.
    /// Returns the plugin id acknowledged by the sandbox.
    pub async fn load_plugin(
        &self,
        manifest: PluginManifest,
        loader: Arc<dyn PluginLoader>,
        options: LoadOptions,
    ) -> Result<String, HostError> {
        let plugin_id = manifest.id.clone();

        if !self.policy.is_plugin_allowed(&plugin_id, None) {
            return Err(HostError::PolicyDenied(format!(
                "plugin '{plugin_id}' blocked by policy"
            )));
        }

        if self.plugins.lock().unwrap().contains_key(&plugin_id) {
            return Err(HostError::PluginAlreadyLoaded(plugin_id));
        }

        // Policy denials override whatever the caller granted.
        let mut permissions = options.permissions;
        for permission in Permission::ALL {
            if self.policy.is_permission_denied_by_policy(permission) {
                permissions.deny(permission);
            }
        }

        let (handle, messages) = PluginSandbox::spawn(loader.clone(), options.limits.clone());
        let runtime = Arc::new(PluginRuntime {
            manifest: manifest.clone(),
            loaded_at: Utc::now(),
            limits: options.limits,
            loader,
            config: options.config.clone(),
            permissions: Mutex::new(permissions),
            handle,
            waiters: Mutex::new(Waiters::default()),
        });
        let pump = tokio::spawn(pump(
            runtime.clone(),
            messages,
            self.dispatch.clone(),
            self.rate_limiter.clone(),
            self.diagnostics.clone(),
        ));

        let (tx, init_rx) = oneshot::channel();
        {
            let mut waiters = runtime.waiters.lock().unwrap();
            waiters.init = Some(tx);
            if runtime
                .handle
                .send(HostMessage::Init {
                    payload: InitPayload {
                        manifest,
                        config: options.config,
                    },
                })
                .is_err()
            {
                waiters.init = None;
                drop(waiters);
                pump.abort();
                return Err(HostError::InitializationFailed(
                    "sandbox failed to start".to_string(),
                ));
            }
        }

        let acked_id = match tokio::time::timeout(runtime.limits.init_deadline(), init_rx).await {
            Err(_) => {
                runtime.handle.stop();
                pump.abort();
                return Err(HostError::Timeout {
                    plugin_id,
                    timeout_ms: runtime.limits.init_deadline_ms,
                });
            }
            Ok(Err(_)) => {
                runtime.handle.stop();
                pump.abort();
                return Err(HostError::InitializationFailed(
                    "sandbox terminated during initialization".to_string(),
                ));
            }
            Ok(Ok(Err(error))) => {
                runtime.handle.stop();
                pump.abort();
                return Err(error);
            }
            Ok(Ok(Ok(acked_id))) => acked_id,
        };

        {
            let mut plugins = self.plugins.lock().unwrap();
            if plugins.contains_key(&plugin_id) {
                runtime.handle.stop();
                pump.abort();
                return Err(HostError::PluginAlreadyLoaded(plugin_id));
            }
            plugins.insert(plugin_id.clone(), LoadedPlugin { runtime, pump });
        }

        info!(plugin_id = %plugin_id, "Plugin loaded");
        Ok(acked_id)
    }

    /// Unload a plugin: DISPOSE (bounded by the shutdown deadline), stop the
    /// sandbox, clear all namespace registrations and rate-limit state.
    /// Diagnostics are kept for post-mortem inspection.
    pub async fn unload_plugin(&self, plugin_id: &str) -> Result<(), HostError> {
        let loaded = self
            .plugins
            .lock()
            .unwrap()
            .remove(plugin_id)
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
        let runtime = &loaded.runtime;

        let (tx, dispose_rx) = oneshot::channel();
        let dispose_sent = {
            let mut waiters = runtime.waiters.lock().unwrap();
            waiters.dispose = Some(tx);
            runtime.handle.send(HostMessage::Dispose).is_ok()
        };
        if dispose_sent {
            match tokio::time::timeout(runtime.limits.shutdown_deadline(), dispose_rx).await {
                Ok(Ok(())) => {}
                _ => warn!(plugin_id, "dispose did not acknowledge within deadline"),
            }
        }

        runtime.handle.stop();
        loaded.pump.abort();
        self.dispatch.clear_plugin(plugin_id);
        self.rate_limiter.remove_plugin(plugin_id);

        info!(plugin_id, "Plugin unloaded");
        Ok(())
    }

    /// Unload and load again with the retained loader and configuration.
    pub async fn reload_plugin(&self, plugin_id: &str) -> Result<String, HostError> {
        let (manifest, loader, config, limits, permissions) = {
            let plugins = self.plugins.lock().unwrap();
            let loaded = plugins
                .get(plugin_id)
                .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))?;
            let runtime = &loaded.runtime;
            (
                runtime.manifest.clone(),
                runtime.loader.clone(),
                runtime.config.clone(),
                runtime.limits.clone(),
                runtime.permissions.lock().unwrap().clone(),
            )
        };

        self.unload_plugin(plugin_id).await?;
        self.load_plugin(
            manifest,
            loader,
            LoadOptions {
                config,
                permissions,
                limits,
            },
        )
        .await
    }

    // ================================================================
    // Plugin access
    // ================================================================

    fn runtime(&self, plugin_id: &str) -> Result<Arc<PluginRuntime>, HostError> {
        self.plugins
            .lock()
            .unwrap()
            .get(plugin_id)
            .map(|loaded| loaded.runtime.clone())
            .ok_or_else(|| HostError::PluginNotFound(plugin_id.to_string()))
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.plugins.lock().unwrap().contains_key(plugin_id)
    }

    pub fn manifest(&self, plugin_id: &str) -> Result<PluginManifest, HostError> {
        self.runtime(plugin_id).map(|r| r.manifest.clone())
    }

    pub fn loaded_at(&self, plugin_id: &str) -> Result<DateTime<Utc>, HostError> {
        self.runtime(plugin_id).map(|r| r.loaded_at)
    }

    /// Manifests of all loaded plugins, sorted by id.
    pub fn list_plugins(&self) -> Vec<PluginManifest> {
        let mut manifests: Vec<_> = self
            .plugins
            .lock()
            .unwrap()
            .values()
            .map(|loaded| loaded.runtime.manifest.clone())
            .collect();
        manifests.sort_by(|a, b| a.id.cmp(&b.id));
        manifests
    }

    pub fn permissions(&self, plugin_id: &str) -> Result<PermissionSet, HostError> {
        self.runtime(plugin_id)
            .map(|r| r.permissions.lock().unwrap().clone())
    }

    pub fn grant_permission(
        &self,
        plugin_id: &str,
        permission: Permission,
    ) -> Result<(), HostError> {
        self.runtime(plugin_id)?
            .permissions
            .lock()
            .unwrap()
            .grant(permission);
        Ok(())
    }

    pub fn deny_permission(
        &self,
        plugin_id: &str,
        permission: Permission,
    ) -> Result<(), HostError> {
        self.runtime(plugin_id)?
            .permissions
            .lock()
            .unwrap()
            .deny(permission);
        Ok(())
    }

    /// The plugin's most recent error, if any.
    pub fn last_error(&self, plugin_id: &str) -> Option<String> {
        self.diagnostics.last_error(plugin_id)
    }

    // ================================================================
    // Plugin execution
    // ================================================================

    /// Invoke a plugin-exposed method and await its result.
    pub async fn call_method(
        &self,
        plugin_id: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, HostError> {
        let runtime = self.runtime(plugin_id)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = runtime.waiters.lock().unwrap();
            waiters.calls.push_back(tx);
            if runtime
                .handle
                .send(HostMessage::CallMethod {
                    payload: CallMethodPayload {
                        method: method.to_string(),
                        args,
                    },
                })
                .is_err()
            {
                waiters.calls.pop_back();
                return Err(HostError::PluginCrashed {
                    plugin_id: plugin_id.to_string(),
                    message: "sandbox is not running".to_string(),
                });
            }
        }

        rx.await.map_err(|_| HostError::PluginCrashed {
            plugin_id: plugin_id.to_string(),
            message: "sandbox terminated".to_string(),
        })?
    }

    /// Run a registered command's handler by its synthesized method name.
    pub async fn execute_command(
        &self,
        command_id: &str,
        args: Vec<Value>,
    ) -> Result<Value, HostError> {
        let command = self.apis.ui.commands.get(command_id).ok_or_else(|| {
            HostError::InvalidArguments(format!("command not registered: {command_id}"))
        })?;
        let method = command.invoke_method.ok_or_else(|| {
            HostError::InvalidArguments(format!("command has no handler: {command_id}"))
        })?;
        self.call_method(&command.plugin_id, &method, args).await
    }

    /// Render a registered widget by its synthesized method name.
    pub async fn render_widget(
        &self,
        widget_id: &str,
        args: Vec<Value>,
    ) -> Result<Value, HostError> {
        let widget = self.apis.ui.widgets.get(widget_id).ok_or_else(|| {
            HostError::InvalidArguments(format!("widget not registered: {widget_id}"))
        })?;
        let method = widget.invoke_method.ok_or_else(|| {
            HostError::InvalidArguments(format!("widget has no renderer: {widget_id}"))
        })?;
        self.call_method(&widget.plugin_id, &method, args).await
    }

    /// Query every registered calendar extension for one date.
    pub async fn collect_daily_data(
        &self,
        date: &str,
    ) -> Vec<(String, Result<Value, HostError>)> {
        let extensions = self.apis.calendar.extensions.list();
        let mut results = Vec::with_capacity(extensions.len());
        for extension in extensions {
            let Some(method) = extension.invoke_method.clone() else {
                continue;
            };
            let outcome = self
                .call_method(&extension.plugin_id, &method, vec![Value::from(date)])
                .await;
            results.push((extension.id, outcome));
        }
        results
    }
}

// ================================================================
// Message pump
// ================================================================

async fn pump(
    runtime: Arc<PluginRuntime>,
    mut messages: mpsc::UnboundedReceiver<SandboxMessage>,
    dispatch: Arc<DispatchTable>,
    rate_limiter: Arc<RateLimiter>,
    diagnostics: Arc<Diagnostics>,
) {
    while let Some(message) = messages.recv().await {
        match message {
            SandboxMessage::InitAck { payload } => {
                if let Some(waiter) = runtime.waiters.lock().unwrap().init.take() {
                    let _ = waiter.send(Ok(payload.plugin_id));
                }
            }
            SandboxMessage::CallResult { payload } => {
                let waiter = runtime.waiters.lock().unwrap().calls.pop_front();
                match waiter {
                    Some(waiter) => {
                        let outcome = if payload.success {
                            Ok(payload.result)
                        } else {
                            Err(HostError::PluginCrashed {
                                plugin_id: runtime.manifest.id.clone(),
                                message: "method call failed".to_string(),
                            })
                        };
                        let _ = waiter.send(outcome);
                    }
                    None => warn!(
                        plugin_id = %runtime.manifest.id,
                        "CALL_METHOD result with no waiting caller"
                    ),
                }
            }
            SandboxMessage::DisposeAck { .. } => {
                if let Some(waiter) = runtime.waiters.lock().unwrap().dispose.take() {
                    let _ = waiter.send(());
                }
            }
            SandboxMessage::ApiCall {
                request_id,
                payload,
            } => {
                tokio::spawn(handle_api_call(
                    runtime.clone(),
                    dispatch.clone(),
                    rate_limiter.clone(),
                    diagnostics.clone(),
                    request_id,
                    payload,
                ));
            }
            SandboxMessage::Error { payload } => {
                diagnostics.record_error(
                    &runtime.manifest.id,
                    &payload.message,
                    payload.stack.as_deref(),
                );
                let mut waiters = runtime.waiters.lock().unwrap();
                if let Some(waiter) = waiters.init.take() {
                    let _ = waiter.send(Err(HostError::InitializationFailed(payload.message)));
                } else if let Some(waiter) = waiters.calls.pop_front() {
                    let _ = waiter.send(Err(HostError::PluginCrashed {
                        plugin_id: runtime.manifest.id.clone(),
                        message: payload.message,
                    }));
                } else {
                    error!(
                        plugin_id = %runtime.manifest.id,
                        "plugin error: {}", payload.message
                    );
                }
            }
            SandboxMessage::ConsoleLog { payload } => {
                let line = payload.args.join(" ");
                match payload.level {
                    LogLevel::Error => {
                        error!(plugin_id = %runtime.manifest.id, "[plugin console] {line}")
                    }
                    LogLevel::Warn => {
                        warn!(plugin_id = %runtime.manifest.id, "[plugin console] {line}")
                    }
                    _ => debug!(plugin_id = %runtime.manifest.id, "[plugin console] {line}"),
                }
                diagnostics.record_console(&runtime.manifest.id, payload.level, &line);
            }
        }
    }

    // Sandbox gone: fail whoever is still waiting.
    let mut waiters = runtime.waiters.lock().unwrap();
    if let Some(waiter) = waiters.init.take() {
        let _ = waiter.send(Err(HostError::InitializationFailed(
            "sandbox terminated".to_string(),
        )));
    }
    while let Some(waiter) = waiters.calls.pop_front() {
        let _ = waiter.send(Err(HostError::PluginCrashed {
            plugin_id: runtime.manifest.id.clone(),
            message: "sandbox terminated".to_string(),
        }));
    }
    if let Some(waiter) = waiters.dispose.take() {
        let _ = waiter.send(());
    }
}

async fn handle_api_call(
    runtime: Arc<PluginRuntime>,
    dispatch: Arc<DispatchTable>,
    rate_limiter: Arc<RateLimiter>,
    diagnostics: Arc<Diagnostics>,
    request_id: String,
    payload: ApiCallPayload,
) {
    let plugin_id = runtime.manifest.id.clone();
    let ApiCallPayload {
        namespace,
        method,
        args,
    } = payload;

    let decision = rate_limiter.check_api_call(&plugin_id);
    if !decision.allowed {
        let reason = decision
            .reason
            .unwrap_or_else(|| "Rate limit exceeded".to_string());
        warn!(plugin_id = %plugin_id, namespace = %namespace, method = %method, "API call rate limited: {reason}");
        diagnostics.record_api_call(&plugin_id, &namespace, &method, false, Some(&reason));
        respond(&runtime, request_id, ApiResponsePayload::err(reason));
        return;
    }

    let permitted = match Permission::from_namespace(&namespace) {
        Some(permission) => runtime.permissions.lock().unwrap().is_granted(permission),
        // Unknown namespaces fall through to dispatch, which names them
        // in its error.
        None => true,
    };
    if !permitted {
        let error = HostError::PermissionDenied {
            plugin_id: plugin_id.clone(),
            namespace: namespace.clone(),
        };
        diagnostics.record_api_call(
            &plugin_id,
            &namespace,
            &method,
            false,
            Some(&error.to_string()),
        );
        rate_limiter.record_complete(&plugin_id);
        respond(&runtime, request_id, ApiResponsePayload::err(error.to_string()));
        return;
    }

    let result = dispatch.dispatch(&plugin_id, &namespace, &method, args).await;
    rate_limiter.record_complete(&plugin_id);

    match result {
        Ok(value) => {
            diagnostics.record_api_call(&plugin_id, &namespace, &method, true, None);
            respond(&runtime, request_id, ApiResponsePayload::ok(value));
        }
        Err(error) => {
            let message = error.to_string();
            diagnostics.record_api_call(&plugin_id, &namespace, &method, false, Some(&message));
            respond(&runtime, request_id, ApiResponsePayload::err(message));
        }
    }
}

fn respond(runtime: &PluginRuntime, request_id: String, payload: ApiResponsePayload) {
    let _ = runtime.handle.send(HostMessage::ApiResponse {
        request_id,
        payload: payload.into_value(),
    });
}
