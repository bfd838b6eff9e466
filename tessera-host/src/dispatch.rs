//! Capability dispatch: `(namespace, method)` → implementation.

use crate::error::HostError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tessera_sandbox::BoxFuture;

/// Identity of the calling plugin, passed to every capability invocation.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub plugin_id: String,
}

/// A named group of host operations reachable from plugin code.
pub trait CapabilityNamespace: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn invoke(
        &self,
        ctx: CallContext,
        method: &str,
        args: Vec<Value>,
    ) -> BoxFuture<Result<Value, HostError>>;

    /// Drop everything this namespace holds for a plugin (on unload).
    fn clear_plugin(&self, _plugin_id: &str) {}
}

/// Lookup table of capability namespaces.
#[derive(Default)]
pub struct DispatchTable {
    namespaces: HashMap<&'static str, Arc<dyn CapabilityNamespace>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, namespace: Arc<dyn CapabilityNamespace>) -> Self {
        self.namespaces.insert(namespace.name(), namespace);
        self
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.namespaces.contains_key(namespace)
    }

    /// Route one API_CALL to its implementation.
    pub async fn dispatch(
        &self,
        plugin_id: &str,
        namespace: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, HostError> {
        let implementation = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| HostError::InvalidNamespace(namespace.to_string()))?;
        implementation
            .invoke(
                CallContext {
                    plugin_id: plugin_id.to_string(),
                },
                method,
                args,
            )
            .await
    }

    pub fn clear_plugin(&self, plugin_id: &str) {
        for namespace in self.namespaces.values() {
            namespace.clear_plugin(plugin_id);
        }
    }
}

/// Error for a method the namespace does not implement.
pub(crate) fn unknown_method(namespace: &'static str, method: &str) -> HostError {
    HostError::InvalidMethod {
        namespace: namespace.to_string(),
        method: method.to_string(),
    }
}

/// Extract a required string argument.
pub(crate) fn arg_str(args: &[Value], index: usize, what: &str) -> Result<String, HostError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| HostError::InvalidArguments(format!("{what} must be a string")))
}

/// Extract a required object argument, cloned.
pub(crate) fn arg_value(args: &[Value], index: usize, what: &str) -> Result<Value, HostError> {
    args.get(index)
        .cloned()
        .ok_or_else(|| HostError::InvalidArguments(format!("{what} is required")))
}

/// Extract the id field common to registration options.
pub(crate) fn options_id(options: &Value, what: &str) -> Result<String, HostError> {
    options
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| HostError::InvalidArguments(format!("{what} options missing id")))
}
