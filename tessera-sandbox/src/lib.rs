//! Isolated execution context for Tessera plugins.
//!
//! Untrusted plugin code runs inside a [`PluginSandbox`]: a dedicated task
//! reachable only through the message protocol in `tessera-protocol`. Plugin
//! code sees a capability proxy ([`PluginApi`]) as its sole channel to the
//! outside world — every capability invocation becomes an API_CALL message
//! and suspends until the correlated API_RESPONSE arrives or the call times
//! out. There is no other escape hatch: no shared memory, no host object
//! references, no function values on the wire.
//!
//! Plugin code itself is supplied through a [`PluginLoader`] strategy rather
//! than evaluated from a string, one implementation per activation
//! convention ([`ActivateFn`] and [`StaticPlugin`]).

mod api;
mod console;
mod error;
mod limits;
mod loader;
mod session;

pub use api::{
    AppNs, CalendarNs, EditorNs, IntegrationNs, NotificationsNs, PluginApi, StorageNs, UiNs,
};
pub use console::PluginConsole;
pub use error::{ApiError, SandboxStopped};
pub use limits::SandboxLimits;
pub use loader::{
    ActivateFn, Activation, BoxFuture, Method, PluginLoader, StaticPlugin, method, sync_method,
};
pub use session::{PluginInstance, PluginSandbox, SandboxHandle};
