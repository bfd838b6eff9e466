//! Host bridge for the Tessera plugin sandbox.
//!
//! Owns one isolated execution context per active plugin, routes its
//! capability calls (API_CALL) to real namespace implementations, relays
//! console output into the application log, and manages the plugin
//! lifecycle: load (INIT), method invocation (CALL_METHOD), and disposal
//! (DISPOSE).
//!
//! Capability access is gated three ways before dispatch: enterprise policy
//! at load time, per-namespace permissions, and per-plugin rate limits.

mod bridge;
mod diagnostics;
mod dispatch;
mod error;
mod host_api;
mod permissions;
mod policy;
mod rate_limit;
mod registries;

pub use bridge::{LoadOptions, PluginHost};
pub use diagnostics::{DiagnosticEntry, DiagnosticKind, Diagnostics};
pub use dispatch::{CallContext, CapabilityNamespace, DispatchTable};
pub use error::HostError;
pub use host_api::{
    AppApi, AutoDismissDialogs, CalendarApi, DialogHandler, EditorApi, HostIdentity,
    IntegrationApi, NotificationsApi, StandardApis, StorageApi, UiApi,
};
pub use permissions::{Permission, PermissionSet, PermissionTier};
pub use policy::{AuditConfig, PolicyConfig, PolicyEngine, PolicyMode};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use registries::{Notification, NotificationFeed, Registration, Registry};
