//! Wire protocol for the Tessera plugin sandbox.
//!
//! Every exchange between the host and an isolated plugin execution context
//! is one of these messages. Messages are plain JSON-serializable values;
//! function references never cross the boundary (capability callbacks are
//! inverted into named methods instead, see `tessera-sandbox`).

mod manifest;
mod message;

pub use manifest::PluginManifest;
pub use message::{
    ApiCallPayload, ApiResponsePayload, CallMethodPayload, CallResultPayload, ConsoleLogPayload,
    DisposeAckPayload, ErrorPayload, HostMessage, InitAckPayload, InitPayload, LogLevel,
    SandboxMessage,
};
