//! Protocol messages, tagged by `type` on the wire.
//!
//! The tag vocabulary is shared between both directions; the payload shape
//! depends on the tag *and* the direction (e.g. `INIT` carries the manifest
//! host→sandbox and the success ack sandbox→host), so each direction gets its
//! own enum. `requestId` appears only on API_CALL / API_RESPONSE — the only
//! pair that is correlated; every other reply is matched by arrival order.

use crate::manifest::PluginManifest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages the host sends into a sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostMessage {
    #[serde(rename = "INIT")]
    Init { payload: InitPayload },

    #[serde(rename = "CALL_METHOD")]
    CallMethod { payload: CallMethodPayload },

    #[serde(rename = "DISPOSE")]
    Dispose,

    /// Reply to a sandbox-issued API_CALL. The payload is kept as a raw
    /// value: the sandbox validates it defensively rather than trusting the
    /// sender to have produced a well-formed response.
    #[serde(rename = "API_RESPONSE")]
    ApiResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        payload: Value,
    },
}

/// Messages a sandbox sends back to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SandboxMessage {
    #[serde(rename = "INIT")]
    InitAck { payload: InitAckPayload },

    #[serde(rename = "CALL_METHOD")]
    CallResult { payload: CallResultPayload },

    #[serde(rename = "DISPOSE")]
    DisposeAck { payload: DisposeAckPayload },

    #[serde(rename = "API_CALL")]
    ApiCall {
        #[serde(rename = "requestId")]
        request_id: String,
        payload: ApiCallPayload,
    },

    #[serde(rename = "ERROR")]
    Error { payload: ErrorPayload },

    #[serde(rename = "CONSOLE_LOG")]
    ConsoleLog { payload: ConsoleLogPayload },
}

/// INIT, host→sandbox. Plugin code arrives as a loader handed to the sandbox
/// at spawn time; the message itself carries only identity and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    pub manifest: PluginManifest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// INIT ack, sandbox→host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitAckPayload {
    pub success: bool,
    #[serde(rename = "pluginId")]
    pub plugin_id: String,
}

/// CALL_METHOD, host→sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodPayload {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// CALL_METHOD result, sandbox→host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResultPayload {
    pub success: bool,
    pub result: Value,
}

/// DISPOSE ack, sandbox→host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisposeAckPayload {
    pub success: bool,
}

/// API_CALL, sandbox→host: a capability invocation by plugin code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallPayload {
    pub namespace: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// API_RESPONSE payload as the host constructs it. On the sandbox side the
/// inbound payload is an untyped `Value` (see [`HostMessage::ApiResponse`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponsePayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponsePayload {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The payload as it appears inside a [`HostMessage::ApiResponse`].
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).expect("API response payload serializes")
    }
}

/// ERROR, sandbox→host: any failure inside the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

/// Console severity, mirroring the sandbox console surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Error,
    Warn,
    Info,
    Debug,
}

/// CONSOLE_LOG, sandbox→host: forwarded console output, arguments
/// pre-serialized to strings inside the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLogPayload {
    pub level: LogLevel,
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn api_call_wire_shape() {
        let msg = SandboxMessage::ApiCall {
            request_id: "req_7".into(),
            payload: ApiCallPayload {
                namespace: "storage".into(),
                method: "get".into(),
                args: vec![json!("k")],
            },
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "API_CALL",
                "requestId": "req_7",
                "payload": {"namespace": "storage", "method": "get", "args": ["k"]}
            })
        );
    }

    #[test]
    fn dispose_has_no_payload() {
        let v = serde_json::to_value(&HostMessage::Dispose).unwrap();
        assert_eq!(v, json!({"type": "DISPOSE"}));
        let back: HostMessage = serde_json::from_value(json!({"type": "DISPOSE"})).unwrap();
        assert_eq!(back, HostMessage::Dispose);
    }

    #[test]
    fn init_ack_uses_camel_case_plugin_id() {
        let msg = SandboxMessage::InitAck {
            payload: InitAckPayload {
                success: true,
                plugin_id: "demo.plugin".into(),
            },
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({"type": "INIT", "payload": {"success": true, "pluginId": "demo.plugin"}})
        );
    }

    #[test]
    fn api_response_payload_omits_absent_fields() {
        let ok = ApiResponsePayload::ok(json!(42)).into_value();
        assert_eq!(ok, json!({"success": true, "result": 42}));

        let err = ApiResponsePayload::err("nope").into_value();
        assert_eq!(err, json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn malformed_api_response_payload_still_parses_as_envelope() {
        // The envelope accepts any payload value; validation happens in the
        // sandbox so a malformed response rejects one request instead of
        // poisoning the whole message stream.
        let raw = json!({"type": "API_RESPONSE", "requestId": "req_1", "payload": null});
        let msg: HostMessage = serde_json::from_value(raw).unwrap();
        match msg {
            HostMessage::ApiResponse {
                request_id,
                payload,
            } => {
                assert_eq!(request_id, "req_1");
                assert_eq!(payload, Value::Null);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn console_log_levels_serialize_lowercase() {
        let msg = SandboxMessage::ConsoleLog {
            payload: ConsoleLogPayload {
                level: LogLevel::Warn,
                args: vec!["careful".into()],
            },
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({"type": "CONSOLE_LOG", "payload": {"level": "warn", "args": ["careful"]}})
        );
    }
}
