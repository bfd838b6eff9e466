//! Sandbox session: per-plugin state and the message event loop.
//!
//! One `SandboxSession` exists per spawned sandbox and owns everything the
//! protocol needs to correlate traffic: the live plugin instance, the pending
//! capability calls, the buffer of methods registered before activation
//! completed, and the request-id counter. All of it sits behind one lock that
//! is never held across an await.
//!
//! INIT, CALL_METHOD and DISPOSE handlers run as spawned tasks so plugin code
//! can await capability calls while the loop keeps serving API_RESPONSEs;
//! overlapping CALL_METHODs interleave at await points and are not serialized
//! against each other.

use crate::api::PluginApi;
use crate::error::SandboxStopped;
use crate::limits::SandboxLimits;
use crate::loader::{DisposeFn, Method, PluginLoader};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tessera_protocol::{
    CallMethodPayload, CallResultPayload, DisposeAckPayload, ErrorPayload, HostMessage,
    InitAckPayload, InitPayload, SandboxMessage,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// The plugin living inside a sandbox, built once per successful INIT.
pub struct PluginInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    pub methods: HashMap<String, Method>,
    pub(crate) dispose: Option<DisposeFn>,
}

pub(crate) struct SessionState {
    pub(crate) instance: Option<PluginInstance>,
    /// Methods registered by activation code before the instance exists.
    pub(crate) pending_methods: HashMap<String, Method>,
    /// Monotonic request-id counter; never reset while the sandbox lives.
    pub(crate) next_request_id: u64,
    /// In-flight capability calls keyed by `req_<n>`.
    pub(crate) pending: HashMap<String, oneshot::Sender<Result<Value, String>>>,
}

pub(crate) type SharedState = Arc<Mutex<SessionState>>;

/// Handle the host keeps for one sandbox.
pub struct SandboxHandle {
    tx: mpsc::UnboundedSender<HostMessage>,
    task: JoinHandle<()>,
}

impl SandboxHandle {
    pub fn send(&self, message: HostMessage) -> Result<(), SandboxStopped> {
        self.tx.send(message).map_err(|_| SandboxStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Hard-stop the sandbox. Prefer DISPOSE first; this abandons whatever
    /// is still executing.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Entry point for creating sandboxes.
pub struct PluginSandbox;

impl PluginSandbox {
    /// Spawn an isolated execution context. Returns the host-side handle and
    /// the stream of messages the sandbox emits. The loader is retained for
    /// the sandbox lifetime so a later INIT can re-run activation.
    pub fn spawn(
        loader: Arc<dyn PluginLoader>,
        limits: SandboxLimits,
    ) -> (SandboxHandle, mpsc::UnboundedReceiver<SandboxMessage>) {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (sandbox_tx, sandbox_rx) = mpsc::unbounded_channel();

        let state: SharedState = Arc::new(Mutex::new(SessionState {
            instance: None,
            pending_methods: HashMap::new(),
            next_request_id: 0,
            pending: HashMap::new(),
        }));

        let task = tokio::spawn(run(host_rx, sandbox_tx, state, loader, limits));

        (SandboxHandle { tx: host_tx, task }, sandbox_rx)
    }
}

async fn run(
    mut inbound: mpsc::UnboundedReceiver<HostMessage>,
    outbound: mpsc::UnboundedSender<SandboxMessage>,
    state: SharedState,
    loader: Arc<dyn PluginLoader>,
    limits: SandboxLimits,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            HostMessage::Init { payload } => {
                tokio::spawn(handle_init(
                    state.clone(),
                    outbound.clone(),
                    loader.clone(),
                    limits.clone(),
                    payload,
                ));
            }
            HostMessage::CallMethod { payload } => {
                tokio::spawn(handle_call_method(
                    state.clone(),
                    outbound.clone(),
                    limits.clone(),
                    payload,
                ));
            }
            HostMessage::Dispose => {
                tokio::spawn(handle_dispose(state.clone(), outbound.clone()));
            }
            HostMessage::ApiResponse {
                request_id,
                payload,
            } => handle_api_response(&state, &request_id, payload),
        }
    }
}

async fn handle_init(
    state: SharedState,
    outbound: mpsc::UnboundedSender<SandboxMessage>,
    loader: Arc<dyn PluginLoader>,
    limits: SandboxLimits,
    payload: InitPayload,
) {
    let InitPayload { manifest, config } = payload;
    let api = PluginApi::new(state.clone(), outbound.clone(), limits.api_call_timeout());

    match loader.load(api, config.unwrap_or(Value::Null)).await {
        Ok(activation) => {
            let plugin_id = manifest.id.clone();
            {
                let mut st = state.lock().unwrap();
                let mut methods = activation.methods;
                // Activation-time registrations land after the declared
                // table and win on a name collision.
                for (name, method) in st.pending_methods.drain() {
                    methods.insert(name, method);
                }
                st.instance = Some(PluginInstance {
                    id: manifest.id,
                    name: manifest.name,
                    version: manifest.version,
                    methods,
                    dispose: activation.dispose,
                });
            }
            send(
                &outbound,
                SandboxMessage::InitAck {
                    payload: InitAckPayload {
                        success: true,
                        plugin_id,
                    },
                },
            );
        }
        Err(error) => send_error(&outbound, anyhow_payload(&error)),
    }
}

async fn handle_call_method(
    state: SharedState,
    outbound: mpsc::UnboundedSender<SandboxMessage>,
    limits: SandboxLimits,
    payload: CallMethodPayload,
) {
    let CallMethodPayload { method, args } = payload;

    let callable = {
        let st = state.lock().unwrap();
        match st.instance.as_ref() {
            None => {
                send_error(&outbound, ErrorPayload::new("Plugin not initialized"));
                return;
            }
            Some(instance) => match instance.methods.get(&method) {
                None => {
                    send_error(
                        &outbound,
                        ErrorPayload::new(format!("Method {method} not found in plugin")),
                    );
                    return;
                }
                Some(callable) => callable.clone(),
            },
        }
    };

    // Run the method body on its own task so a panic is contained and
    // reported instead of taking the sandbox down.
    let invocation = tokio::spawn(callable(args));
    let abort = invocation.abort_handle();

    let joined = match limits.call_deadline() {
        Some(deadline) => match tokio::time::timeout(deadline, invocation).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                send_error(
                    &outbound,
                    ErrorPayload::new(format!(
                        "method '{method}' exceeded {}ms deadline",
                        limits.call_deadline_ms.unwrap_or_default()
                    )),
                );
                return;
            }
        },
        None => invocation.await,
    };

    match joined {
        Ok(Ok(result)) => send(
            &outbound,
            SandboxMessage::CallResult {
                payload: CallResultPayload {
                    success: true,
                    result,
                },
            },
        ),
        Ok(Err(error)) => send_error(&outbound, anyhow_payload(&error)),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                match join_error.into_panic().downcast::<String>() {
                    Ok(text) => format!("plugin method panicked: {text}"),
                    Err(payload) => match payload.downcast::<&'static str>() {
                        Ok(text) => format!("plugin method panicked: {text}"),
                        Err(_) => "plugin method panicked".to_string(),
                    },
                }
            } else {
                format!("plugin method '{method}' was cancelled")
            };
            send_error(&outbound, ErrorPayload::new(message));
        }
    }
}

async fn handle_dispose(state: SharedState, outbound: mpsc::UnboundedSender<SandboxMessage>) {
    let (dispose, abandoned) = {
        let mut st = state.lock().unwrap();
        let dispose = st.instance.take().and_then(|instance| instance.dispose);
        let abandoned: Vec<_> = st.pending.drain().map(|(_, tx)| tx).collect();
        (dispose, abandoned)
    };

    // Reject in-flight capability calls instead of leaving their callers
    // suspended until the timeout fires.
    for waiter in abandoned {
        let _ = waiter.send(Err("API call aborted: plugin disposed".to_string()));
    }

    if let Some(dispose) = dispose {
        if let Err(error) = dispose().await {
            send_error(&outbound, anyhow_payload(&error));
            return;
        }
    }

    send(
        &outbound,
        SandboxMessage::DisposeAck {
            payload: DisposeAckPayload { success: true },
        },
    );
}

fn handle_api_response(state: &SharedState, request_id: &str, payload: Value) {
    let Some(waiter) = state.lock().unwrap().pending.remove(request_id) else {
        debug!(request_id, "no pending request for API response");
        return;
    };

    let verdict = match payload {
        Value::Null => Err("API response payload is missing".to_string()),
        Value::Object(map) => match map.get("success") {
            Some(Value::Bool(true)) => Ok(map.get("result").cloned().unwrap_or(Value::Null)),
            Some(Value::Bool(false)) => Err(map
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| "API call failed".to_string())),
            Some(_) => Err("Invalid API response payload type".to_string()),
            None => Err("API response payload missing success property".to_string()),
        },
        _ => Err("Invalid API response payload type".to_string()),
    };

    let _ = waiter.send(verdict);
}

fn send(outbound: &mpsc::UnboundedSender<SandboxMessage>, message: SandboxMessage) {
    let _ = outbound.send(message);
}

fn send_error(outbound: &mpsc::UnboundedSender<SandboxMessage>, payload: ErrorPayload) {
    send(outbound, SandboxMessage::Error { payload });
}

fn anyhow_payload(error: &anyhow::Error) -> ErrorPayload {
    ErrorPayload {
        message: error.to_string(),
        stack: (error.chain().count() > 1).then(|| format!("{error:?}")),
    }
}
