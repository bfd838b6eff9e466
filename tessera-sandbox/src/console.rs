//! Console forwarding.
//!
//! Every console call inside the sandbox is mirrored to the host as a
//! CONSOLE_LOG message so the host keeps a complete, centralized log stream
//! per plugin. Arguments are serialized best-effort before crossing the
//! boundary; the call is also echoed locally through `tracing` so in-process
//! debugging is unaffected.

use serde_json::Value;
use tessera_protocol::{ConsoleLogPayload, LogLevel, SandboxMessage};
use tokio::sync::mpsc;

/// Handle plugin code uses for console output.
#[derive(Clone)]
pub struct PluginConsole {
    outbound: mpsc::UnboundedSender<SandboxMessage>,
}

impl PluginConsole {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<SandboxMessage>) -> Self {
        Self { outbound }
    }

    pub fn log(&self, args: &[Value]) {
        self.forward(LogLevel::Log, args);
    }

    pub fn error(&self, args: &[Value]) {
        self.forward(LogLevel::Error, args);
    }

    pub fn warn(&self, args: &[Value]) {
        self.forward(LogLevel::Warn, args);
    }

    pub fn info(&self, args: &[Value]) {
        self.forward(LogLevel::Info, args);
    }

    pub fn debug(&self, args: &[Value]) {
        self.forward(LogLevel::Debug, args);
    }

    fn forward(&self, level: LogLevel, args: &[Value]) {
        let args: Vec<String> = args.iter().map(serialize_arg).collect();
        let line = args.join(" ");
        match level {
            LogLevel::Error => tracing::error!(target: "plugin", "{line}"),
            LogLevel::Warn => tracing::warn!(target: "plugin", "{line}"),
            LogLevel::Info => tracing::info!(target: "plugin", "{line}"),
            LogLevel::Log | LogLevel::Debug => tracing::debug!(target: "plugin", "{line}"),
        }
        let _ = self.outbound.send(SandboxMessage::ConsoleLog {
            payload: ConsoleLogPayload { level, args },
        });
    }
}

/// Best-effort stringification: strings pass through, composites become
/// JSON, everything else uses its display form.
fn serialize_arg(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string(arg).unwrap_or_else(|_| arg.to_string())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_not_quoted() {
        assert_eq!(serialize_arg(&json!("hello")), "hello");
    }

    #[test]
    fn composites_become_json() {
        assert_eq!(serialize_arg(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(serialize_arg(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn scalars_use_display_form() {
        assert_eq!(serialize_arg(&json!(42)), "42");
        assert_eq!(serialize_arg(&json!(true)), "true");
        assert_eq!(serialize_arg(&Value::Null), "null");
    }

    #[tokio::test]
    async fn console_forwards_serialized_args() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let console = PluginConsole::new(tx);
        console.warn(&[json!("count"), json!(3), json!({"k": "v"})]);

        match rx.recv().await.unwrap() {
            SandboxMessage::ConsoleLog { payload } => {
                assert_eq!(payload.level, LogLevel::Warn);
                assert_eq!(payload.args, vec!["count", "3", r#"{"k":"v"}"#]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
