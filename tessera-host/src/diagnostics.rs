//! Per-plugin diagnostic log.
//!
//! Bounded ring buffer of console output, sandbox errors, and API call
//! outcomes, kept per plugin for the debug view. Entries survive plugin
//! unload so failures can be inspected post-mortem.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tessera_protocol::LogLevel;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 500;

/// What produced a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    Console,
    Error,
    ApiCall,
}

/// One record in a plugin's diagnostic buffer.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEntry {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: DiagnosticKind,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Default)]
struct PluginBuffer {
    entries: VecDeque<DiagnosticEntry>,
    last_error: Option<String>,
}

/// Diagnostic store for all plugins.
pub struct Diagnostics {
    capacity: usize,
    buffers: Mutex<HashMap<String, PluginBuffer>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_console(&self, plugin_id: &str, level: LogLevel, message: &str) {
        self.push(plugin_id, DiagnosticKind::Console, level, message.to_string());
    }

    pub fn record_error(&self, plugin_id: &str, message: &str, stack: Option<&str>) {
        let text = match stack {
            Some(stack) => format!("{message}\n{stack}"),
            None => message.to_string(),
        };
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers.entry(plugin_id.to_string()).or_default();
        buffer.last_error = Some(message.to_string());
        push_entry(buffer, self.capacity, DiagnosticKind::Error, LogLevel::Error, text);
    }

    pub fn record_api_call(
        &self,
        plugin_id: &str,
        namespace: &str,
        method: &str,
        success: bool,
        error: Option<&str>,
    ) {
        let (level, message) = if success {
            (LogLevel::Debug, format!("{namespace}.{method} ok"))
        } else {
            (
                LogLevel::Error,
                format!("{namespace}.{method} failed: {}", error.unwrap_or("unknown error")),
            )
        };
        self.push(plugin_id, DiagnosticKind::ApiCall, level, message);
    }

    /// Most recent entries for a plugin, oldest first.
    pub fn recent(&self, plugin_id: &str, limit: usize) -> Vec<DiagnosticEntry> {
        let buffers = self.buffers.lock().unwrap();
        buffers
            .get(plugin_id)
            .map(|buffer| {
                buffer
                    .entries
                    .iter()
                    .rev()
                    .take(limit)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The plugin's most recent error message, if any.
    pub fn last_error(&self, plugin_id: &str) -> Option<String> {
        self.buffers
            .lock()
            .unwrap()
            .get(plugin_id)
            .and_then(|buffer| buffer.last_error.clone())
    }

    pub fn clear_plugin(&self, plugin_id: &str) {
        self.buffers.lock().unwrap().remove(plugin_id);
    }

    fn push(&self, plugin_id: &str, kind: DiagnosticKind, level: LogLevel, message: String) {
        let mut buffers = self.buffers.lock().unwrap();
        let buffer = buffers.entry(plugin_id.to_string()).or_default();
        push_entry(buffer, self.capacity, kind, level, message);
    }
}

fn push_entry(
    buffer: &mut PluginBuffer,
    capacity: usize,
    kind: DiagnosticKind,
    level: LogLevel,
    message: String,
) {
    if buffer.entries.len() >= capacity {
        buffer.entries.pop_front();
    }
    buffer.entries.push_back(DiagnosticEntry {
        id: Uuid::now_v7(),
        at: Utc::now(),
        kind,
        level,
        message,
    });
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
