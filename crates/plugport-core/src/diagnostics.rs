//! Diagnostics channel.
//!
//! The store, the loader and the area resolver report recoverable faults as
//! [`Diagnostic`] events. Where they go is up to the host: the default sink
//! forwards them to `tracing`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default capacity for [`BroadcastSink`].
pub const DEFAULT_DIAGNOSTIC_CAPACITY: usize = 256;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Owning plugin, `None` for host-level sources such as the area resolver.
    pub plugin_id: Option<String>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(plugin_id: Option<&str>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.map(str::to_string),
            severity,
            message: message.into(),
        }
    }

    pub fn warning(plugin_id: &str, message: impl Into<String>) -> Self {
        Self::new(Some(plugin_id), Severity::Warning, message)
    }

    pub fn error(plugin_id: &str, message: impl Into<String>) -> Self {
        Self::new(Some(plugin_id), Severity::Error, message)
    }

    pub fn host(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(None, severity, message)
    }
}

/// Receiver of diagnostic events.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn DiagnosticSink>;

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        let plugin_id = diagnostic.plugin_id.as_deref().unwrap_or("-");
        match diagnostic.severity {
            Severity::Info => info!(plugin_id, "{}", diagnostic.message),
            Severity::Warning => warn!(plugin_id, "{}", diagnostic.message),
            Severity::Error => error!(plugin_id, "{}", diagnostic.message),
        }
    }
}

/// Collects diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    /// Drain collected diagnostics.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Diagnostics reported for one plugin.
    pub fn for_plugin(&self, plugin_id: &str) -> Vec<Diagnostic> {
        self.events
            .lock()
            .iter()
            .filter(|d| d.plugin_id.as_deref() == Some(plugin_id))
            .cloned()
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.events.lock().push(diagnostic);
    }
}

/// Publishes diagnostics on a broadcast channel, for telemetry collectors.
///
/// Events are dropped when nobody subscribes.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Diagnostic>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DIAGNOSTIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for BroadcastSink {
    fn emit(&self, diagnostic: Diagnostic) {
        let _ = self.tx.send(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_by_plugin() {
        let sink = MemorySink::new();
        sink.emit(Diagnostic::warning("p1", "first"));
        sink.emit(Diagnostic::error("p2", "second"));
        sink.emit(Diagnostic::host(Severity::Info, "third"));

        assert_eq!(sink.snapshot().len(), 3);
        assert_eq!(sink.for_plugin("p2")[0].message, "second");
        assert_eq!(sink.take().len(), 3);
        assert!(sink.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new();
        let mut rx = sink.subscribe();
        sink.emit(Diagnostic::error("p1", "boom"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.plugin_id.as_deref(), Some("p1"));
        assert_eq!(received.severity, Severity::Error);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_silent() {
        let sink = BroadcastSink::with_capacity(4);
        sink.emit(Diagnostic::host(Severity::Warning, "nobody listens"));
    }
}
