use tracing::warn;

use crate::host::ListenerObserver;

/// Logs listener events. Wired into every listener the orchestrator creates.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiagnosticObserver;

impl ListenerObserver for DiagnosticObserver {
    fn on_unknown_message(&self, service: &str, message: &str) {
        warn!(service, "Unknown message received: {message}");
    }

    fn on_fault(&self, service: &str, reason: &str) {
        warn!(service, "Host faulted: {reason}");
    }
}
