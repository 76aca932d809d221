//! Change fan-out.
//!
//! A cycle's non-empty [`ChangeSet`] is handed to the notifier exactly once;
//! the notifier delivers one shared reference to every registered sink and
//! prunes sinks whose receivers have gone away. Empty sets dispatch nothing.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::changes::ChangeSet;

/// A registered consumer of change notifications.
pub type ChangeSink = mpsc::UnboundedSender<Arc<ChangeSet>>;

/// Fans non-empty change sets out to registered sinks.
#[derive(Default)]
pub struct ChangeNotifier {
    sinks: Mutex<Vec<ChangeSink>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing sender as a sink.
    pub fn register(&self, sink: ChangeSink) {
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sink);
    }

    /// Create, register, and return a receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<ChangeSet>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(tx);
        rx
    }

    /// Deliver a change set to every live sink.
    ///
    /// No-op when the set is empty. Ownership of the set transfers here; the
    /// triggering cycle must not reuse it.
    pub fn dispatch(&self, changes: ChangeSet) {
        if changes.is_empty() {
            return;
        }

        let changes = Arc::new(changes);
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        let before = sinks.len();
        sinks.retain(|sink| sink.send(Arc::clone(&changes)).is_ok());

        tracing::debug!(
            affected = changes.len(),
            sinks = sinks.len(),
            pruned = before - sinks.len(),
            "dispatched changes"
        );
    }

    /// Number of currently registered sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
