//! Lifecycle state notifications.
//!
//! Every component owns a [`Notifier`] scoped under its parent's notifier, so
//! an event emitted by a leaf node is observed by whoever subscribed at the
//! root of that tree. There is no process-wide bus: two independent
//! topologies never see each other's events.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

/// State label carried by a [`StateEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Purged,
    Initiated,
    Reconfigured,
    SteppedDown,
    MaintenanceEnabled,
    MaintenanceDisabled,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Purged => "purged",
            Self::Initiated => "initiated",
            Self::Reconfigured => "reconfigured",
            Self::SteppedDown => "stepped_down",
            Self::MaintenanceEnabled => "maintenance_enabled",
            Self::MaintenanceDisabled => "maintenance_disabled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct StateEvent {
    /// Slash separated path of the emitting component, e.g.
    /// `sharded/rs0/127.0.0.1:31000`.
    pub component: String,
    pub state: LifecycleState,
    pub at: DateTime<Utc>,
}

/// Per-component handle onto the notification channel of its tree.
#[derive(Debug, Clone)]
pub struct Notifier {
    scope: String,
    tx: broadcast::Sender<StateEvent>,
}

impl Notifier {
    /// A fresh channel for a top-level component.
    pub fn root(name: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scope: name.into(),
            tx,
        }
    }

    /// Notifier for a child component; its events reach this tree's subscribers.
    pub fn scoped(&self, name: impl AsRef<str>) -> Self {
        Self {
            scope: format!("{}/{}", self.scope, name.as_ref()),
            tx: self.tx.clone(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, state: LifecycleState) {
        // No subscribers is fine.
        let _ = self.tx.send(StateEvent {
            component: self.scope.clone(),
            state,
            at: Utc::now(),
        });
    }
}
