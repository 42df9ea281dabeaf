//! Typed state-transition events.
//!
//! The orchestrator publishes one [`ExtensionEvent`] per observable
//! transition. Subscribers (UI, sync, telemetry) get their own receiver
//! from [`EventBus::subscribe`]; a subscriber that falls behind loses the
//! oldest events, the orchestrator never waits on it.

use std::fmt;

use tokio::sync::broadcast;

use crate::extensions::{DisableReasonSet, ExtensionId, InstallSource, Version};
use crate::pending::RejectReason;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Why an extension stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadReason {
    Disable,
    Blocklist,
    Block,
    Terminate,
    Update,
    Uninstall,
}

impl fmt::Display for UnloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnloadReason::Disable => "disable",
            UnloadReason::Blocklist => "blocklist",
            UnloadReason::Block => "block",
            UnloadReason::Terminate => "terminate",
            UnloadReason::Update => "update",
            UnloadReason::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallReason {
    User,
    /// No external provider lists the extension any more.
    OrphanedExternal,
}

/// Why a finished install was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Its pending request was removed or superseded meanwhile.
    Cancelled,
    /// The extension failed its pending request's theme check.
    ThemeMismatch,
    Blocklisted,
    /// The installed id differs from the id that was requested.
    IdMismatch,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionEvent {
    Installed {
        id: ExtensionId,
        version: Version,
        location: InstallSource,
        is_update: bool,
    },
    Loaded {
        id: ExtensionId,
    },
    Unloaded {
        id: ExtensionId,
        reason: UnloadReason,
    },
    Uninstalled {
        id: ExtensionId,
        reason: UninstallReason,
    },
    DisableReasonsChanged {
        id: ExtensionId,
        reasons: DisableReasonSet,
    },
    Terminated {
        id: ExtensionId,
    },
    PendingAdded {
        id: ExtensionId,
        source: InstallSource,
    },
    PendingRemoved {
        id: ExtensionId,
    },
    ProposalRejected {
        id: ExtensionId,
        source: InstallSource,
        reason: RejectReason,
    },
    InstallDiscarded {
        id: ExtensionId,
        reason: DiscardReason,
    },
}

impl ExtensionEvent {
    pub fn id(&self) -> &str {
        match self {
            ExtensionEvent::Installed { id, .. }
            | ExtensionEvent::Loaded { id }
            | ExtensionEvent::Unloaded { id, .. }
            | ExtensionEvent::Uninstalled { id, .. }
            | ExtensionEvent::DisableReasonsChanged { id, .. }
            | ExtensionEvent::Terminated { id }
            | ExtensionEvent::PendingAdded { id, .. }
            | ExtensionEvent::PendingRemoved { id }
            | ExtensionEvent::ProposalRejected { id, .. }
            | ExtensionEvent::InstallDiscarded { id, .. } => id,
        }
    }
}

/// Broadcast channel of extension events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExtensionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionEvent> {
        self.sender.subscribe()
    }

    /// Publish to every current subscriber. Having none is fine.
    pub fn publish(&self, event: ExtensionEvent) {
        tracing::trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
