use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::model::{Block, SandboxPhase, WorkspaceFile};

/// Process-wide typed publish/subscribe for domain events.
///
/// `emit` fans out synchronously in emission order and never blocks;
/// subscribers that fall behind are skipped (transport listeners buffer on
/// their own side — there is intentionally no backpressure here).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!(event = event.name(), "bus emit");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// The closed catalogue of domain events.
///
/// The serialized shape (`event` tag + camelCase `data` payload) is a wire
/// contract for transport listeners.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    #[serde(rename = "session:created", rename_all = "camelCase")]
    Created { session_id: String },

    #[serde(rename = "session:loaded", rename_all = "camelCase")]
    Loaded { session_id: String },

    #[serde(rename = "session:destroyed", rename_all = "camelCase")]
    Destroyed { session_id: String },

    /// Human-readable progress of the sandbox lifecycle ("Preparing…", …).
    #[serde(rename = "session:status", rename_all = "camelCase")]
    Status {
        session_id: String,
        sandbox_status: SandboxPhase,
        message: String,
    },

    /// The set of known sessions changed (created/loaded/destroyed).
    #[serde(rename = "sessions:changed")]
    SessionsChanged,

    #[serde(rename = "session:block:start", rename_all = "camelCase")]
    BlockStart {
        session_id: String,
        conversation_id: String,
        block: Block,
    },

    #[serde(rename = "session:block:delta", rename_all = "camelCase")]
    BlockDelta {
        session_id: String,
        conversation_id: String,
        block_id: String,
        delta: String,
    },

    #[serde(rename = "session:block:update", rename_all = "camelCase")]
    BlockUpdate {
        session_id: String,
        conversation_id: String,
        block_id: String,
        updates: Value,
    },

    #[serde(rename = "session:block:complete", rename_all = "camelCase")]
    BlockComplete {
        session_id: String,
        conversation_id: String,
        block_id: String,
        block: Block,
    },

    #[serde(rename = "session:metadata:update", rename_all = "camelCase")]
    MetadataUpdate {
        session_id: String,
        conversation_id: String,
        metadata: Value,
    },

    #[serde(rename = "session:subagent:discovered", rename_all = "camelCase")]
    SubagentDiscovered {
        session_id: String,
        subagent_id: String,
    },

    #[serde(rename = "session:subagent:completed", rename_all = "camelCase")]
    SubagentCompleted {
        session_id: String,
        subagent_id: String,
    },

    #[serde(rename = "session:subagent:changed", rename_all = "camelCase")]
    SubagentChanged {
        session_id: String,
        subagent_id: String,
    },

    #[serde(rename = "session:file:modified", rename_all = "camelCase")]
    FileModified {
        session_id: String,
        file: WorkspaceFile,
    },

    #[serde(rename = "session:file:deleted", rename_all = "camelCase")]
    FileDeleted { session_id: String, path: String },

    #[serde(rename = "session:transcript:changed", rename_all = "camelCase")]
    TranscriptChanged { session_id: String },

    #[serde(rename = "session:options:update", rename_all = "camelCase")]
    OptionsUpdate { session_id: String, options: Value },

    #[serde(rename = "session:error", rename_all = "camelCase")]
    Error { session_id: String, message: String },

    #[serde(rename = "sandbox:status", rename_all = "camelCase")]
    SandboxStatus {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        sandbox_id: Option<String>,
        status: SandboxPhase,
    },
}

impl SessionEvent {
    /// Colon-form event name, as transports expose it.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Created { .. } => "session:created",
            SessionEvent::Loaded { .. } => "session:loaded",
            SessionEvent::Destroyed { .. } => "session:destroyed",
            SessionEvent::Status { .. } => "session:status",
            SessionEvent::SessionsChanged => "sessions:changed",
            SessionEvent::BlockStart { .. } => "session:block:start",
            SessionEvent::BlockDelta { .. } => "session:block:delta",
            SessionEvent::BlockUpdate { .. } => "session:block:update",
            SessionEvent::BlockComplete { .. } => "session:block:complete",
            SessionEvent::MetadataUpdate { .. } => "session:metadata:update",
            SessionEvent::SubagentDiscovered { .. } => "session:subagent:discovered",
            SessionEvent::SubagentCompleted { .. } => "session:subagent:completed",
            SessionEvent::SubagentChanged { .. } => "session:subagent:changed",
            SessionEvent::FileModified { .. } => "session:file:modified",
            SessionEvent::FileDeleted { .. } => "session:file:deleted",
            SessionEvent::TranscriptChanged { .. } => "session:transcript:changed",
            SessionEvent::OptionsUpdate { .. } => "session:options:update",
            SessionEvent::Error { .. } => "session:error",
            SessionEvent::SandboxStatus { .. } => "sandbox:status",
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionEvent::SessionsChanged => None,
            SessionEvent::Created { session_id }
            | SessionEvent::Loaded { session_id }
            | SessionEvent::Destroyed { session_id }
            | SessionEvent::Status { session_id, .. }
            | SessionEvent::BlockStart { session_id, .. }
            | SessionEvent::BlockDelta { session_id, .. }
            | SessionEvent::BlockUpdate { session_id, .. }
            | SessionEvent::BlockComplete { session_id, .. }
            | SessionEvent::MetadataUpdate { session_id, .. }
            | SessionEvent::SubagentDiscovered { session_id, .. }
            | SessionEvent::SubagentCompleted { session_id, .. }
            | SessionEvent::SubagentChanged { session_id, .. }
            | SessionEvent::FileModified { session_id, .. }
            | SessionEvent::FileDeleted { session_id, .. }
            | SessionEvent::TranscriptChanged { session_id }
            | SessionEvent::OptionsUpdate { session_id, .. }
            | SessionEvent::Error { session_id, .. }
            | SessionEvent::SandboxStatus { session_id, .. } => Some(session_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_matches_serialized_tag() {
        let events = vec![
            SessionEvent::Created {
                session_id: "s".into(),
            },
            SessionEvent::SessionsChanged,
            SessionEvent::FileDeleted {
                session_id: "s".into(),
                path: "a.txt".into(),
            },
            SessionEvent::SandboxStatus {
                session_id: "s".into(),
                sandbox_id: Some("sbx".into()),
                status: SandboxPhase::Starting,
            },
        ];
        for ev in events {
            let v = serde_json::to_value(&ev).unwrap();
            assert_eq!(v["event"], ev.name());
        }
    }

    #[test]
    fn status_event_wire_shape() {
        let ev = SessionEvent::Status {
            session_id: "s1".into(),
            sandbox_status: SandboxPhase::Starting,
            message: "Preparing…".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "session:status");
        assert_eq!(v["data"]["sessionId"], "s1");
        assert_eq!(v["data"]["sandboxStatus"], "starting");
        assert_eq!(v["data"]["message"], "Preparing…");
    }

    #[tokio::test]
    async fn emit_fans_out_in_order() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.emit(SessionEvent::Created {
            session_id: "s1".into(),
        });
        bus.emit(SessionEvent::SessionsChanged);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap().name(), "session:created");
            assert_eq!(rx.recv().await.unwrap().name(), "sessions:changed");
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(SessionEvent::SessionsChanged);
    }

    #[test]
    fn session_id_accessor() {
        assert_eq!(SessionEvent::SessionsChanged.session_id(), None);
        assert_eq!(
            SessionEvent::Destroyed {
                session_id: "s9".into()
            }
            .session_id(),
            Some("s9")
        );
    }
}
