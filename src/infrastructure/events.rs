use serde::Serialize;
use tokio::sync::broadcast;

/// Structural events broadcast to every connected event-channel client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum AppEvent {
    #[serde(rename = "worktrees-changed")]
    WorktreesChanged,
    #[serde(rename = "session-idle-changed")]
    SessionIdleChanged {
        #[serde(rename = "sessionId")]
        session_id: String,
        idle: bool,
    },
}

/// Fan-out point between the watcher/session manager and the WebSocket
/// event channel. Cloneable; receivers subscribe lazily.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn emit(&self, event: AppEvent) {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
