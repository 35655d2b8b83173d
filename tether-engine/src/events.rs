//! Lifecycle notifications for the UI layer

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notification mirroring a supervisor state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Starting,
    Ready,
    Error { message: String },
}

impl ServerEvent {
    /// Channel name the UI listens on
    pub fn channel(&self) -> &'static str {
        match self {
            ServerEvent::Starting => "server:starting",
            ServerEvent::Ready => "server:ready",
            ServerEvent::Error { .. } => "server:error",
        }
    }
}

impl std::fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerEvent::Error { message } => write!(f, "{} {}", self.channel(), message),
            _ => f.write_str(self.channel()),
        }
    }
}

/// Ordered fan-out of server events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Deliver to current subscribers; dropped if nobody listens
    pub fn emit(&self, event: ServerEvent) {
        tracing::debug!(channel = event.channel(), "Emitting server event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
