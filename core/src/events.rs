//! Typed event stream, replacing the event-emitter pattern with a broadcast
//! channel (§6, §9)
//!
//! §9 calls out the source's event emitter as something that "re-architects
//! naturally" into a typed broadcast channel; only the executor emits, any
//! number of subscribers (the gateway, a CLI `--watch`, tests) can listen.

use shared::model::Task;
use tokio::sync::broadcast;

/// Channel capacity: the gateway and CLI are expected to keep up; a lagged
/// subscriber simply misses the oldest events rather than blocking the
/// executor (`broadcast::Sender::send` never blocks).
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum Event {
    Started,
    Stopped,
    Paused,
    Resumed,
    TaskStart(Task),
    TaskComplete(Task, String),
    TaskFailed(Task, String),
}

/// Owned by the `Executor`; the only component permitted to emit (§9).
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Ignores the "no receivers" error: an event with nobody listening is
    /// not a failure.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(Event::Started);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Started));
    }
}
