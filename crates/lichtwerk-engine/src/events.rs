use tokio::sync::broadcast;

/// Engine-level notifications for observers (UIs, logs, tests).
///
/// Purely informational: nothing in the pipeline depends on anyone
/// consuming these.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ProducerStarted { uid: String },
    ProducerExited { uid: String },
    LatchArmed,
    HoldEngaged,
    HoldReleased,
    TriggerDropped { id: String },
}

pub struct EventHub {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
