use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::codec::Value;
use crate::control::ControlId;

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ControlChanged {
        id: ControlId,
        symbol: String,
        value: Value,
    },
    PresetListChanged,
    ActivePresetChanged {
        uri: Option<String>,
    },
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<UnboundedSender<HostEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<HostEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Sends to every subscriber, forgetting the ones that hung up.
    pub fn emit(&mut self, event: HostEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_events() {
        let mut bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(HostEvent::PresetListChanged);
        assert_eq!(a.recv().await, Some(HostEvent::PresetListChanged));
        assert_eq!(b.recv().await, Some(HostEvent::PresetListChanged));
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(rx);
        bus.emit(HostEvent::ActivePresetChanged { uri: None });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            kept.try_recv().ok(),
            Some(HostEvent::ActivePresetChanged { uri: None })
        );
    }
}
