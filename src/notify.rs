use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{DeviceId, Event};

const CHANNEL_CAPACITY: usize = 256;

/// Per-device broadcast of committed reservation events.
///
/// Slow subscribers lag rather than block writers; a lagged receiver gets
/// `RecvError::Lagged` and continues from the oldest retained event.
pub struct NotifyHub {
    channels: DashMap<DeviceId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a device. Creates the channel on first use.
    pub fn subscribe(&self, device_id: DeviceId) -> broadcast::Receiver<Event> {
        self.channels
            .entry(device_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody ever subscribed to the device.
    pub fn send(&self, device_id: DeviceId, event: &Event) {
        if let Some(sender) = self.channels.get(&device_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose receivers are all gone.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscriber_receives_device_events() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(4);
        let event = Event::ReservationDeleted { id: Ulid::new(), device_id: 4 };

        hub.send(4, &event);
        hub.send(5, &Event::ReservationDeleted { id: Ulid::new(), device_id: 5 });

        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(9, &Event::ReservationDeleted { id: Ulid::new(), device_id: 9 });
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(1);
        drop(hub.subscribe(2));
        hub.prune();
        assert_eq!(hub.channel_count(), 1);
        drop(kept);
    }
}
