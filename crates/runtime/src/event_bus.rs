use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use foundation::{MapHandle, MapId};
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// How many past events are retained for `drain`.
pub const EVENT_HISTORY_LEN: usize = 256;

/// Notifications the core exposes to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    MapLoaded {
        map_id: MapId,
        handle: MapHandle,
        name: String,
    },
    MapUnloaded {
        map_id: MapId,
    },
    MapLoadFailed {
        map_id: MapId,
        reason: String,
    },
    Localized {
        map_id: MapId,
    },
    SubscriptionStarted {
        scene_id: String,
    },
    SubscriptionLost {
        scene_id: String,
        reason: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::MapLoaded { .. } => "map_loaded",
            Notification::MapUnloaded { .. } => "map_unloaded",
            Notification::MapLoadFailed { .. } => "map_load_failed",
            Notification::Localized { .. } => "localized",
            Notification::SubscriptionStarted { .. } => "subscription_started",
            Notification::SubscriptionLost { .. } => "subscription_lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Monotonic per-bus sequence number, starting at 0.
    pub seq: u64,
    pub notification: Notification,
}

/// Fan-out of core notifications.
///
/// Live listeners get events through `subscribe`; a bounded history is kept
/// so callers without a receiver can still `drain` what happened.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    next_seq: Arc<AtomicU64>,
    history: Arc<Mutex<VecDeque<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_HISTORY_LEN);
        Self {
            tx,
            next_seq: Arc::new(AtomicU64::new(0)),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(EVENT_HISTORY_LEN))),
        }
    }

    pub fn emit(&self, notification: Notification) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = Event { seq, notification };
        tracing::debug!(seq, kind = event.notification.kind(), "notification");

        {
            let mut history = self.history.lock();
            if history.len() == EVENT_HISTORY_LEN {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No receivers is fine; the history still has it.
        let _ = self.tx.send(event);
        seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn drain(&self) -> Vec<Event> {
        self.history.lock().drain(..).collect()
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.drain().into_iter().map(|e| e.notification).collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBus, Notification, EVENT_HISTORY_LEN};
    use foundation::MapId;

    #[test]
    fn records_events_with_sequence() {
        let bus = EventBus::new();
        bus.emit(Notification::Localized { map_id: MapId(3) });
        bus.emit(Notification::MapUnloaded { map_id: MapId(3) });

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 0);
        assert_eq!(events[1].seq, 1);
        assert_eq!(events[1].notification.kind(), "map_unloaded");
    }

    #[test]
    fn drain_clears_history() {
        let bus = EventBus::new();
        bus.emit(Notification::Localized { map_id: MapId(1) });
        assert_eq!(bus.drain().len(), 1);
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::new();
        for i in 0..(EVENT_HISTORY_LEN + 10) {
            bus.emit(Notification::Localized {
                map_id: MapId(i as i32),
            });
        }
        let events = bus.drain();
        assert_eq!(events.len(), EVENT_HISTORY_LEN);
        assert_eq!(events[0].seq, 10);
    }

    #[tokio::test]
    async fn live_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let clone = bus.clone();
        clone.emit(Notification::SubscriptionStarted {
            scene_id: "abc".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.notification,
            Notification::SubscriptionStarted {
                scene_id: "abc".to_string()
            }
        );
    }
}
