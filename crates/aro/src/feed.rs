//! Live change feed for AR objects.
//!
//! A subscription delivers changes to objects of one scene, in order. The
//! transport behind [`ChangeFeed`] is pluggable; [`ChannelFeed`] is the
//! in-process implementation used by the in-memory store and in tests.
//! [`LiveQueryMessage`] describes the live-query wire frames so a socket
//! transport can translate them into [`FeedItem`]s.

use maps::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::object::RemoteObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A new object matching the subscription was saved.
    Create,
    /// An existing object started matching.
    Enter,
    Update,
    /// An object stopped matching.
    Leave,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub object: RemoteObject,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, object: RemoteObject) -> Self {
        Self { kind, object }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The subscription ended on the remote side.
    Lost(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("feed is closed")]
    Closed,
    #[error("subscription rejected: {0}")]
    Rejected(String),
    #[error("feed transport error: {0}")]
    Transport(String),
}

/// Server-to-client live-query frames, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LiveQueryMessage {
    Connected {
        #[serde(rename = "clientId", default)]
        client_id: String,
    },
    Subscribed {
        #[serde(rename = "requestId")]
        request_id: u32,
    },
    Unsubscribed {
        #[serde(rename = "requestId")]
        request_id: u32,
    },
    Error {
        #[serde(default)]
        code: i32,
        error: String,
        #[serde(default)]
        reconnect: bool,
    },
    Create {
        #[serde(rename = "requestId")]
        request_id: u32,
        object: RemoteObject,
    },
    Enter {
        #[serde(rename = "requestId")]
        request_id: u32,
        object: RemoteObject,
    },
    Update {
        #[serde(rename = "requestId")]
        request_id: u32,
        object: RemoteObject,
    },
    Leave {
        #[serde(rename = "requestId")]
        request_id: u32,
        object: RemoteObject,
    },
    Delete {
        #[serde(rename = "requestId")]
        request_id: u32,
        object: RemoteObject,
    },
}

impl LiveQueryMessage {
    /// What a subscriber should see for this frame, if anything.
    pub fn into_feed_item(self) -> Option<FeedItem> {
        let change = |kind, object| Some(FeedItem::Change(ChangeEvent::new(kind, object)));
        match self {
            LiveQueryMessage::Create { object, .. } => change(ChangeKind::Create, object),
            LiveQueryMessage::Enter { object, .. } => change(ChangeKind::Enter, object),
            LiveQueryMessage::Update { object, .. } => change(ChangeKind::Update, object),
            LiveQueryMessage::Leave { object, .. } => change(ChangeKind::Leave, object),
            LiveQueryMessage::Delete { object, .. } => change(ChangeKind::Delete, object),
            LiveQueryMessage::Error { code, error, .. } => {
                Some(FeedItem::Lost(format!("{error} (code {code})")))
            }
            LiveQueryMessage::Connected { .. }
            | LiveQueryMessage::Subscribed { .. }
            | LiveQueryMessage::Unsubscribed { .. } => None,
        }
    }
}

/// An open subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct FeedSubscription {
    id: Uuid,
    scene_id: String,
    rx: mpsc::UnboundedReceiver<FeedItem>,
}

impl FeedSubscription {
    pub fn new(scene_id: impl Into<String>, rx: mpsc::UnboundedReceiver<FeedItem>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scene_id: scene_id.into(),
            rx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scene_id(&self) -> &str {
        &self.scene_id
    }

    /// Next pending item without waiting; `None` when nothing is queued.
    /// A closed feed yields a final `Lost`.
    pub fn try_next(&mut self) -> Option<FeedItem> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Some(FeedItem::Lost("feed closed".into()))
            }
        }
    }

    pub async fn next(&mut self) -> FeedItem {
        self.rx
            .recv()
            .await
            .unwrap_or_else(|| FeedItem::Lost("feed closed".into()))
    }
}

pub trait ChangeFeed: Send + Sync {
    /// Subscribes to changes of objects whose scene is `scene_id`.
    fn subscribe(&self, scene_id: String) -> BoxFuture<'_, Result<FeedSubscription, FeedError>>;
}

struct Subscriber {
    scene_id: String,
    tx: mpsc::UnboundedSender<FeedItem>,
}

/// In-process fan-out keyed by scene id.
#[derive(Default)]
pub struct ChannelFeed {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to subscribers of `scene_id`; returns how many got it.
    pub fn publish_to(&self, scene_id: &str, event: ChangeEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| s.scene_id == scene_id) {
            if sub.tx.send(FeedItem::Change(event.clone())).is_ok() {
                delivered += 1;
            }
        }
        debug!(scene_id, kind = ?event.kind, delivered, "published change");
        delivered
    }

    /// Routes by the object's own scene id.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let scene_id = event.object.scene_id.clone();
        self.publish_to(&scene_id, event)
    }

    /// Ends every subscription of `scene_id` with a `Lost` item.
    pub fn drop_scene(&self, scene_id: &str, reason: &str) {
        let mut subscribers = self.subscribers.lock();
        for sub in subscribers.iter().filter(|s| s.scene_id == scene_id) {
            let _ = sub.tx.send(FeedItem::Lost(reason.to_string()));
        }
        subscribers.retain(|s| s.scene_id != scene_id);
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

impl ChangeFeed for ChannelFeed {
    fn subscribe(&self, scene_id: String) -> BoxFuture<'_, Result<FeedSubscription, FeedError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers.lock().push(Subscriber {
                scene_id: scene_id.clone(),
                tx,
            });
            Ok(FeedSubscription::new(scene_id, rx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectData;
    use pretty_assertions::assert_eq;

    fn object(id: &str, scene: &str) -> RemoteObject {
        RemoteObject {
            id: id.into(),
            scene_id: scene.into(),
            author: String::new(),
            prefab_index: 0,
            data: ObjectData::new(),
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            quaternion_x: 0.0,
            quaternion_y: 0.0,
            quaternion_z: 0.0,
            quaternion_w: 1.0,
        }
    }

    #[tokio::test]
    async fn publishes_only_to_matching_scene() {
        let feed = ChannelFeed::new();
        let mut a = feed.subscribe("a".into()).await.unwrap();
        let mut b = feed.subscribe("b".into()).await.unwrap();

        assert_eq!(feed.publish(ChangeEvent::new(ChangeKind::Create, object("x", "a"))), 1);

        assert!(matches!(a.try_next(), Some(FeedItem::Change(e)) if e.object.id == "x"));
        assert_eq!(a.try_next(), None);
        assert_eq!(b.try_next(), None);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let feed = ChannelFeed::new();
        let sub = feed.subscribe("a".into()).await.unwrap();
        assert_eq!(feed.subscriber_count(), 1);
        drop(sub);
        assert_eq!(feed.subscriber_count(), 0);
        assert_eq!(feed.publish(ChangeEvent::new(ChangeKind::Update, object("x", "a"))), 0);
    }

    #[tokio::test]
    async fn dropping_scene_reports_loss() {
        let feed = ChannelFeed::new();
        let mut sub = feed.subscribe("a".into()).await.unwrap();
        feed.drop_scene("a", "server restarted");

        assert_eq!(sub.next().await, FeedItem::Lost("server restarted".into()));
        assert_eq!(sub.next().await, FeedItem::Lost("feed closed".into()));
    }

    #[test]
    fn live_query_frames_parse() {
        let raw = r#"{"op":"update","requestId":1,"object":{"objectId":"o1","sceneId":"s1","latitude":1.5}}"#;
        let msg: LiveQueryMessage = serde_json::from_str(raw).unwrap();
        match msg.into_feed_item() {
            Some(FeedItem::Change(event)) => {
                assert_eq!(event.kind, ChangeKind::Update);
                assert_eq!(event.object.latitude, 1.5);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let raw = r#"{"op":"subscribed","requestId":1}"#;
        let msg: LiveQueryMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.into_feed_item(), None);

        let raw = r#"{"op":"error","code":1,"error":"boom","reconnect":true}"#;
        let msg: LiveQueryMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.into_feed_item(), Some(FeedItem::Lost("boom (code 1)".into())));
    }
}
