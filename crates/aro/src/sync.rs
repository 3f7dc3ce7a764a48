//! Mirrors one scene's remote objects into local placeholders.
//!
//! Events are applied in delivery order on the caller's task. Create and
//! enter are idempotent, deletes of unknown objects are no-ops, and an
//! update for an object not seen yet spawns it.

use std::collections::BTreeMap;
use std::sync::Arc;

use foundation::{rotation_ecef_to_map, wgs84_to_map_local, MapToEcef};
use maps::SharedRegistry;
use nalgebra::{UnitQuaternion, Vector3};
use runtime::{EventBus, Notification};
use tracing::{debug, info, warn};

use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind, FeedError, FeedItem, FeedSubscription};
use crate::object::{RemoteObject, Scene};
use crate::placeholders::{Placeholder, PlaceholderSet};

pub struct RealtimeSync {
    feed: Arc<dyn ChangeFeed>,
    registry: SharedRegistry,
    events: EventBus,
    scene: Option<Scene>,
    subscription: Option<FeedSubscription>,
    objects: BTreeMap<String, RemoteObject>,
    placeholders: PlaceholderSet,
}

impl RealtimeSync {
    pub fn new(feed: Arc<dyn ChangeFeed>, registry: SharedRegistry, events: EventBus) -> Self {
        Self {
            feed,
            registry,
            events,
            scene: None,
            subscription: None,
            objects: BTreeMap::new(),
            placeholders: PlaceholderSet::new(),
        }
    }

    /// Replaces any current subscription with one for `scene`.
    pub async fn start(&mut self, scene: Scene) -> Result<(), FeedError> {
        self.unsubscribe();
        let subscription = self.feed.subscribe(scene.id.clone()).await?;
        info!(scene_id = %scene.id, map_id = %scene.map_id(), "object sync started");
        self.events.emit(Notification::SubscriptionStarted {
            scene_id: scene.id.clone(),
        });
        self.scene = Some(scene);
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Stops listening, forgets the scene and destroys every placeholder.
    /// Safe to call repeatedly.
    pub fn unsubscribe(&mut self) -> usize {
        if let Some(sub) = self.subscription.take() {
            debug!(scene_id = sub.scene_id(), "object sync stopped");
        }
        self.scene = None;
        self.objects.clear();
        self.placeholders.clear()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub(crate) fn current_scene_mut(&mut self) -> Option<&mut Scene> {
        self.scene.as_mut()
    }

    pub fn object(&self, id: &str) -> Option<&RemoteObject> {
        self.objects.get(id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &RemoteObject> {
        self.objects.values()
    }

    pub fn placeholder(&self, id: &str) -> Option<&Placeholder> {
        self.placeholders.get(id)
    }

    pub fn placeholders(&self) -> &PlaceholderSet {
        &self.placeholders
    }

    pub fn apply(&mut self, event: ChangeEvent) {
        let ChangeEvent { kind, object } = event;
        match kind {
            ChangeKind::Create | ChangeKind::Enter | ChangeKind::Update => {
                self.placeholders.spawn(&object.id, &object.data);
                self.apply_fields(&object);
                self.objects.insert(object.id.clone(), object);
            }
            ChangeKind::Delete | ChangeKind::Leave => {
                self.objects.remove(&object.id);
                if self.placeholders.destroy(&object.id).is_some() {
                    debug!(object_id = %object.id, ?kind, "placeholder destroyed");
                }
            }
        }
    }

    fn apply_fields(&mut self, object: &RemoteObject) {
        let map_to_ecef = self.scene_transform();
        let Some(placeholder) = self.placeholders.get_mut(&object.id) else {
            return;
        };
        placeholder.data = object.data.clone();
        placeholder.anchored = map_to_ecef.is_some();
        placeholder.local_position = map_to_ecef
            .map(|t| wgs84_to_map_local(object.position(), &t))
            .unwrap_or_else(Vector3::zeros);
        placeholder.local_rotation = match (map_to_ecef, object.orientation_quat()) {
            (Some(t), Ok(q)) => rotation_ecef_to_map(q, &t),
            _ => UnitQuaternion::identity(),
        };
        placeholder.active = true;
    }

    fn scene_transform(&self) -> Option<MapToEcef> {
        let map_id = self.scene.as_ref()?.map_id();
        self.registry.read().map_to_ecef(map_id)
    }

    /// Re-places every placeholder, e.g. after the scene's map was loaded.
    pub fn refresh_positions(&mut self) {
        let objects: Vec<RemoteObject> = self.objects.values().cloned().collect();
        for object in &objects {
            self.apply_fields(object);
        }
    }

    /// Applies everything already queued; returns how many changes were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let Some(sub) = self.subscription.as_mut() else {
                return applied;
            };
            match sub.try_next() {
                Some(FeedItem::Change(event)) => {
                    self.apply(event);
                    applied += 1;
                }
                Some(FeedItem::Lost(reason)) => {
                    self.lose_subscription(reason);
                    return applied;
                }
                None => return applied,
            }
        }
    }

    /// Waits for the next change and applies it. Returns `None` once there is
    /// no live subscription.
    pub async fn next_event(&mut self) -> Option<ChangeKind> {
        let sub = self.subscription.as_mut()?;
        match sub.next().await {
            FeedItem::Change(event) => {
                let kind = event.kind;
                self.apply(event);
                Some(kind)
            }
            FeedItem::Lost(reason) => {
                self.lose_subscription(reason);
                None
            }
        }
    }

    /// The scene is forgotten too, so localizing on its map again resubscribes.
    fn lose_subscription(&mut self, reason: String) {
        self.subscription = None;
        let scene_id = self.scene.take().map(|s| s.id).unwrap_or_default();
        warn!(%scene_id, %reason, "object subscription lost");
        self.events
            .emit(Notification::SubscriptionLost { scene_id, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChannelFeed;
    use crate::object::{ObjectData, Prefab};
    use foundation::{MapHandle, MapId, Wgs84};
    use maps::{shared_registry, AnchorRoot, MapIdentity, PointCloud, Privacy, DEFAULT_CLOUD_COLOR};
    use pretty_assertions::assert_eq;

    const ORIGIN: Wgs84 = Wgs84 {
        lat_deg: 60.0,
        lon_deg: 24.0,
        alt_m: 0.0,
    };

    fn object(id: &str, scene: &str, position: Wgs84) -> RemoteObject {
        let mut o = RemoteObject {
            id: id.into(),
            scene_id: scene.into(),
            author: String::new(),
            prefab_index: 1,
            data: Prefab::Diamond.to_data(),
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            quaternion_x: 0.0,
            quaternion_y: 0.0,
            quaternion_z: 0.0,
            quaternion_w: 0.0,
        };
        o.set_position(position);
        o
    }

    fn scene(id: &str, map_id: i32) -> Scene {
        Scene {
            id: id.into(),
            map_id,
            objects: Vec::new(),
        }
    }

    fn load(registry: &SharedRegistry, map_id: i32) {
        registry
            .write()
            .register(
                MapHandle::new(map_id),
                MapIdentity {
                    id: MapId::new(map_id),
                    name: String::new(),
                    privacy: Privacy::Private,
                    color: DEFAULT_CLOUD_COLOR,
                    map_to_ecef: MapToEcef::enu_at(ORIGIN),
                },
                AnchorRoot::default(),
                PointCloud::empty(DEFAULT_CLOUD_COLOR),
            )
            .unwrap();
    }

    fn sync_with(feed: Arc<ChannelFeed>, registry: SharedRegistry) -> (RealtimeSync, EventBus) {
        let events = EventBus::new();
        (RealtimeSync::new(feed, registry, events.clone()), events)
    }

    #[tokio::test]
    async fn create_then_delete_leaves_nothing() {
        let feed = Arc::new(ChannelFeed::new());
        let (mut sync, _) = sync_with(feed.clone(), shared_registry());
        sync.start(scene("s", 1)).await.unwrap();

        feed.publish(ChangeEvent::new(ChangeKind::Create, object("a", "s", ORIGIN)));
        feed.publish(ChangeEvent::new(ChangeKind::Delete, object("a", "s", ORIGIN)));
        assert_eq!(sync.pump(), 2);

        assert!(sync.placeholders().is_empty());
        assert!(sync.object("a").is_none());
    }

    #[tokio::test]
    async fn create_and_enter_are_idempotent() {
        let (mut sync, _) = sync_with(Arc::new(ChannelFeed::new()), shared_registry());
        sync.start(scene("s", 1)).await.unwrap();

        sync.apply(ChangeEvent::new(ChangeKind::Create, object("a", "s", ORIGIN)));
        sync.apply(ChangeEvent::new(ChangeKind::Enter, object("a", "s", ORIGIN)));
        assert_eq!(sync.placeholders().len(), 1);
        assert!(sync.placeholder("a").unwrap().active);
    }

    #[tokio::test]
    async fn delete_of_unknown_object_is_noop() {
        let (mut sync, _) = sync_with(Arc::new(ChannelFeed::new()), shared_registry());
        sync.apply(ChangeEvent::new(ChangeKind::Leave, object("ghost", "s", ORIGIN)));
        assert!(sync.placeholders().is_empty());
    }

    #[tokio::test]
    async fn position_uses_loaded_map_transform() {
        let registry = shared_registry();
        load(&registry, 7);
        let (mut sync, _) = sync_with(Arc::new(ChannelFeed::new()), registry);
        sync.start(scene("s", 7)).await.unwrap();

        let target = foundation::enu_to_ecef(foundation::Enu::new(3.0, 4.0, 1.0), ORIGIN);
        let geo = foundation::ecef_to_wgs84(target);
        sync.apply(ChangeEvent::new(ChangeKind::Create, object("a", "s", geo)));

        let p = sync.placeholder("a").unwrap();
        assert!(p.anchored);
        assert!((p.local_position - Vector3::new(3.0, 4.0, 1.0)).norm() < 1e-3);
        // Zero quaternion in the record falls back to identity.
        assert_eq!(p.local_rotation, UnitQuaternion::identity());
    }

    #[tokio::test]
    async fn unloaded_map_places_at_origin_until_refreshed() {
        let registry = shared_registry();
        let (mut sync, _) = sync_with(Arc::new(ChannelFeed::new()), registry.clone());
        sync.start(scene("s", 7)).await.unwrap();

        let geo = foundation::ecef_to_wgs84(foundation::enu_to_ecef(
            foundation::Enu::new(0.0, 10.0, 0.0),
            ORIGIN,
        ));
        sync.apply(ChangeEvent::new(ChangeKind::Create, object("a", "s", geo)));
        let p = sync.placeholder("a").unwrap();
        assert!(!p.anchored);
        assert_eq!(p.local_position, Vector3::zeros());

        load(&registry, 7);
        sync.refresh_positions();
        let p = sync.placeholder("a").unwrap();
        assert!(p.anchored);
        assert!((p.local_position.y - 10.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn update_reapplies_fields_but_keeps_prefab() {
        let (mut sync, _) = sync_with(Arc::new(ChannelFeed::new()), shared_registry());
        sync.start(scene("s", 1)).await.unwrap();
        sync.apply(ChangeEvent::new(ChangeKind::Create, object("a", "s", ORIGIN)));

        let mut changed = object("a", "s", ORIGIN);
        changed.data = ObjectData::new();
        changed.data.insert("label".into(), "hello".into());
        sync.apply(ChangeEvent::new(ChangeKind::Update, changed));

        let p = sync.placeholder("a").unwrap();
        assert_eq!(p.prefab, Prefab::Diamond);
        assert_eq!(p.data.get("label").and_then(|v| v.as_str()), Some("hello"));
    }

    #[tokio::test]
    async fn restart_tears_down_previous_scene() {
        let feed = Arc::new(ChannelFeed::new());
        let (mut sync, events) = sync_with(feed.clone(), shared_registry());
        sync.start(scene("s1", 1)).await.unwrap();
        sync.apply(ChangeEvent::new(ChangeKind::Create, object("a", "s1", ORIGIN)));

        sync.start(scene("s2", 2)).await.unwrap();
        assert!(sync.placeholders().is_empty());
        assert_eq!(feed.subscriber_count(), 1);

        // Changes for the old scene no longer arrive.
        feed.publish(ChangeEvent::new(ChangeKind::Create, object("b", "s1", ORIGIN)));
        assert_eq!(sync.pump(), 0);

        let started: Vec<Notification> = events.drain_notifications();
        assert_eq!(started.len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (mut sync, _) = sync_with(Arc::new(ChannelFeed::new()), shared_registry());
        sync.start(scene("s", 1)).await.unwrap();
        sync.apply(ChangeEvent::new(ChangeKind::Create, object("a", "s", ORIGIN)));

        assert_eq!(sync.unsubscribe(), 1);
        assert_eq!(sync.unsubscribe(), 0);
        assert!(!sync.is_subscribed());
        assert_eq!(sync.current_scene(), None);
    }

    #[tokio::test]
    async fn lost_subscription_is_surfaced() {
        let feed = Arc::new(ChannelFeed::new());
        let (mut sync, events) = sync_with(feed.clone(), shared_registry());
        sync.start(scene("s", 1)).await.unwrap();
        events.drain();

        feed.drop_scene("s", "server restarted");
        assert_eq!(sync.next_event().await, None);
        assert!(!sync.is_subscribed());
        assert_eq!(sync.current_scene(), None);
        assert_eq!(
            events.drain_notifications(),
            vec![Notification::SubscriptionLost {
                scene_id: "s".into(),
                reason: "server restarted".into(),
            }]
        );
    }

    #[tokio::test]
    async fn next_event_applies_one_change() {
        let feed = Arc::new(ChannelFeed::new());
        let (mut sync, _) = sync_with(feed.clone(), shared_registry());
        sync.start(scene("s", 1)).await.unwrap();

        feed.publish(ChangeEvent::new(ChangeKind::Create, object("a", "s", ORIGIN)));
        assert_eq!(sync.next_event().await, Some(ChangeKind::Create));
        assert!(sync.placeholder("a").is_some());
    }
}
