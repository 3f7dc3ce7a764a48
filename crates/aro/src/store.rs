//! Object store seam and its in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use foundation::MapId;
use maps::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::feed::{ChangeEvent, ChangeKind, ChannelFeed};
use crate::object::{NewObject, RemoteObject, Scene, OBJECT_CLASS, SCENE_CLASS};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{class} {id} not found")]
    NotFound { class: &'static str, id: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Remote persistence for scenes and objects.
///
/// Writes made here reach live subscribers through the store's change feed.
pub trait ObjectStore: Send + Sync {
    fn find_scene_by_map(&self, map_id: MapId) -> BoxFuture<'_, Result<Option<Scene>, StoreError>>;

    fn create_scene(&self, map_id: MapId) -> BoxFuture<'_, Result<Scene, StoreError>>;

    fn list_objects(&self, scene_id: String) -> BoxFuture<'_, Result<Vec<RemoteObject>, StoreError>>;

    fn create_object(&self, new: NewObject) -> BoxFuture<'_, Result<RemoteObject, StoreError>>;

    /// Overwrites the mutable fields of an existing object.
    fn save_object(&self, object: RemoteObject) -> BoxFuture<'_, Result<(), StoreError>>;

    fn delete_object(&self, object_id: String) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Appends ids missing from the scene's object list.
    fn add_to_scene(
        &self,
        scene_id: String,
        object_ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), StoreError>>;

    fn remove_from_scene(
        &self,
        scene_id: String,
        object_ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// Store-style object id: ten alphanumeric characters.
pub fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

#[derive(Default)]
struct MemoryState {
    scenes: BTreeMap<String, Scene>,
    objects: BTreeMap<String, RemoteObject>,
}

/// Store kept in process memory. Every object write is published on the
/// attached [`ChannelFeed`].
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    feed: Arc<ChannelFeed>,
}

impl InMemoryStore {
    pub fn new(feed: Arc<ChannelFeed>) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            feed,
        }
    }

    pub fn feed(&self) -> &Arc<ChannelFeed> {
        &self.feed
    }

    pub fn scene(&self, scene_id: &str) -> Option<Scene> {
        self.state.lock().scenes.get(scene_id).cloned()
    }

    pub fn object(&self, object_id: &str) -> Option<RemoteObject> {
        self.state.lock().objects.get(object_id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn scene_count(&self) -> usize {
        self.state.lock().scenes.len()
    }

    fn scene_mut<'a>(
        state: &'a mut MemoryState,
        scene_id: &str,
    ) -> Result<&'a mut Scene, StoreError> {
        state.scenes.get_mut(scene_id).ok_or_else(|| StoreError::NotFound {
            class: SCENE_CLASS,
            id: scene_id.to_string(),
        })
    }
}

impl ObjectStore for InMemoryStore {
    fn find_scene_by_map(&self, map_id: MapId) -> BoxFuture<'_, Result<Option<Scene>, StoreError>> {
        Box::pin(async move {
            let state = self.state.lock();
            let scene = state
                .scenes
                .values()
                .find(|s| s.map_id() == map_id)
                .cloned();
            Ok(scene)
        })
    }

    fn create_scene(&self, map_id: MapId) -> BoxFuture<'_, Result<Scene, StoreError>> {
        Box::pin(async move {
            let scene = Scene {
                id: new_object_id(),
                map_id: map_id.0,
                objects: Vec::new(),
            };
            self.state
                .lock()
                .scenes
                .insert(scene.id.clone(), scene.clone());
            Ok(scene)
        })
    }

    fn list_objects(&self, scene_id: String) -> BoxFuture<'_, Result<Vec<RemoteObject>, StoreError>> {
        Box::pin(async move {
            let state = self.state.lock();
            let objects = state
                .objects
                .values()
                .filter(|o| o.scene_id == scene_id)
                .cloned()
                .collect();
            Ok(objects)
        })
    }

    fn create_object(&self, new: NewObject) -> BoxFuture<'_, Result<RemoteObject, StoreError>> {
        Box::pin(async move {
            let object = RemoteObject::from_new(new_object_id(), new);
            self.state
                .lock()
                .objects
                .insert(object.id.clone(), object.clone());
            self.feed
                .publish(ChangeEvent::new(ChangeKind::Create, object.clone()));
            Ok(object)
        })
    }

    fn save_object(&self, object: RemoteObject) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let previous = {
                let mut state = self.state.lock();
                let Some(slot) = state.objects.get_mut(&object.id) else {
                    return Err(StoreError::NotFound {
                        class: OBJECT_CLASS,
                        id: object.id.clone(),
                    });
                };
                std::mem::replace(slot, object.clone())
            };

            if previous.scene_id == object.scene_id {
                self.feed
                    .publish(ChangeEvent::new(ChangeKind::Update, object));
            } else {
                self.feed.publish_to(
                    &previous.scene_id,
                    ChangeEvent::new(ChangeKind::Leave, object.clone()),
                );
                self.feed.publish(ChangeEvent::new(ChangeKind::Enter, object));
            }
            Ok(())
        })
    }

    fn delete_object(&self, object_id: String) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let removed = self.state.lock().objects.remove(&object_id);
            let object = removed.ok_or_else(|| StoreError::NotFound {
                class: OBJECT_CLASS,
                id: object_id.clone(),
            })?;
            self.feed.publish(ChangeEvent::new(ChangeKind::Delete, object));
            Ok(())
        })
    }

    fn add_to_scene(
        &self,
        scene_id: String,
        object_ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            Self::scene_mut(&mut state, &scene_id)?.add_unique(&object_ids);
            Ok(())
        })
    }

    fn remove_from_scene(
        &self,
        scene_id: String,
        object_ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut state = self.state.lock();
            Self::scene_mut(&mut state, &scene_id)?.remove_all(&object_ids);
            Ok(())
        })
    }
}
