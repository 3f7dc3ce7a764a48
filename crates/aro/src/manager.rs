//! Scene selection on localization and the object editing operations.

use std::sync::Arc;

use foundation::{MapId, Wgs84};
use maps::LocalizedPose;
use nalgebra::{Isometry3, Vector3};
use thiserror::Error;
use tracing::{debug, info};

use crate::feed::{ChangeEvent, ChangeKind, FeedError};
use crate::object::{NewObject, ObjectData, RemoteObject, Scene};
use crate::store::{ObjectStore, StoreError};
use crate::sync::RealtimeSync;

/// Camera-local axis treated as "forward" when placing new objects.
pub const CAMERA_FORWARD: Vector3<f64> = Vector3::new(0.0, 0.0, 1.0);

/// How far in front of the camera new objects are placed, in meters.
pub const PLACEMENT_DISTANCE_M: f64 = 1.0;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("no scene selected")]
    NoScene,
    #[error("unknown object {0}")]
    UnknownObject(String),
}

/// Geographic position [`PLACEMENT_DISTANCE_M`] in front of the camera.
///
/// Without a valid pose the store's convention applies: the object is
/// written at `(0, 0, 0)`.
pub fn placement_in_front(pose: Option<&LocalizedPose>, camera: &Isometry3<f64>) -> Wgs84 {
    let ahead = camera.translation.vector + camera.rotation * CAMERA_FORWARD * PLACEMENT_DISTANCE_M;
    pose.filter(|p| p.valid)
        .and_then(|p| p.tracking_point_to_wgs84(ahead))
        .unwrap_or(Wgs84::new(0.0, 0.0, 0.0))
}

pub struct AroManager {
    store: Arc<dyn ObjectStore>,
    sync: RealtimeSync,
    author: String,
}

impl AroManager {
    pub fn new(store: Arc<dyn ObjectStore>, sync: RealtimeSync, author: impl Into<String>) -> Self {
        Self {
            store,
            sync,
            author: author.into(),
        }
    }

    pub fn sync(&self) -> &RealtimeSync {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut RealtimeSync {
        &mut self.sync
    }

    pub fn current_scene(&self) -> Option<&Scene> {
        self.sync.current_scene()
    }

    /// Switches to the scene of `map_id`, creating it if the store has none.
    ///
    /// Returns whether the scene changed; invalid map ids are ignored. Objects
    /// already in the scene are applied as `enter` events after the
    /// subscription is open, so nothing written in between is missed.
    pub async fn on_localized(&mut self, map_id: MapId) -> Result<bool, ManagerError> {
        if !map_id.is_valid() {
            debug!(%map_id, "ignoring localization without a map");
            return Ok(false);
        }
        if self.current_scene().map(Scene::map_id) == Some(map_id) {
            return Ok(false);
        }

        let scene = match self.store.find_scene_by_map(map_id).await? {
            Some(scene) => scene,
            None => {
                info!(%map_id, "creating scene for map");
                self.store.create_scene(map_id).await?
            }
        };
        if self.current_scene().map(|s| s.id.as_str()) == Some(scene.id.as_str()) {
            return Ok(false);
        }

        let scene_id = scene.id.clone();
        self.sync.start(scene).await?;
        let existing = self.store.list_objects(scene_id.clone()).await?;
        debug!(%scene_id, objects = existing.len(), "scene objects listed");
        for object in existing {
            self.sync.apply(ChangeEvent::new(ChangeKind::Enter, object));
        }
        Ok(true)
    }

    fn scene_id(&self) -> Result<String, ManagerError> {
        self.current_scene()
            .map(|s| s.id.clone())
            .ok_or(ManagerError::NoScene)
    }

    fn known(&self, id: &str) -> Result<RemoteObject, ManagerError> {
        self.sync
            .object(id)
            .cloned()
            .ok_or_else(|| ManagerError::UnknownObject(id.to_string()))
    }

    /// Creates an object in the current scene and lists it on the scene.
    pub async fn add_object(
        &mut self,
        data: ObjectData,
        prefab_index: i32,
        position: Wgs84,
    ) -> Result<RemoteObject, ManagerError> {
        let scene_id = self.scene_id()?;
        let object = self
            .store
            .create_object(NewObject {
                scene_id: scene_id.clone(),
                author: self.author.clone(),
                prefab_index,
                data,
                position,
                orientation: [0.0; 4],
            })
            .await?;
        self.store
            .add_to_scene(scene_id, vec![object.id.clone()])
            .await?;
        if let Some(scene) = self.sync.current_scene_mut() {
            scene.add_unique(std::slice::from_ref(&object.id));
        }
        info!(object_id = %object.id, "object added");
        Ok(object)
    }

    /// Saves `object` and applies it locally without waiting for the feed
    /// echo, so back-to-back edits build on each other.
    async fn save(&mut self, object: RemoteObject) -> Result<(), ManagerError> {
        self.store.save_object(object.clone()).await?;
        self.sync.apply(ChangeEvent::new(ChangeKind::Update, object));
        Ok(())
    }

    pub async fn update_data(&mut self, id: &str, data: ObjectData) -> Result<(), ManagerError> {
        let mut object = self.known(id)?;
        object.data = data;
        self.save(object).await
    }

    pub async fn move_object(&mut self, id: &str, position: Wgs84) -> Result<(), ManagerError> {
        let mut object = self.known(id)?;
        object.set_position(position);
        self.save(object).await
    }

    /// `orientation` is `[x, y, z, w]` in the ECEF frame.
    pub async fn update_pose(
        &mut self,
        id: &str,
        position: Wgs84,
        orientation: [f64; 4],
    ) -> Result<(), ManagerError> {
        let mut object = self.known(id)?;
        object.set_position(position);
        object.set_orientation(orientation);
        self.save(object).await
    }

    pub async fn delete_object(&mut self, id: &str) -> Result<(), ManagerError> {
        let scene_id = self.scene_id()?;
        let object = self.known(id)?;
        self.store.delete_object(id.to_string()).await?;
        self.sync.apply(ChangeEvent::new(ChangeKind::Delete, object));
        let ids = vec![id.to_string()];
        self.store.remove_from_scene(scene_id, ids.clone()).await?;
        if let Some(scene) = self.sync.current_scene_mut() {
            scene.remove_all(&ids);
        }
        Ok(())
    }

    /// Removes every known object of the current scene; returns how many.
    pub async fn delete_all_objects(&mut self) -> Result<usize, ManagerError> {
        let scene_id = self.scene_id()?;
        let ids: Vec<String> = self.sync.objects().map(|o| o.id.clone()).collect();
        self.store.remove_from_scene(scene_id, ids.clone()).await?;
        if let Some(scene) = self.sync.current_scene_mut() {
            scene.remove_all(&ids);
        }
        for id in &ids {
            let object = self.known(id)?;
            self.store.delete_object(id.clone()).await?;
            self.sync.apply(ChangeEvent::new(ChangeKind::Delete, object));
        }
        info!(count = ids.len(), "all scene objects deleted");
        Ok(ids.len())
    }
}
