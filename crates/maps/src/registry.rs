//! Bidirectional record of which maps are loaded under which handles.
//!
//! The registry is the only place that answers "is map X loaded?". It is
//! owned by the map lifecycle and shared read-mostly with pose consumers and
//! the object sync through [`SharedRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use foundation::{MapHandle, MapId, MapToEcef};
use nalgebra::Isometry3;
use parking_lot::RwLock;
use thiserror::Error;

use crate::cloud::{PointCloud, Rgb8};
use crate::job::Privacy;

pub type SharedRegistry = Arc<RwLock<MapRegistry>>;

pub fn shared_registry() -> SharedRegistry {
    Arc::new(RwLock::new(MapRegistry::new()))
}

/// Persistent facts about a loaded map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapIdentity {
    pub id: MapId,
    pub name: String,
    pub privacy: Privacy,
    pub color: Rgb8,
    pub map_to_ecef: MapToEcef,
}

/// Where a loaded map is attached in the scene graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorRoot {
    pub space_id: u32,
    pub offset: Isometry3<f64>,
}

impl Default for AnchorRoot {
    fn default() -> Self {
        Self {
            space_id: 0,
            offset: Isometry3::identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapRegistryEntry {
    pub handle: MapHandle,
    pub identity: MapIdentity,
    pub anchor: AnchorRoot,
    pub cloud: PointCloud,
}

/// Compact view of one loaded map, for logs and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMapSummary {
    pub id: MapId,
    pub handle: MapHandle,
    pub name: String,
    pub privacy: Privacy,
    pub points: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryConflict {
    #[error("handle {handle} already registered for map {existing}")]
    HandleInUse { handle: MapHandle, existing: MapId },
    #[error("map {map_id} already registered under handle {existing}")]
    AlreadyLoaded { map_id: MapId, existing: MapHandle },
    #[error("invalid handle {0}")]
    InvalidHandle(MapHandle),
    #[error("invalid map id {0}")]
    InvalidMapId(MapId),
}

/// Each handle maps to at most one identity and each identity to at most
/// one handle. Lookups in either direction are hash lookups; listings are
/// sorted by [`MapId`] so their order is deterministic.
#[derive(Debug, Default)]
pub struct MapRegistry {
    entries: HashMap<MapId, MapRegistryEntry>,
    by_handle: HashMap<MapHandle, MapId>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        handle: MapHandle,
        identity: MapIdentity,
        anchor: AnchorRoot,
        cloud: PointCloud,
    ) -> Result<(), RegistryConflict> {
        if !handle.is_valid() {
            return Err(RegistryConflict::InvalidHandle(handle));
        }
        if !identity.id.is_valid() {
            return Err(RegistryConflict::InvalidMapId(identity.id));
        }
        if let Some(existing) = self.entries.get(&identity.id) {
            return Err(RegistryConflict::AlreadyLoaded {
                map_id: identity.id,
                existing: existing.handle,
            });
        }
        if let Some(existing) = self.by_handle.get(&handle) {
            return Err(RegistryConflict::HandleInUse {
                handle,
                existing: *existing,
            });
        }

        self.by_handle.insert(handle, identity.id);
        self.entries.insert(
            identity.id,
            MapRegistryEntry {
                handle,
                identity,
                anchor,
                cloud,
            },
        );
        Ok(())
    }

    /// Removing a handle that is not registered is a no-op.
    pub fn unregister(&mut self, handle: MapHandle) -> Option<MapRegistryEntry> {
        let id = self.by_handle.remove(&handle)?;
        self.entries.remove(&id)
    }

    pub fn unregister_by_identity(&mut self, id: MapId) -> Option<MapRegistryEntry> {
        let entry = self.entries.remove(&id)?;
        self.by_handle.remove(&entry.handle);
        Some(entry)
    }

    pub fn lookup_by_handle(&self, handle: MapHandle) -> Option<&MapRegistryEntry> {
        self.by_handle
            .get(&handle)
            .and_then(|id| self.entries.get(id))
    }

    pub fn lookup_by_id(&self, id: MapId) -> Option<&MapRegistryEntry> {
        self.entries.get(&id)
    }

    pub fn handle_for_id(&self, id: MapId) -> Option<MapHandle> {
        self.entries.get(&id).map(|e| e.handle)
    }

    pub fn id_for_handle(&self, handle: MapHandle) -> Option<MapId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn is_loaded(&self, id: MapId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn map_to_ecef(&self, id: MapId) -> Option<MapToEcef> {
        self.entries.get(&id).map(|e| e.identity.map_to_ecef)
    }

    /// Loaded map ids in ascending order.
    pub fn loaded_ids(&self) -> Vec<MapId> {
        let mut ids: Vec<MapId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Summaries of every loaded map, sorted by id.
    pub fn snapshot(&self) -> Vec<LoadedMapSummary> {
        let mut summaries: Vec<LoadedMapSummary> = self
            .entries
            .values()
            .map(|e| LoadedMapSummary {
                id: e.identity.id,
                handle: e.handle,
                name: e.identity.name.clone(),
                privacy: e.identity.privacy,
                points: e.cloud.len(),
            })
            .collect();
        summaries.sort_unstable_by_key(|s| s.id);
        summaries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
